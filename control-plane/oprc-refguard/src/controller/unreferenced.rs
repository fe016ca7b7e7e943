use std::collections::HashSet;

use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};

use crate::crd::managed_cluster::ManagedCluster;
use crate::markers::Markers;
use crate::references::referenced_secret_names;

/// Union of secret names referenced by `siblings`. The target's own entry
/// is left out when it is being deleted and the platform has already let
/// go of it, since its claims no longer keep anything alive.
pub fn referenced_in_namespace(
    target: &ManagedCluster,
    siblings: &[ManagedCluster],
    markers: &Markers,
) -> HashSet<String> {
    let target_deleting = target.meta().deletion_timestamp.is_some();
    let target_name = target.name_any();
    siblings
        .iter()
        .filter(|s| {
            !(s.name_any() == target_name
                && target_deleting
                && !markers.is_platform_managed(*s))
        })
        .flat_map(referenced_secret_names)
        .collect()
}

/// Protected secrets that no sibling references anymore.
pub fn unreferenced_secrets(
    target: &ManagedCluster,
    siblings: &[ManagedCluster],
    secrets: Vec<Secret>,
    markers: &Markers,
) -> Vec<Secret> {
    let referenced = referenced_in_namespace(target, siblings, markers);
    secrets
        .into_iter()
        .filter(|s| markers.is_protected(s))
        .filter(|s| !referenced.contains(&s.name_any()))
        .collect()
}
