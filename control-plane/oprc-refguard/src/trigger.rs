//! Decides which watch events are worth a reconcile pass.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::crd::managed_cluster::ManagedCluster;
use crate::markers::Markers;
use crate::references::referenced_secret_names;

/// A newly observed cluster is always reconciled.
pub fn should_reconcile_on_add(_cluster: &ManagedCluster) -> bool {
    true
}

/// Reconcile when the referenced secrets changed, or when this update is
/// the one that released the cluster (deleting and no longer held by the
/// platform). Status and unrelated spec churn are ignored.
pub fn should_reconcile_on_update(
    old: &ManagedCluster,
    new: &ManagedCluster,
    markers: &Markers,
) -> bool {
    references_changed(old, new)
        || (markers.is_released(new) && !markers.is_released(old))
}

/// Compares references as a multiset so reordering providers is not a change.
pub fn references_changed(old: &ManagedCluster, new: &ManagedCluster) -> bool {
    let mut before = referenced_secret_names(old);
    let mut after = referenced_secret_names(new);
    before.sort_unstable();
    after.sort_unstable();
    before != after
}

/// Hash of what the add and update triggers look at: object identity, the
/// multiset of referenced secrets, and whether the cluster is released. Two
/// versions of a cluster hash alike exactly when an update between them
/// would not trigger, and a never-seen (or recreated) cluster has no prior
/// hash, so a watch stream filtered on it forwards adds and relevant updates
/// only.
pub fn trigger_fingerprint(cluster: &ManagedCluster, markers: &Markers) -> u64 {
    let mut names = referenced_secret_names(cluster);
    names.sort_unstable();
    let mut hasher = DefaultHasher::new();
    cluster.metadata.uid.hash(&mut hasher);
    names.hash(&mut hasher);
    markers.is_released(cluster).hash(&mut hasher);
    hasher.finish()
}
