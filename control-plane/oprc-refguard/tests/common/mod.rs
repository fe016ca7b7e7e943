#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use oprc_refguard::controller::ReferenceReconciler;
use oprc_refguard::crd::managed_cluster::{
    DnsProvider, DnsSpec, ManagedCluster, ManagedClusterSpec,
};
use oprc_refguard::markers::{MANAGED_FINALIZER, Markers, ROLE_LABEL};
use oprc_refguard::store::ObjectKey;
use oprc_refguard::store::memory::MemoryStore;

pub const NS: &str = "project-dev";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}
pub const MISSING_REQUEUE: Duration = Duration::from_secs(30);

pub fn cluster(name: &str, secrets: &[&str]) -> ManagedCluster {
    let mut c = ManagedCluster::new(
        name,
        ManagedClusterSpec {
            region: Some("eu-west-1".into()),
            version: Some("1.30".into()),
            dns: Some(DnsSpec {
                domain: Some(format!("{name}.example.org")),
                providers: secrets
                    .iter()
                    .map(|s| DnsProvider::with_secret("aws-route53", s))
                    .collect(),
            }),
        },
    );
    c.metadata.namespace = Some(NS.into());
    c.metadata.generation = Some(1);
    c.metadata.finalizers = Some(vec![MANAGED_FINALIZER.into()]);
    c
}

pub fn user_secret(name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(NS.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn platform_secret(name: &str) -> Secret {
    let mut s = user_secret(name);
    s.metadata.labels =
        Some(BTreeMap::from([(ROLE_LABEL.to_string(), "dns".to_string())]));
    s
}

pub fn secret_key(name: &str) -> ObjectKey {
    ObjectKey::new(NS, name)
}

pub fn reconciler(store: &MemoryStore) -> ReferenceReconciler {
    ReferenceReconciler::new(
        Arc::new(store.clone()),
        Markers::default(),
        MISSING_REQUEUE,
    )
}

pub async fn secret_protected(store: &MemoryStore, name: &str) -> bool {
    let m = Markers::default();
    store
        .secret(&secret_key(name))
        .await
        .map(|s| m.is_protected(&s))
        .unwrap_or(false)
}

pub async fn cluster_protected(store: &MemoryStore, key: &ObjectKey) -> bool {
    let m = Markers::default();
    store
        .cluster(key)
        .await
        .map(|c| m.is_protected(&c))
        .unwrap_or(false)
}

/// The platform lets go of a cluster: deletion requested and its own
/// finalizer dropped, leaving only foreign finalizers behind.
pub async fn release_cluster(store: &MemoryStore, key: &ObjectKey) {
    store.delete_cluster(key).await;
    store
        .update_cluster(key, |c| {
            let rest: Vec<String> = c
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != MANAGED_FINALIZER)
                .cloned()
                .collect();
            c.metadata.finalizers = Some(rest);
        })
        .await;
}
