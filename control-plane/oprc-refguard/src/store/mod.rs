use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};

use crate::crd::managed_cluster::{ManagedCluster, ManagedClusterStatus};
use crate::markers::LabelAbsent;

pub mod kube_store;
#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use kube_store::KubeStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("conflicting write on {0}")]
    Conflict(String),

    #[error("api error: {0}")]
    Api(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Treat a missing object as success, the way release paths need it.
pub fn ignore_not_found(res: StoreResult<()>) -> StoreResult<()> {
    match res {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Namespace/name identity of a reconciled object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    ManagedCluster,
    Secret,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::ManagedCluster => write!(f, "ManagedCluster"),
            TargetKind::Secret => write!(f, "Secret"),
        }
    }
}

/// Kinds whose finalizers the controller patches.
pub trait FinalizerOwner: Resource {
    const TARGET: TargetKind;
}

impl FinalizerOwner for ManagedCluster {
    const TARGET: TargetKind = TargetKind::ManagedCluster;
}

impl FinalizerOwner for Secret {
    const TARGET: TargetKind = TargetKind::Secret;
}

/// The object a finalizer patch is aimed at, pinned to the resourceVersion
/// it was read at so a stale read is rejected instead of applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchTarget {
    pub kind: TargetKind,
    pub key: ObjectKey,
    pub resource_version: Option<String>,
}

impl PatchTarget {
    pub fn of<K: FinalizerOwner>(obj: &K) -> Self {
        Self {
            kind: K::TARGET,
            key: ObjectKey::of(obj),
            resource_version: obj.resource_version(),
        }
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Finalizers of a stored object and the resourceVersion they were read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizerSnapshot {
    pub finalizers: Vec<String>,
    pub resource_version: Option<String>,
}

impl FinalizerSnapshot {
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            finalizers: obj.finalizers().to_vec(),
            resource_version: obj.resource_version(),
        }
    }
}

/// Read/patch access to the objects the reference controller works on.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn get_cluster(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<ManagedCluster>>;

    async fn list_clusters(
        &self,
        namespace: &str,
    ) -> StoreResult<Vec<ManagedCluster>>;

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>>;

    /// Secrets in `namespace` matching `selector`.
    async fn list_secrets(
        &self,
        namespace: &str,
        selector: &LabelAbsent,
    ) -> StoreResult<Vec<Secret>>;

    /// Current finalizers of the object a patch was aimed at, or `None` once
    /// it is gone. Used to re-plan a write that lost a race.
    async fn get_finalizers(
        &self,
        kind: TargetKind,
        key: &ObjectKey,
    ) -> StoreResult<Option<FinalizerSnapshot>>;

    /// Replace `metadata.finalizers` of the target with `finalizers`.
    /// Fails with `NotFound` when the object is gone and `Conflict` when it
    /// changed since `target.resource_version`.
    async fn patch_finalizers(
        &self,
        target: &PatchTarget,
        finalizers: Vec<String>,
    ) -> StoreResult<()>;

    async fn patch_cluster_status(
        &self,
        key: &ObjectKey,
        status: &ManagedClusterStatus,
    ) -> StoreResult<()>;
}
