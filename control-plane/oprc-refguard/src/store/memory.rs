//! In-process `ReferenceStore` that mimics the API server closely enough
//! for reconcile tests: resourceVersion conflicts, finalizer-gated deletion,
//! interleaved writers and injectable failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;
use tokio::sync::RwLock;

use super::{
    FinalizerSnapshot, ObjectKey, PatchTarget, ReferenceStore, StoreError, StoreResult,
    TargetKind,
};
use crate::crd::managed_cluster::{ManagedCluster, ManagedClusterStatus};
use crate::markers::LabelAbsent;

#[derive(Default)]
struct State {
    clusters: BTreeMap<ObjectKey, ManagedCluster>,
    secrets: BTreeMap<ObjectKey, Secret>,
    failing_patches: HashSet<(TargetKind, ObjectKey)>,
    failing_lists: bool,
    /// Writes another client lands right before our next patch of the key.
    interleaved: HashMap<(TargetKind, ObjectKey), Vec<String>>,
}

impl State {
    fn meta_mut(
        &mut self,
        kind: TargetKind,
        key: &ObjectKey,
    ) -> Option<&mut ObjectMeta> {
        match kind {
            TargetKind::ManagedCluster => {
                self.clusters.get_mut(key).map(|c| &mut c.metadata)
            }
            TargetKind::Secret => {
                self.secrets.get_mut(key).map(|s| &mut s.metadata)
            }
        }
    }

    fn remove(&mut self, kind: TargetKind, key: &ObjectKey) {
        match kind {
            TargetKind::ManagedCluster => {
                self.clusters.remove(key);
            }
            TargetKind::Secret => {
                self.secrets.remove(key);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    version: Arc<AtomicU64>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        meta.resource_version = Some(self.next_version());
        if meta.namespace.is_none() {
            meta.namespace = Some("default".to_string());
        }
    }

    pub async fn put_cluster(&self, mut cluster: ManagedCluster) -> ObjectKey {
        self.stamp(&mut cluster.metadata);
        let key = ObjectKey::of(&cluster);
        self.state.write().await.clusters.insert(key.clone(), cluster);
        key
    }

    pub async fn put_secret(&self, mut secret: Secret) -> ObjectKey {
        self.stamp(&mut secret.metadata);
        let key = ObjectKey::of(&secret);
        self.state.write().await.secrets.insert(key.clone(), secret);
        key
    }

    pub async fn cluster(&self, key: &ObjectKey) -> Option<ManagedCluster> {
        self.state.read().await.clusters.get(key).cloned()
    }

    pub async fn secret(&self, key: &ObjectKey) -> Option<Secret> {
        self.state.read().await.secrets.get(key).cloned()
    }

    /// Request deletion: objects without finalizers vanish immediately,
    /// others get a deletion timestamp and wait for their finalizers.
    pub async fn delete_cluster(&self, key: &ObjectKey) {
        let mut st = self.state.write().await;
        let Some(c) = st.clusters.get_mut(key) else {
            return;
        };
        if c.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty()) {
            st.clusters.remove(key);
            return;
        }
        if c.metadata.deletion_timestamp.is_none() {
            c.metadata.deletion_timestamp = Some(Time(Utc::now()));
            c.metadata.resource_version = Some(self.next_version());
        }
    }

    pub async fn delete_secret(&self, key: &ObjectKey) {
        let mut st = self.state.write().await;
        let Some(s) = st.secrets.get_mut(key) else {
            return;
        };
        if s.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty()) {
            st.secrets.remove(key);
            return;
        }
        if s.metadata.deletion_timestamp.is_none() {
            s.metadata.deletion_timestamp = Some(Time(Utc::now()));
            s.metadata.resource_version = Some(self.next_version());
        }
    }

    /// Apply an out-of-band edit to a stored cluster, bumping its version.
    pub async fn update_cluster<F>(&self, key: &ObjectKey, edit: F)
    where
        F: FnOnce(&mut ManagedCluster),
    {
        let mut st = self.state.write().await;
        if let Some(c) = st.clusters.get_mut(key) {
            edit(c);
            c.metadata.resource_version = Some(self.next_version());
        }
    }

    /// Apply an out-of-band edit to a stored secret, bumping its version.
    pub async fn update_secret<F>(&self, key: &ObjectKey, edit: F)
    where
        F: FnOnce(&mut Secret),
    {
        let mut st = self.state.write().await;
        if let Some(s) = st.secrets.get_mut(key) {
            edit(s);
            s.metadata.resource_version = Some(self.next_version());
        }
    }

    /// Before the next finalizer patch of `key`, let another client set its
    /// finalizers to `finalizers`. The patch then carries a stale version.
    pub async fn interleave_write(
        &self,
        kind: TargetKind,
        key: &ObjectKey,
        finalizers: Vec<String>,
    ) {
        self.state
            .write()
            .await
            .interleaved
            .insert((kind, key.clone()), finalizers);
    }

    pub async fn fail_patches_on(&self, kind: TargetKind, key: &ObjectKey) {
        self.state
            .write()
            .await
            .failing_patches
            .insert((kind, key.clone()));
    }

    pub async fn clear_failures(&self) {
        let mut st = self.state.write().await;
        st.failing_patches.clear();
        st.failing_lists = false;
        st.interleaved.clear();
    }

    pub async fn fail_lists(&self) {
        self.state.write().await.failing_lists = true;
    }

    /// Number of successful writes (finalizer and status patches).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn apply_finalizers(
    meta: &mut ObjectMeta,
    target: &PatchTarget,
    finalizers: Vec<String>,
    version: String,
) -> StoreResult<bool> {
    if let Some(rv) = target.resource_version.as_deref() {
        if meta.resource_version.as_deref() != Some(rv) {
            return Err(StoreError::Conflict(target.to_string()));
        }
    }
    meta.finalizers = Some(finalizers);
    meta.resource_version = Some(version);
    let gone = meta.deletion_timestamp.is_some()
        && meta.finalizers.as_ref().is_none_or(|f| f.is_empty());
    Ok(gone)
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn get_cluster(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<ManagedCluster>> {
        Ok(self.state.read().await.clusters.get(key).cloned())
    }

    async fn list_clusters(
        &self,
        namespace: &str,
    ) -> StoreResult<Vec<ManagedCluster>> {
        let st = self.state.read().await;
        if st.failing_lists {
            return Err(StoreError::Api("injected list failure".into()));
        }
        Ok(st
            .clusters
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        Ok(self.state.read().await.secrets.get(key).cloned())
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        selector: &LabelAbsent,
    ) -> StoreResult<Vec<Secret>> {
        let st = self.state.read().await;
        if st.failing_lists {
            return Err(StoreError::Api("injected list failure".into()));
        }
        Ok(st
            .secrets
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .filter(|(_, s)| {
                s.metadata
                    .labels
                    .as_ref()
                    .is_none_or(|l| selector.matches(l))
            })
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_finalizers(
        &self,
        kind: TargetKind,
        key: &ObjectKey,
    ) -> StoreResult<Option<FinalizerSnapshot>> {
        let st = self.state.read().await;
        Ok(match kind {
            TargetKind::ManagedCluster => {
                st.clusters.get(key).map(FinalizerSnapshot::of)
            }
            TargetKind::Secret => st.secrets.get(key).map(FinalizerSnapshot::of),
        })
    }

    async fn patch_finalizers(
        &self,
        target: &PatchTarget,
        finalizers: Vec<String>,
    ) -> StoreResult<()> {
        let mut st = self.state.write().await;
        let slot = (target.kind, target.key.clone());
        if st.failing_patches.contains(&slot) {
            return Err(StoreError::Api(format!(
                "injected patch failure on {target}"
            )));
        }
        if let Some(other) = st.interleaved.remove(&slot) {
            let version = self.next_version();
            if let Some(meta) = st.meta_mut(target.kind, &target.key) {
                meta.finalizers = Some(other);
                meta.resource_version = Some(version);
            }
        }
        let version = self.next_version();
        let meta = st
            .meta_mut(target.kind, &target.key)
            .ok_or_else(|| StoreError::NotFound(target.to_string()))?;
        if apply_finalizers(meta, target, finalizers, version)? {
            st.remove(target.kind, &target.key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn patch_cluster_status(
        &self,
        key: &ObjectKey,
        status: &ManagedClusterStatus,
    ) -> StoreResult<()> {
        let mut st = self.state.write().await;
        let c = st
            .clusters
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        c.status.get_or_insert_with(Default::default).merge(status);
        c.metadata.resource_version = Some(self.next_version());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
