use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Client, ResourceExt,
    api::{Api, ListParams, Patch, PatchParams},
};
use serde_json::json;
use tracing::trace;

use super::{
    FinalizerSnapshot, ObjectKey, PatchTarget, ReferenceStore, StoreError, StoreResult,
    TargetKind,
};
use crate::crd::managed_cluster::{ManagedCluster, ManagedClusterStatus};
use crate::markers::LabelAbsent;

/// `ReferenceStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn clusters(&self, ns: &str) -> Api<ManagedCluster> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn secrets(&self, ns: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), ns)
    }
}

fn map_kube_err(what: &str, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => {
            StoreError::NotFound(what.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict(what.to_string())
        }
        other => StoreError::Api(other.to_string()),
    }
}

fn finalizer_patch(
    target: &PatchTarget,
    finalizers: Vec<String>,
) -> serde_json::Value {
    match target.resource_version.as_deref() {
        Some(rv) => json!({
            "metadata": { "finalizers": finalizers, "resourceVersion": rv }
        }),
        None => json!({ "metadata": { "finalizers": finalizers } }),
    }
}

#[async_trait]
impl ReferenceStore for KubeStore {
    async fn get_cluster(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<ManagedCluster>> {
        self.clusters(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_err(&key.to_string(), e))
    }

    async fn list_clusters(
        &self,
        namespace: &str,
    ) -> StoreResult<Vec<ManagedCluster>> {
        let list = self
            .clusters(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_err(namespace, e))?;
        Ok(list.items)
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        self.secrets(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_err(&key.to_string(), e))
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        selector: &LabelAbsent,
    ) -> StoreResult<Vec<Secret>> {
        let lp = ListParams::default().labels(&selector.to_query());
        let list = self
            .secrets(namespace)
            .list(&lp)
            .await
            .map_err(|e| map_kube_err(namespace, e))?;
        // the server already filtered; keep the predicate authoritative anyway
        Ok(list
            .items
            .into_iter()
            .filter(|s| selector.matches(s.labels()))
            .collect())
    }

    async fn get_finalizers(
        &self,
        kind: TargetKind,
        key: &ObjectKey,
    ) -> StoreResult<Option<FinalizerSnapshot>> {
        let snapshot = match kind {
            TargetKind::ManagedCluster => self
                .get_cluster(key)
                .await?
                .map(|c| FinalizerSnapshot::of(&c)),
            TargetKind::Secret => self
                .get_secret(key)
                .await?
                .map(|s| FinalizerSnapshot::of(&s)),
        };
        Ok(snapshot)
    }

    async fn patch_finalizers(
        &self,
        target: &PatchTarget,
        finalizers: Vec<String>,
    ) -> StoreResult<()> {
        let patch = finalizer_patch(target, finalizers);
        trace!(%target, %patch, "patching finalizers");
        let pp = PatchParams::default();
        let what = target.to_string();
        let ns = &target.key.namespace;
        let name = &target.key.name;
        match target.kind {
            TargetKind::ManagedCluster => self
                .clusters(ns)
                .patch(name, &pp, &Patch::Merge(&patch))
                .await
                .map(|_| ())
                .map_err(|e| map_kube_err(&what, e)),
            TargetKind::Secret => self
                .secrets(ns)
                .patch(name, &pp, &Patch::Merge(&patch))
                .await
                .map(|_| ())
                .map_err(|e| map_kube_err(&what, e)),
        }
    }

    async fn patch_cluster_status(
        &self,
        key: &ObjectKey,
        status: &ManagedClusterStatus,
    ) -> StoreResult<()> {
        let patch = json!({ "status": status });
        self.clusters(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_err(&key.to_string(), e))
    }
}
