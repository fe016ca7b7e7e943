use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument};

use super::finalizer;
use super::parallel::run_all;
use super::status::protection_status;
use super::unreferenced::unreferenced_secrets;
use super::ReconcileErr;
use crate::crd::managed_cluster::ManagedCluster;
use crate::markers::Markers;
use crate::references::referenced_secret_names;
use crate::store::{
    ObjectKey, ReferenceStore, StoreError, StoreResult, ignore_not_found,
};

/// What the grant pass found for one referenced secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The secret does not exist (yet).
    Missing,
    /// Created by the platform and protected elsewhere; left alone.
    PlatformManaged,
    /// User-managed and now carries the protection finalizer.
    Protected { newly_marked: bool },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct GrantSummary {
    pub protected: Vec<String>,
    pub newly_marked: usize,
    pub missing: Vec<String>,
}

impl GrantSummary {
    /// Work outstanding on behalf of this cluster: some user-managed secret
    /// it references is held by the protection finalizer.
    pub fn needs_cluster_finalizer(&self) -> bool {
        !self.protected.is_empty()
    }
}

/// Protects user-managed secrets referenced by `ManagedCluster`s.
///
/// Holds no state between passes; every pass rebuilds the namespace's
/// reference union from the store, so it can run for many keys at once and
/// repeat any number of times.
pub struct ReferenceReconciler {
    store: Arc<dyn ReferenceStore>,
    markers: Markers,
    missing_child_requeue: Duration,
}

impl ReferenceReconciler {
    pub fn new(
        store: Arc<dyn ReferenceStore>,
        markers: Markers,
        missing_child_requeue: Duration,
    ) -> Self {
        Self {
            store,
            markers,
            missing_child_requeue,
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    #[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileErr> {
        let Some(cluster) = self.store.get_cluster(key).await? else {
            info!(%key, "object is gone, stop reconciling");
            return Ok(Action::await_change());
        };

        let released = self.release_unreferenced(&cluster).await?;
        if released > 0 {
            info!(%key, released, "reconcile: released unreferenced secrets");
        }

        if self.markers.is_released(&cluster) {
            ignore_not_found(
                finalizer::remove(
                    self.store.as_ref(),
                    &cluster,
                    &self.markers.protection_finalizer,
                )
                .await
                .map(|_| ()),
            )?;
            info!(%key, "reconcile: cluster released, protection finalizer removed");
            return Ok(Action::await_change());
        }

        let summary = self.protect_referenced(&cluster).await?;
        debug!(
            %key,
            protected = summary.protected.len(),
            newly_marked = summary.newly_marked,
            missing = summary.missing.len(),
            "reconcile: grant pass complete"
        );

        let desired = if summary.needs_cluster_finalizer() {
            finalizer::MarkState::Marked
        } else {
            finalizer::MarkState::Unmarked
        };
        if finalizer::ensure(
            self.store.as_ref(),
            &cluster,
            &self.markers.protection_finalizer,
            desired,
        )
        .await?
        {
            info!(%key, ?desired, "reconcile: cluster protection finalizer updated");
        }

        if let Some(status) =
            protection_status(&cluster, summary.protected.clone())
        {
            self.store.patch_cluster_status(key, &status).await?;
        }

        if summary.missing.is_empty() {
            Ok(Action::await_change())
        } else {
            info!(%key, missing = ?summary.missing, "reconcile: referenced secrets not found; will retry");
            Ok(Action::requeue(self.missing_child_requeue))
        }
    }

    /// Drop the protection finalizer from every secret in the cluster's
    /// namespace that no cluster references anymore. Returns how many.
    async fn release_unreferenced(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<usize, ReconcileErr> {
        let ns = cluster.namespace().unwrap_or_else(|| "default".to_string());
        let secrets = self
            .store
            .list_secrets(&ns, &self.markers.user_managed)
            .await?;
        let siblings = self.store.list_clusters(&ns).await?;
        let stale = unreferenced_secrets(cluster, &siblings, secrets, &self.markers);
        if stale.is_empty() {
            return Ok(0);
        }

        let store = self.store.as_ref();
        let finalizer_name = self.markers.protection_finalizer.as_str();
        let released = run_all(stale.iter().map(|secret| async move {
            debug!(secret = %secret.name_any(), "releasing secret");
            ignore_not_found(
                finalizer::remove(store, secret, finalizer_name)
                    .await
                    .map(|_| ()),
            )
        }))
        .await
        .map_err(ReconcileErr::Release)?;
        Ok(released.len())
    }

    /// Make sure every user-managed secret the cluster references carries
    /// the protection finalizer.
    async fn protect_referenced(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<GrantSummary, ReconcileErr> {
        let ns = cluster.namespace().unwrap_or_else(|| "default".to_string());
        let mut seen = HashSet::new();
        let names: Vec<String> = referenced_secret_names(cluster)
            .into_iter()
            .filter(|n| seen.insert(n.clone()))
            .collect();

        let outcomes = run_all(names.iter().map(|name| {
            let key = ObjectKey::new(ns.clone(), name.clone());
            async move {
                let outcome = self.protect_secret(&key).await?;
                Ok::<_, StoreError>((key.name, outcome))
            }
        }))
        .await
        .map_err(ReconcileErr::Grant)?;

        let mut summary = GrantSummary::default();
        for (name, outcome) in outcomes {
            match outcome {
                GrantOutcome::Missing => summary.missing.push(name),
                GrantOutcome::PlatformManaged => {}
                GrantOutcome::Protected { newly_marked } => {
                    if newly_marked {
                        summary.newly_marked += 1;
                    }
                    summary.protected.push(name);
                }
            }
        }
        Ok(summary)
    }

    async fn protect_secret(&self, key: &ObjectKey) -> StoreResult<GrantOutcome> {
        let Some(secret) = self.store.get_secret(key).await? else {
            return Ok(GrantOutcome::Missing);
        };
        if !self.markers.is_user_managed(&secret) {
            return Ok(GrantOutcome::PlatformManaged);
        }
        match finalizer::add(
            self.store.as_ref(),
            &secret,
            &self.markers.protection_finalizer,
        )
        .await
        {
            Ok(newly_marked) => Ok(GrantOutcome::Protected { newly_marked }),
            Err(e) if e.is_not_found() => Ok(GrantOutcome::Missing),
            Err(e) => Err(e),
        }
    }
}
