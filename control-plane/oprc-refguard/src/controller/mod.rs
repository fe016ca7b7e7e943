use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use kube::{
    Api, Client,
    runtime::{
        Controller, WatchStreamExt,
        controller::{Action, Config as ControllerConfig},
        reflector, watcher,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RefGuardConfig;
use crate::crd::managed_cluster::ManagedCluster;
use crate::markers::Markers;
use crate::store::{KubeStore, ObjectKey, ReferenceStore, StoreError};
use crate::trigger::trigger_fingerprint;

pub mod finalizer;
pub mod parallel;
pub mod reconcile;
pub mod status;
pub mod unreferenced;

pub use reconcile::ReferenceReconciler;

use parallel::TaskErrors;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("releasing unreferenced secrets: {0}")]
    Release(TaskErrors),
    #[error("protecting referenced secrets: {0}")]
    Grant(TaskErrors),
}

pub struct ControllerContext {
    pub reconciler: ReferenceReconciler,
    /// Delay before a failed pass is retried.
    pub error_requeue: Duration,
}

pub async fn reconcile(
    obj: Arc<ManagedCluster>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    ctx.reconciler.reconcile(&ObjectKey::of(obj.as_ref())).await
}

pub fn error_policy(
    obj: Arc<ManagedCluster>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    warn!(
        key = %ObjectKey::of(obj.as_ref()),
        %error,
        retry_in = ?ctx.error_requeue,
        "reconcile failed"
    );
    Action::requeue(ctx.error_requeue)
}

/// Forward only the cluster versions the add/update triggers react to:
/// first sight, a change of referenced secrets, or the release transition.
pub fn trigger_filter<S>(
    clusters: S,
    markers: Markers,
) -> impl Stream<Item = Result<ManagedCluster, watcher::Error>> + Send + 'static
where
    S: Stream<Item = Result<ManagedCluster, watcher::Error>> + Send + 'static,
{
    clusters.predicate_filter(move |c: &ManagedCluster| {
        Some(trigger_fingerprint(c, &markers))
    })
}

fn cluster_api(client: Client, cfg: &RefGuardConfig) -> Api<ManagedCluster> {
    match cfg.watch_namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Api::namespaced(client, ns),
        _ => Api::all(client),
    }
}

/// Watch `ManagedCluster`s and keep the secrets they reference protected
/// until `shutdown` fires.
pub async fn run_controller(
    client: Client,
    cfg: RefGuardConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let markers = Markers::default();
    let store: Arc<dyn ReferenceStore> = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(ControllerContext {
        reconciler: ReferenceReconciler::new(
            store,
            markers.clone(),
            cfg.missing_child_requeue(),
        ),
        error_requeue: cfg.error_requeue(),
    });
    let workers = u16::try_from(cfg.workers.unwrap_or(1).max(1)).unwrap_or(u16::MAX);

    let (reader, writer) = reflector::store::<ManagedCluster>();
    let clusters = watcher(cluster_api(client, &cfg), watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .touched_objects();
    info!(workers, namespace = ?cfg.watch_namespace, "controller started");

    Controller::for_stream(trigger_filter(clusters, markers), reader)
        .with_config(ControllerConfig::default().concurrency(workers))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(%obj_ref, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    info!("controller stopped");
    Ok(())
}
