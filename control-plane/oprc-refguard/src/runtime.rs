use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{config::RefGuardConfig, controller::run_controller};

/// Cancel `token` on Ctrl-C / SIGINT.
pub fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        token.cancel();
    });
}

/// Run the controller until a shutdown signal arrives.
pub async fn run_all(client: Client, cfg: RefGuardConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    run_controller(client, cfg, shutdown).await
}
