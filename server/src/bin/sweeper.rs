//! Sweep-only process.
//!
//! Runs the reconciliation sweeper without an HTTP listener, for deployments that
//! scale the API and the sweep separately. Run the HTTP server with
//! `SWEEP_IN_PROCESS=false` alongside it.

use anyhow::Context;
use std::net::SocketAddr;
use studyhall_server::{Config, Studyhall, init_tracing, serve_metrics, shutdown_signal};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;
    let metrics_addr: SocketAddr = config
        .metrics_addr()
        .parse()
        .context("METRICS_HOST/METRICS_PORT do not form a socket address")?;

    let app = Studyhall::connect(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_task = tokio::spawn(serve_metrics(metrics_addr, shutdown_rx.clone()));
    let sweeper = app.sweeper();
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    info!("Sweeper process running, press Ctrl+C to stop");
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = sweeper_task.await {
        error!(error = %e, "Sweeper task panicked");
    }
    if let Ok(Err(e)) = metrics_task.await {
        error!(error = %e, "Metrics server failed");
    }

    info!("Sweeper process stopped");
    Ok(())
}
