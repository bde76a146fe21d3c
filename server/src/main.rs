//! Studyhall HTTP server.
//!
//! Serves the booking and payment API, exports Prometheus metrics on a separate port,
//! and runs the reconciliation sweeper in-process unless `SWEEP_IN_PROCESS=false`.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/studyhall cargo run --bin studyhall-server
//! ```

use anyhow::Context;
use std::net::SocketAddr;
use std::time::Duration;
use studyhall_server::{Config, Studyhall, init_tracing, serve_metrics, shutdown_signal};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting Studyhall server");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        http = %config.http_addr(),
        metrics = %config.metrics_addr(),
        sweep_in_process = config.sweep.in_process,
        "Configuration loaded"
    );
    let metrics_addr: SocketAddr = config
        .metrics_addr()
        .parse()
        .context("METRICS_HOST/METRICS_PORT do not form a socket address")?;
    let http_addr = config.http_addr();
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let sweep_in_process = config.sweep.in_process;

    let app = Studyhall::connect(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_task = tokio::spawn(serve_metrics(metrics_addr, shutdown_rx.clone()));

    let sweeper_task = if sweep_in_process {
        let sweeper = app.sweeper();
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { sweeper.run(rx).await }))
    } else {
        info!("In-process sweeper disabled");
        None
    };

    let router = studyhall_web::build_router(app.app_state());
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {http_addr}"))?;
    info!(address = %http_addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, stopping background tasks");
    let _ = shutdown_tx.send(true);

    if let Some(task) = sweeper_task {
        if tokio::time::timeout(shutdown_timeout, task).await.is_err() {
            warn!("Sweeper did not stop within the shutdown timeout");
        }
    }
    match tokio::time::timeout(shutdown_timeout, metrics_task).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Metrics server failed"),
        Ok(_) => {}
        Err(_) => warn!("Metrics server did not stop within the shutdown timeout"),
    }

    info!("Server stopped");
    Ok(())
}
