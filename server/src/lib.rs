//! Process wiring for Studyhall.
//!
//! Both binaries share this bootstrap: connect the pool, apply migrations, build the
//! provider registry, then hand out the services. `studyhall-server` serves HTTP and
//! optionally sweeps; `studyhall-sweeper` only sweeps.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod config;

pub use config::{Config, ConfigError};

use anyhow::Context;
use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use studyhall_core::environment::{Clock, SystemClock};
use studyhall_core::store::BookingStore;
use studyhall_gateways::build_registry;
use studyhall_postgres::PostgresBookingStore;
use studyhall_runtime::metrics::{MetricsError, MetricsServer};
use studyhall_runtime::{BookingService, ReconciliationEngine, Recovery, Sweeper};
use studyhall_web::AppState;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,studyhall=debug,sqlx=warn";

/// Install the global tracing subscriber.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connected services.
#[derive(Clone)]
pub struct Studyhall {
    config: Arc<Config>,
    bookings: BookingService,
    engine: ReconciliationEngine,
}

impl Studyhall {
    /// Connect to the database, apply migrations and build the services.
    ///
    /// # Errors
    ///
    /// Fails if the database is unreachable, migrations fail, or the provider HTTP
    /// client cannot be built.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        tracing::info!(
            max_connections = config.database.max_connections,
            "Connecting to database"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
            .idle_timeout(Duration::from_secs(config.database.idle_timeout))
            .connect(&config.database.url)
            .await
            .context("Failed to connect to database")?;

        let store = PostgresBookingStore::new(pool).with_policy(config.booking_policy());
        store.migrate().await.context("Failed to apply migrations")?;
        tracing::info!("Database ready");

        let registry = build_registry(&config.gateway_settings()).context("Failed to build payment gateways")?;
        let store: Arc<dyn BookingStore> = Arc::new(store);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let bookings = BookingService::new(
            Arc::clone(&store),
            registry.clone(),
            Arc::clone(&clock),
            config.booking_policy(),
        );
        let engine = ReconciliationEngine::new(store, registry, clock, config.reconcile_config());

        Ok(Self {
            config: Arc::new(config),
            bookings,
            engine,
        })
    }

    /// Loaded configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// HTTP handler state
    #[must_use]
    pub fn app_state(&self) -> AppState {
        let recovery = Recovery::new(self.engine.clone(), self.config.sweep.concurrency);
        AppState::new(self.bookings.clone(), self.engine.clone(), recovery)
            .with_toggles(self.config.provider_toggles())
            .with_recovery_limit(self.config.reconcile.recovery_limit)
    }

    /// Background sweeper
    #[must_use]
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.engine.clone(), self.config.sweep_config())
    }
}

impl std::fmt::Debug for Studyhall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studyhall")
            .field("bookings", &self.bookings)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Install the Prometheus recorder and serve `/metrics` on `addr` until shutdown.
///
/// # Errors
///
/// Fails if the recorder cannot be installed or the address cannot be bound.
pub async fn serve_metrics(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> Result<(), MetricsError> {
    let mut metrics = MetricsServer::new(addr);
    metrics.start()?;
    let Some(handle) = metrics.handle().cloned() else {
        tracing::warn!("Metrics recorder owned elsewhere; not serving /metrics");
        return Ok(());
    };

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(metrics.addr()).await?;
    tracing::info!(address = %metrics.addr(), "Metrics server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => tracing::info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
