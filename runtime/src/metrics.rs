//! Prometheus metrics for booking and reconciliation.
//!
//! Exported metrics:
//! - `bookings_created_total`, `booking_conflicts_total`
//! - `reconcile_outcomes_total{outcome,trigger}`, `reconcile_alerts_total`
//! - `refunds_pending_total`
//! - `gateway_status_checks_total{method,result}`
//! - `sweep_duration_seconds`
//!
//! # Example
//!
//! ```rust,no_run
//! use studyhall_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let _body = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use studyhall_core::types::PaymentMethod;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus recorder plus the address its scrape endpoint should bind.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Scrape address
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe metrics and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder that is
    /// already installed (tests) is not an error; `handle` stays `None` then.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in Prometheus text format, `None` before [`start`](Self::start).
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("bookings_created_total", "Holds written by the reservation writer");
    describe_counter!(
        "booking_conflicts_total",
        "Booking attempts rejected for date conflict or unavailable resource"
    );
    describe_counter!(
        "reconcile_outcomes_total",
        "Reconciliation results by outcome and trigger"
    );
    describe_counter!(
        "reconcile_alerts_total",
        "Pending transactions older than the alert ceiling"
    );
    describe_counter!(
        "refunds_pending_total",
        "Paid transactions failed because the resource was no longer available"
    );
    describe_counter!(
        "gateway_status_checks_total",
        "Provider status checks by method and result"
    );
    describe_histogram!("sweep_duration_seconds", "Wall time of one sweep pass");
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// A hold was written.
    pub fn record_created() {
        counter!("bookings_created_total").increment(1);
    }

    /// A booking lost to contention.
    pub fn record_conflict() {
        counter!("booking_conflicts_total").increment(1);
    }
}

/// Reconciliation metrics recorder.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// One reconcile call finished.
    pub fn record_outcome(outcome: &'static str, trigger: &'static str) {
        counter!("reconcile_outcomes_total", "outcome" => outcome, "trigger" => trigger).increment(1);
    }

    /// A pending transaction crossed the alert ceiling.
    pub fn record_alert() {
        counter!("reconcile_alerts_total").increment(1);
    }

    /// A paid transaction needs a manual refund.
    pub fn record_refund_pending() {
        counter!("refunds_pending_total").increment(1);
    }

    /// One provider status check.
    pub fn record_status_check(method: PaymentMethod, result: &'static str) {
        counter!("gateway_status_checks_total", "method" => method.as_str(), "result" => result).increment(1);
    }

    /// One sweep pass.
    pub fn record_sweep(duration: Duration) {
        histogram!("sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        BookingMetrics::record_created();
        ReconcileMetrics::record_outcome("completed", "poll");
        ReconcileMetrics::record_status_check(PaymentMethod::Qr, "still_pending");

        // handle is None when another test installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("bookings_created_total"));
            assert!(rendered.contains("reconcile_outcomes_total"));
            assert!(rendered.contains("gateway_status_checks_total"));
        }
    }
}
