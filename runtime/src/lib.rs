//! # Studyhall Runtime
//!
//! Services that drive bookings from quote to paid reservation.
//!
//! ## Core Components
//!
//! - **[`BookingService`]**: quotes, advisory availability, holds, payment orders
//! - **[`ReconciliationEngine`]**: the single primitive that settles or fails a pending
//!   transaction from callback or poll evidence
//! - **[`Sweeper`]** and **[`Recovery`]**: timer-driven and operator-driven adapters
//!   over the engine
//! - **[`retry`]**: bounded linear backoff for transient provider errors
//! - **[`metrics`]**: Prometheus counters and histograms
//!
//! ## Example
//!
//! ```ignore
//! use studyhall_runtime::{Evidence, ReconciliationEngine, Trigger};
//!
//! let engine = ReconciliationEngine::new(store, registry, clock, ReconcileConfig::default());
//! let outcome = engine.reconcile(transaction_id, Evidence::Poll, Trigger::ClientPoll).await?;
//! ```

/// Quote, hold and payment order service
pub mod booking;

/// Prometheus metrics for observability
pub mod metrics;

/// Reconciliation engine
pub mod reconcile;

/// Manual recovery
pub mod recovery;

/// Bounded retry with linear backoff
pub mod retry;

/// Background sweep of stale pending transactions
pub mod sweep;

pub use booking::{BookingService, OrderError, OrderRequest, PaymentOrder};
pub use reconcile::{Evidence, ReconcileConfig, ReconcileError, ReconcileOutcome, ReconciliationEngine, Trigger};
pub use recovery::Recovery;
pub use retry::RetryPolicy;
pub use sweep::{SweepConfig, SweepReport, Sweeper};
