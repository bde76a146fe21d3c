//! Reconciliation engine.
//!
//! [`ReconciliationEngine::reconcile`] is the only path that turns a pending transaction
//! into a paid reservation or a failure. Callbacks, client polls, the sweeper and manual
//! recovery all call it; repeated or concurrent calls for one transaction are safe
//! because the store re-checks state under the transaction row lock.
//!
//! ```text
//! load ──► not pending ─────────────────────────────► AlreadyFinal
//!   │
//!   ├──► linked while pending ──────────────────────► Drift
//!   │
//!   ▼
//! evidence: Callback ─ verify ─ rejected ───────────► CallbackRejected
//!           Poll ───── check_status (timeout+retry) ─ error ─► StillPending
//!   │
//!   ├─ Success ──► settle ──► Completed
//!   │                 └─ conflict ─► mark_failed(refund_pending) ─► Failed
//!   ├─ Failure ──► mark_failed(reason) ──────────────► Failed
//!   └─ StillPending (alert when too old) ────────────► StillPending
//! ```

use crate::metrics::ReconcileMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use studyhall_core::environment::Clock;
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::payment::{CallbackPayload, GatewayError, GatewayRegistry, PaymentGateway, PaymentOutcome, reasons};
use studyhall_core::store::{BookingStore, FailRequest, SettleRequest, Settlement};
use studyhall_core::types::{ReservationId, Transaction, TransactionId, TransactionStatus};
use thiserror::Error;

/// What prompted a reconcile call.
#[derive(Debug, Clone)]
pub enum Evidence {
    /// Ask the provider
    Poll,
    /// Provider callback to verify
    Callback(CallbackPayload),
}

/// Adapter that invoked the engine, used for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Provider callback endpoint
    Callback,
    /// Client asked to re-check its payment
    ClientPoll,
    /// Background sweep
    Sweep,
    /// Operator recovery
    Manual,
}

impl Trigger {
    /// Metric label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Callback => "callback",
            Self::ClientPoll => "client_poll",
            Self::Sweep => "sweep",
            Self::Manual => "manual",
        }
    }
}

/// Result of one reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Transaction was already completed or failed; nothing written
    AlreadyFinal(TransactionStatus),
    /// Payment settled into a paid reservation
    Completed {
        /// The paid reservation
        reservation_id: ReservationId,
        /// Its booking number
        booking_number: String,
    },
    /// Transaction marked failed
    Failed {
        /// Provider reason or `resource_no_longer_available`
        reason: String,
        /// Paid but unbookable; needs a manual refund
        refund_pending: bool,
    },
    /// Provider has no final answer yet
    StillPending,
    /// Callback did not verify; transaction left pending
    CallbackRejected {
        /// Why verification failed
        reason: String,
    },
    /// Pending transaction already linked to a reservation
    Drift {
        /// The unexpected link
        reservation_id: ReservationId,
    },
}

impl ReconcileOutcome {
    /// Metric label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AlreadyFinal(_) => "already_final",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::StillPending => "still_pending",
            Self::CallbackRejected { .. } => "callback_rejected",
            Self::Drift { .. } => "drift",
        }
    }
}

/// Errors that stop a reconcile call without a verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// No transaction with this id
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Callback for an order we never created
    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    /// Transaction's provider is not configured
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Settlement failed for a reason other than contention
    #[error(transparent)]
    Booking(#[from] BookingError),
}

impl ReconcileError {
    /// Worth retrying later
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Booking(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Level for logging this error. Only integrity failures log at `error`.
    #[must_use]
    pub const fn log_level(&self) -> tracing::Level {
        match self {
            Self::TransactionNotFound(_) | Self::UnknownOrder(_) => tracing::Level::DEBUG,
            Self::Gateway(_) => tracing::Level::WARN,
            _ if self.is_transient() => tracing::Level::WARN,
            _ => tracing::Level::ERROR,
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Per-call provider status timeout
    pub status_timeout: Duration,
    /// Retries for transient provider and storage errors
    pub retry: RetryPolicy,
    /// Pending age that raises an operational alert
    pub alert_after: TimeDelta,
}

impl ReconcileConfig {
    /// Default status timeout
    pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default alert ceiling
    pub const DEFAULT_ALERT_AFTER: TimeDelta = TimeDelta::hours(24);
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            status_timeout: Self::DEFAULT_STATUS_TIMEOUT,
            retry: RetryPolicy::default(),
            alert_after: Self::DEFAULT_ALERT_AFTER,
        }
    }
}

/// The single reconcile primitive.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn BookingStore>,
    gateways: GatewayRegistry,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    /// Creates an engine
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateways: GatewayRegistry,
        clock: Arc<dyn Clock>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            clock,
            config,
        }
    }

    /// Storage handle
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    /// Current time from the engine's clock
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Reconcile the transaction a provider callback refers to.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::UnknownOrder`] when no transaction carries `payload.order_id`,
    /// otherwise as [`reconcile`](Self::reconcile).
    pub async fn on_callback(&self, payload: CallbackPayload) -> Result<(TransactionId, ReconcileOutcome), ReconcileError> {
        let transaction = self
            .store
            .find_by_order_id(&payload.order_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(order_id = %payload.order_id, "Callback for unknown order");
                ReconcileError::UnknownOrder(payload.order_id.clone())
            })?;
        let id = transaction.id;
        let outcome = self.reconcile(id, Evidence::Callback(payload), Trigger::Callback).await?;
        Ok((id, outcome))
    }

    /// Drive one transaction towards a final state.
    ///
    /// # Errors
    ///
    /// Missing transaction, unconfigured provider, storage failure, or a settlement
    /// failure other than contention.
    #[tracing::instrument(skip_all, fields(transaction_id = %transaction_id, trigger = trigger.as_str()))]
    pub async fn reconcile(
        &self,
        transaction_id: TransactionId,
        evidence: Evidence,
        trigger: Trigger,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.reconcile_inner(transaction_id, evidence).await;
        match &result {
            Ok(outcome) => {
                ReconcileMetrics::record_outcome(outcome.label(), trigger.as_str());
                tracing::debug!(outcome = outcome.label(), "Reconcile finished");
            }
            Err(e) => {
                ReconcileMetrics::record_outcome("error", trigger.as_str());
                let level = e.log_level();
                if level == tracing::Level::ERROR {
                    tracing::error!(error = %e, "Reconcile failed");
                } else if level == tracing::Level::WARN {
                    tracing::warn!(error = %e, "Reconcile failed");
                } else {
                    tracing::debug!(error = %e, "Reconcile target not found");
                }
            }
        }
        result
    }

    /// Push a still-unresolved transaction behind the others in the pending listing.
    pub(crate) async fn record_check(&self, transaction_id: TransactionId) {
        if let Err(e) = self.store.record_check(transaction_id, self.clock.now()).await {
            tracing::warn!(transaction_id = %transaction_id, error = %e, "Failed to record reconcile check");
        }
    }

    async fn reconcile_inner(
        &self,
        transaction_id: TransactionId,
        evidence: Evidence,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;

        if !transaction.is_pending() {
            return Ok(ReconcileOutcome::AlreadyFinal(transaction.status));
        }
        if let Some(reservation_id) = transaction.reservation_id {
            tracing::error!(
                reservation_id = %reservation_id,
                "Integrity drift: pending transaction already linked"
            );
            return Ok(ReconcileOutcome::Drift { reservation_id });
        }

        let gateway = self.gateways.get(transaction.method)?;
        let outcome = match evidence {
            Evidence::Callback(payload) => match verify(gateway.as_ref(), &transaction, &payload) {
                Ok(outcome) => outcome,
                Err(reason) => return Ok(ReconcileOutcome::CallbackRejected { reason }),
            },
            Evidence::Poll => self.poll(gateway.as_ref(), &transaction).await,
        };

        match outcome {
            PaymentOutcome::Success {
                provider_payment_id,
                raw,
            } => self.settle(&transaction, provider_payment_id, raw).await,
            PaymentOutcome::Failure { reason } => self.fail(&transaction, reason, false).await,
            PaymentOutcome::StillPending => {
                let age = transaction.age(self.clock.now());
                if age > self.config.alert_after {
                    ReconcileMetrics::record_alert();
                    tracing::error!(
                        order_id = %transaction.external_order_id,
                        age_hours = age.num_hours(),
                        "Payment still pending past alert ceiling"
                    );
                }
                Ok(ReconcileOutcome::StillPending)
            }
        }
    }

    async fn poll(&self, gateway: &dyn PaymentGateway, transaction: &Transaction) -> PaymentOutcome {
        let order_id = transaction.external_order_id.as_str();
        let timeout = self.config.status_timeout;
        let result = retry_with_predicate(
            &self.config.retry,
            || async move {
                tokio::time::timeout(timeout, gateway.check_status(order_id))
                    .await
                    .unwrap_or(Err(GatewayError::Timeout))
            },
            GatewayError::is_transient,
        )
        .await;

        match result {
            Ok(outcome) => {
                ReconcileMetrics::record_status_check(transaction.method, outcome.label());
                outcome
            }
            Err(e) => {
                ReconcileMetrics::record_status_check(transaction.method, "error");
                tracing::warn!(order_id, error = %e, "Status check failed, leaving pending");
                PaymentOutcome::StillPending
            }
        }
    }

    async fn settle(
        &self,
        transaction: &Transaction,
        provider_payment_id: String,
        raw: serde_json::Value,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let request = SettleRequest {
            transaction_id: transaction.id,
            provider_payment_id,
            raw,
            now: self.clock.now(),
        };

        let settled = retry_with_predicate(
            &self.config.retry,
            || self.store.settle(request.clone()),
            BookingError::is_transient,
        )
        .await;

        match settled {
            Ok(Settlement::Settled(reservation)) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    booking_number = %reservation.booking_number,
                    resource_id = %reservation.resource_id,
                    "Payment settled"
                );
                Ok(ReconcileOutcome::Completed {
                    reservation_id: reservation.id,
                    booking_number: reservation.booking_number,
                })
            }
            Ok(Settlement::AlreadyFinal(status)) => Ok(ReconcileOutcome::AlreadyFinal(status)),
            Ok(Settlement::AlreadyLinked(reservation_id)) => {
                tracing::error!(
                    reservation_id = %reservation_id,
                    "Integrity drift: pending transaction already linked"
                );
                Ok(ReconcileOutcome::Drift { reservation_id })
            }
            Err(e) if e.is_contention() || matches!(e, BookingError::ResourceNotFound(_)) => {
                tracing::warn!(
                    resource_id = %transaction.intent.resource_id,
                    error = %e,
                    "Paid but resource no longer available, refund pending"
                );
                let outcome = self
                    .fail(transaction, reasons::RESOURCE_NO_LONGER_AVAILABLE.to_string(), true)
                    .await?;
                if matches!(outcome, ReconcileOutcome::Failed { .. }) {
                    ReconcileMetrics::record_refund_pending();
                }
                Ok(outcome)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fail(
        &self,
        transaction: &Transaction,
        reason: String,
        refund_pending: bool,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let request = FailRequest {
            transaction_id: transaction.id,
            reason: reason.clone(),
            refund_pending,
            now: self.clock.now(),
        };
        let swapped = retry_with_predicate(
            &self.config.retry,
            || self.store.mark_failed(request.clone()),
            StoreError::is_transient,
        )
        .await?;

        if swapped {
            tracing::info!(reason = %reason, refund_pending, "Transaction failed");
            return Ok(ReconcileOutcome::Failed { reason, refund_pending });
        }

        // Lost the compare-and-swap to a concurrent call
        let status = self
            .store
            .get_transaction(transaction.id)
            .await?
            .map_or(TransactionStatus::Failed, |t| t.status);
        Ok(ReconcileOutcome::AlreadyFinal(status))
    }
}

/// Callback evidence is trusted only when it names this transaction's order and verifies.
fn verify(
    gateway: &dyn PaymentGateway,
    transaction: &Transaction,
    payload: &CallbackPayload,
) -> Result<PaymentOutcome, String> {
    if payload.order_id != transaction.external_order_id {
        tracing::warn!(
            expected = %transaction.external_order_id,
            received = %payload.order_id,
            "Callback order mismatch"
        );
        return Err(reasons::ORDER_MISMATCH.to_string());
    }
    match gateway.verify_callback(payload) {
        PaymentOutcome::Failure { reason } => {
            tracing::warn!(order_id = %payload.order_id, reason = %reason, "Callback rejected");
            Err(reason)
        }
        outcome => Ok(outcome),
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("gateways", &self.gateways)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
