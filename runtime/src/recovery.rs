//! Operator-driven recovery.
//!
//! Same engine as callbacks and the sweeper, without the sweeper's age filter.

use crate::reconcile::{Evidence, ReconcileError, ReconcileOutcome, ReconciliationEngine, Trigger};
use crate::sweep::{SweepReport, reconcile_batch};
use chrono::TimeDelta;
use studyhall_core::types::TransactionId;

/// Manual recovery entry points.
#[derive(Debug, Clone)]
pub struct Recovery {
    engine: ReconciliationEngine,
    concurrency: usize,
}

impl Recovery {
    /// Recovery with at most `concurrency` reconcile calls in flight
    #[must_use]
    pub const fn new(engine: ReconciliationEngine, concurrency: usize) -> Self {
        Self { engine, concurrency }
    }

    /// Poll-reconcile one transaction.
    ///
    /// # Errors
    ///
    /// As [`ReconciliationEngine::reconcile`].
    pub async fn recover(&self, transaction_id: TransactionId) -> Result<ReconcileOutcome, ReconcileError> {
        tracing::info!(transaction_id = %transaction_id, "Manual recovery requested");
        self.engine.reconcile(transaction_id, Evidence::Poll, Trigger::Manual).await
    }

    /// Poll-reconcile up to `limit` pending transactions regardless of age.
    ///
    /// Uses the sweep's listing order, so repeated calls work through every pending
    /// transaction even when the oldest never resolve.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending list cannot be loaded.
    pub async fn recover_all_pending(&self, limit: usize) -> Result<SweepReport, ReconcileError> {
        // One minute ahead so rows inserted during this call are included
        let cutoff = self.engine.now() + TimeDelta::minutes(1);
        let pending = self.engine.store().list_pending_before(cutoff, limit).await?;
        tracing::info!(count = pending.len(), "Recovering all pending transactions");
        Ok(reconcile_batch(&self.engine, pending, self.concurrency, Trigger::Manual).await)
    }
}
