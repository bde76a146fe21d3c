//! Periodic sweep of stale pending transactions.
//!
//! Each pass lists pending transactions older than `stale_after` and reconciles them
//! with bounded parallelism. Calls are independent: one failing transaction never stops
//! the rest of the batch. A transaction the pass could not resolve is recorded as
//! checked, so the next pass starts with ones it has not looked at yet.

use crate::metrics::ReconcileMetrics;
use crate::reconcile::{Evidence, ReconcileError, ReconcileOutcome, ReconciliationEngine, Trigger};
use chrono::TimeDelta;
use futures::StreamExt;
use std::time::{Duration, Instant};
use studyhall_core::types::Transaction;
use tokio::sync::watch;

/// Sweep tuning.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    /// Time between passes
    pub interval: Duration,
    /// Only transactions older than this are swept
    pub stale_after: TimeDelta,
    /// Maximum transactions per pass
    pub batch_size: usize,
    /// Concurrent reconcile calls
    pub concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: TimeDelta::minutes(5),
            batch_size: 100,
            concurrency: 8,
        }
    }
}

/// Tally of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Transactions examined
    pub examined: usize,
    /// Settled into reservations
    pub completed: usize,
    /// Marked failed
    pub failed: usize,
    /// Of `failed`, how many need a refund
    pub refunds_pending: usize,
    /// Left pending
    pub still_pending: usize,
    /// Finished by someone else first
    pub already_final: usize,
    /// Integrity drift found
    pub drift: usize,
    /// Reconcile calls that errored
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, result: &Result<ReconcileOutcome, ReconcileError>) {
        self.examined += 1;
        match result {
            Ok(ReconcileOutcome::Completed { .. }) => self.completed += 1,
            Ok(ReconcileOutcome::Failed { refund_pending, .. }) => {
                self.failed += 1;
                if *refund_pending {
                    self.refunds_pending += 1;
                }
            }
            Ok(ReconcileOutcome::StillPending | ReconcileOutcome::CallbackRejected { .. }) => {
                self.still_pending += 1;
            }
            Ok(ReconcileOutcome::AlreadyFinal(_)) => self.already_final += 1,
            Ok(ReconcileOutcome::Drift { .. }) => self.drift += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Whether the transaction is still pending after this result
const fn left_pending(result: &Result<ReconcileOutcome, ReconcileError>) -> bool {
    matches!(
        result,
        Ok(ReconcileOutcome::StillPending | ReconcileOutcome::CallbackRejected { .. } | ReconcileOutcome::Drift { .. })
            | Err(_)
    )
}

/// Poll-reconcile `transactions` with at most `concurrency` calls in flight.
pub(crate) async fn reconcile_batch(
    engine: &ReconciliationEngine,
    transactions: Vec<Transaction>,
    concurrency: usize,
    trigger: Trigger,
) -> SweepReport {
    futures::stream::iter(transactions)
        .map(|transaction| async move {
            let result = engine.reconcile(transaction.id, Evidence::Poll, trigger).await;
            if left_pending(&result) {
                engine.record_check(transaction.id).await;
            }
            result
        })
        .buffer_unordered(concurrency.max(1))
        .fold(SweepReport::default(), |mut report, result| async move {
            report.record(&result);
            report
        })
        .await
}

/// Background sweeper.
#[derive(Debug, Clone)]
pub struct Sweeper {
    engine: ReconciliationEngine,
    config: SweepConfig,
}

impl Sweeper {
    /// Creates a sweeper
    #[must_use]
    pub const fn new(engine: ReconciliationEngine, config: SweepConfig) -> Self {
        Self { engine, config }
    }

    /// One pass over stale pending transactions.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending list cannot be loaded.
    pub async fn run_once(&self) -> Result<SweepReport, ReconcileError> {
        let started = Instant::now();
        let cutoff = self.engine.now() - self.config.stale_after;
        let stale = self
            .engine
            .store()
            .list_pending_before(cutoff, self.config.batch_size)
            .await?;

        let report = reconcile_batch(&self.engine, stale, self.config.concurrency, Trigger::Sweep).await;
        ReconcileMetrics::record_sweep(started.elapsed());
        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                completed = report.completed,
                failed = report.failed,
                still_pending = report.still_pending,
                errors = report.errors,
                "Sweep pass finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.num_seconds(),
            batch_size = self.config.batch_size,
            "Starting sweeper"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Sweep pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Sweeper stopped");
    }
}
