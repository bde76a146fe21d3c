//! Operator recovery endpoints.
//!
//! Both endpoints poll the provider through the same engine the sweeper uses, so
//! calling them on settled transactions is harmless.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use studyhall_core::types::TransactionId;
use studyhall_runtime::SweepReport;

use super::payments::ReconcileView;
use crate::{WebResult, state::AppState};

/// `POST /api/v1/admin/transactions/{id}/reconcile`
///
/// # Errors
///
/// 404 for an unknown transaction, 500 on integrity drift.
pub async fn reconcile_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
) -> WebResult<Json<ReconcileView>> {
    let outcome = state.recovery.recover(transaction_id).await?;
    ReconcileView::from_outcome(transaction_id, outcome).map(Json)
}

/// Optional cap for one recovery call
#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    /// At most this many, bounded by the server's recovery limit
    pub limit: Option<usize>,
}

/// Tally of a recovery batch
#[derive(Debug, Serialize)]
pub struct RecoveryReport {
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

impl From<SweepReport> for RecoveryReport {
    fn from(report: SweepReport) -> Self {
        Self {
            examined: report.examined,
            completed: report.completed,
            failed: report.failed,
            refunds_pending: report.refunds_pending,
            still_pending: report.still_pending,
            already_final: report.already_final,
            drift: report.drift,
            errors: report.errors,
        }
    }
}

/// `POST /api/v1/admin/transactions/reconcile-pending`
///
/// # Errors
///
/// 503 when the pending list cannot be loaded.
pub async fn reconcile_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> WebResult<Json<RecoveryReport>> {
    let limit = query
        .limit
        .map_or(state.recovery_limit, |limit| limit.min(state.recovery_limit));
    let report = state.recovery.recover_all_pending(limit).await?;
    Ok(Json(report.into()))
}
