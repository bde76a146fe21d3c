//! Transaction lookup.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use studyhall_core::types::{Money, PaymentMethod, ReservationId, Transaction, TransactionId, TransactionStatus};

use crate::{AppError, WebResult, state::AppState};

/// Client view of a transaction. Provider payloads stay server-side.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    /// Transaction ID
    pub id: TransactionId,
    /// Reconciliation status
    pub status: TransactionStatus,
    /// Amount in paise
    pub amount: Money,
    /// Provider family
    pub method: PaymentMethod,
    /// Provider order id
    pub order_id: String,
    /// Paid reservation, once completed
    pub reservation_id: Option<ReservationId>,
    /// Reason when failed
    pub failure_reason: Option<String>,
    /// Paid but unbookable
    pub refund_pending: bool,
    /// Order creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            status: tx.status,
            amount: tx.amount,
            method: tx.method,
            order_id: tx.external_order_id,
            reservation_id: tx.reservation_id,
            failure_reason: tx.failure_reason,
            refund_pending: tx.refund_pending,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// `GET /api/v1/transactions/{id}`
///
/// # Errors
///
/// 404 when no such transaction exists.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
) -> WebResult<Json<TransactionView>> {
    let transaction = state
        .engine
        .store()
        .get_transaction(id)
        .await?
        .ok_or_else(|| AppError::not_found("TRANSACTION_NOT_FOUND", format!("Transaction not found: {id}")))?;
    Ok(Json(transaction.into()))
}
