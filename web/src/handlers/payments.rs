//! Payment orders and the three ways a payment reaches the reconciliation engine from
//! HTTP: provider callback, client poll and operator recovery.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use studyhall_core::payment::CallbackPayload;
use studyhall_core::types::{
    BookingIntent, DateRange, Money, PaymentMethod, RequesterId, ReservationId, ResourceId, TransactionId,
    TransactionStatus,
};
use studyhall_runtime::{Evidence, OrderRequest, ReconcileOutcome, Trigger};

use crate::{AppError, WebResult, state::AppState};

/// What to book once paid
#[derive(Debug, Deserialize)]
pub struct IntentBody {
    /// Resource to book
    pub resource_id: ResourceId,
    /// Who is paying
    pub requester_id: RequesterId,
    /// First day
    pub start_date: NaiveDate,
    /// Last day, inclusive
    pub end_date: NaiveDate,
    /// Hold from `POST /api/v1/bookings`, if any
    #[serde(default)]
    pub hold_id: Option<ReservationId>,
}

/// `POST /api/v1/payments/orders` body
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Booking intent
    pub intent: IntentBody,
    /// Provider to pay with
    pub method: PaymentMethod,
    /// Amount shown to the user, in paise. Must equal the server quote when present.
    #[serde(default)]
    pub amount: Option<Money>,
}

/// Created order
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// Pending transaction
    pub transaction_id: TransactionId,
    /// Provider order id
    pub provider_order_id: String,
    /// Checkout key or QR payload
    pub provider_public_key: String,
    /// Server-quoted amount in paise
    pub amount: Money,
}

/// `POST /api/v1/payments/orders`
///
/// # Errors
///
/// 422 for a disabled or unconfigured provider, pricing errors or an amount mismatch;
/// 409 when the dates are already taken; 502/503 when the provider fails.
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> WebResult<(StatusCode, Json<OrderResponse>)> {
    let body = request.intent;
    let intent = BookingIntent {
        resource_id: body.resource_id,
        requester_id: body.requester_id,
        range: DateRange::new(body.start_date, body.end_date)?,
        hold_id: body.hold_id,
    };
    let order = state
        .bookings
        .create_payment_order(
            OrderRequest {
                intent,
                method: request.method,
                amount: request.amount,
            },
            state.toggles,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            transaction_id: order.transaction.id,
            provider_order_id: order.transaction.external_order_id,
            provider_public_key: order.provider_public_key,
            amount: order.transaction.amount,
        }),
    ))
}

/// Result of one reconcile call
#[derive(Debug, Serialize)]
pub struct ReconcileView {
    /// Reconciled transaction
    pub transaction_id: TransactionId,
    /// `completed`, `failed`, `still_pending`, `already_final`
    pub outcome: &'static str,
    /// Final status when already settled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    /// Paid reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
    /// Its booking number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_number: Option<String>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Paid but unbookable
    pub refund_pending: bool,
}

impl ReconcileView {
    /// Render an outcome. Rejected callbacks answer 401, drift answers 500.
    ///
    /// # Errors
    ///
    /// Returns the [`AppError`] for outcomes that are not a verdict on the payment.
    pub fn from_outcome(transaction_id: TransactionId, outcome: ReconcileOutcome) -> WebResult<Self> {
        let mut view = Self {
            transaction_id,
            outcome: outcome.label(),
            status: None,
            reservation_id: None,
            booking_number: None,
            reason: None,
            refund_pending: false,
        };
        match outcome {
            ReconcileOutcome::AlreadyFinal(status) => view.status = Some(status),
            ReconcileOutcome::Completed {
                reservation_id,
                booking_number,
            } => {
                view.reservation_id = Some(reservation_id);
                view.booking_number = Some(booking_number);
            }
            ReconcileOutcome::Failed { reason, refund_pending } => {
                view.reason = Some(reason);
                view.refund_pending = refund_pending;
            }
            ReconcileOutcome::StillPending => {}
            ReconcileOutcome::CallbackRejected { reason } => {
                return Err(AppError::unauthorized(
                    "CALLBACK_REJECTED",
                    format!("Callback rejected: {reason}"),
                ));
            }
            ReconcileOutcome::Drift { reservation_id } => {
                return Err(AppError::internal(
                    "INTEGRITY_DRIFT",
                    format!("Pending transaction {transaction_id} is linked to reservation {reservation_id}"),
                ));
            }
        }
        Ok(view)
    }
}

/// `POST /api/v1/payments/callback`
///
/// # Errors
///
/// 401 when the signature does not verify, 404 for an unknown order.
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<CallbackPayload>,
) -> WebResult<Json<ReconcileView>> {
    let (transaction_id, outcome) = state.engine.on_callback(payload).await?;
    if let ReconcileOutcome::CallbackRejected { reason } = &outcome {
        tracing::warn!(transaction_id = %transaction_id, reason = %reason, "Rejected payment callback");
    }
    ReconcileView::from_outcome(transaction_id, outcome).map(Json)
}

/// `POST /api/v1/payments/{transaction_id}/poll`
///
/// # Errors
///
/// 404 for an unknown transaction, 503 when storage is unavailable.
pub async fn poll_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
) -> WebResult<Json<ReconcileView>> {
    let outcome = state
        .engine
        .reconcile(transaction_id, Evidence::Poll, Trigger::ClientPoll)
        .await?;
    ReconcileView::from_outcome(transaction_id, outcome).map(Json)
}
