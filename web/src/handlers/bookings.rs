//! Holds.

use axum::{Json, extract::State, http::StatusCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use studyhall_core::types::{
    BookingIntent, DateRange, Money, PaymentStatus, RequesterId, ReservationId, ReservationStatus, ResourceId,
};

use crate::{WebResult, state::AppState};

/// `POST /api/v1/bookings` body
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Resource to hold
    pub resource_id: ResourceId,
    /// Who is booking
    pub requester_id: RequesterId,
    /// First day
    pub start_date: NaiveDate,
    /// Last day, inclusive
    pub end_date: NaiveDate,
}

/// A freshly written hold
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    /// Hold ID, passed back as `hold_id` when ordering payment
    pub reservation_id: ReservationId,
    /// Human-readable booking number
    pub booking_number: String,
    /// Quoted amount in paise
    pub amount: Money,
    /// Always `pending`
    pub status: ReservationStatus,
    /// Always `unpaid`
    pub payment_status: PaymentStatus,
}

/// `POST /api/v1/bookings`
///
/// # Errors
///
/// 409 `DATE_CONFLICT` or `RESOURCE_UNAVAILABLE` when the writer refuses the hold,
/// 422 for pricing or range errors.
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> WebResult<(StatusCode, Json<BookingResponse>)> {
    let intent = BookingIntent {
        resource_id: request.resource_id,
        requester_id: request.requester_id,
        range: DateRange::new(request.start_date, request.end_date)?,
        hold_id: None,
    };
    let reservation = state.bookings.create_booking(intent).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingResponse {
            reservation_id: reservation.id,
            booking_number: reservation.booking_number,
            amount: reservation.amount,
            status: reservation.status,
            payment_status: reservation.payment_status,
        }),
    ))
}
