//! Quotes and availability.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use studyhall_core::pricing::PricingTier;
use studyhall_core::types::{DateRange, Money, ReservationId, ResourceId};

use crate::{WebResult, state::AppState};

/// `POST /api/v1/quotes` body
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    /// Resource to price
    pub resource_id: ResourceId,
    /// First day
    pub start_date: NaiveDate,
    /// Last day, inclusive
    pub end_date: NaiveDate,
}

/// Priced range. Amounts are in paise.
#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    /// Total to charge
    pub amount: Money,
    /// Tier that produced the amount
    pub tier_used: PricingTier,
    /// Price of one unit of that tier
    pub unit_price: Money,
    /// Booked days
    pub days: u32,
    /// Units billed
    pub units: u32,
}

/// `POST /api/v1/quotes`
///
/// # Errors
///
/// 422 for an inverted range or no usable tier, 404 for an unknown resource.
pub async fn create_quote(State(state): State<AppState>, Json(request): Json<QuoteRequest>) -> WebResult<Json<QuoteResponse>> {
    let range = DateRange::new(request.start_date, request.end_date)?;
    let quote = state.bookings.quote(request.resource_id, range).await?;

    Ok(Json(QuoteResponse {
        amount: quote.amount,
        tier_used: quote.tier,
        unit_price: quote.unit_price,
        days: quote.days,
        units: quote.units,
    }))
}

/// `GET /api/v1/resources/{id}/availability` query
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// First day
    pub start_date: NaiveDate,
    /// Last day, inclusive
    pub end_date: NaiveDate,
    /// Reservation to ignore, e.g. the caller's own hold
    pub exclude_reservation_id: Option<ReservationId>,
}

/// Advisory availability
#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    /// No blocking reservation overlaps the range
    pub available: bool,
}

/// `GET /api/v1/resources/{id}/availability`
///
/// # Errors
///
/// 422 for an inverted range, 503 when storage is unavailable.
pub async fn check_availability(
    State(state): State<AppState>,
    Path(resource_id): Path<ResourceId>,
    Query(query): Query<AvailabilityQuery>,
) -> WebResult<Json<AvailabilityResponse>> {
    let range = DateRange::new(query.start_date, query.end_date)?;
    let available = state
        .bookings
        .check_availability(resource_id, range, query.exclude_reservation_id)
        .await?;
    Ok(Json(AvailabilityResponse { available }))
}
