//! Liveness endpoint.
//!
//! Used by load balancers and process supervisors. Does not touch the database or any
//! provider.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use studyhall_core::types::PaymentMethod;

use crate::state::AppState;

/// Liveness body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok`
    pub status: &'static str,
    /// Providers accepting new orders
    pub providers: Vec<PaymentMethod>,
}

/// `GET /health`
#[allow(clippy::unused_async)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let providers = state.bookings.gateways().enabled(state.toggles);
    (StatusCode::OK, Json(HealthResponse { status: "ok", providers }))
}
