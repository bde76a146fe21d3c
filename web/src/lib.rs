//! HTTP surface for Studyhall.
//!
//! Handlers are thin: they parse the request, call the booking service or the
//! reconciliation engine, and map the result. Domain errors convert into
//! [`AppError`] with a stable `code`.
//!
//! # Routes
//!
//! ```text
//! POST /api/v1/quotes
//! GET  /api/v1/resources/:id/availability
//! POST /api/v1/bookings
//! POST /api/v1/payments/orders
//! POST /api/v1/payments/callback
//! POST /api/v1/payments/:transaction_id/poll
//! GET  /api/v1/transactions/:id
//! POST /api/v1/admin/transactions/:id/reconcile
//! POST /api/v1/admin/transactions/reconcile-pending
//! GET  /health
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/quotes", post(handlers::quotes::create_quote))
        .route(
            "/resources/:id/availability",
            get(handlers::quotes::check_availability),
        )
        .route("/bookings", post(handlers::bookings::create_booking))
        .route("/payments/orders", post(handlers::payments::create_order))
        .route("/payments/callback", post(handlers::payments::payment_callback))
        .route("/payments/:transaction_id/poll", post(handlers::payments::poll_payment))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/admin/transactions/reconcile-pending",
            post(handlers::admin::reconcile_pending),
        )
        .route(
            "/admin/transactions/:id/reconcile",
            post(handlers::admin::reconcile_transaction),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(correlation_id))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}
