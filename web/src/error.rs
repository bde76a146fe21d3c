//! Error types for web handlers.
//!
//! Domain errors convert into [`AppError`] with a stable machine-readable code, so
//! handlers can use `?` directly on service calls.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::payment::GatewayError;
use studyhall_runtime::{OrderError, ReconcileError};

/// Application error type for web handlers.
///
/// Renders as `{"code": ..., "message": ...}`. Server errors are logged with their
/// source; the source is never sent to the client.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    /// 502 Bad Gateway
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "GATEWAY_ERROR", message)
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("INTERNAL_SERVER_ERROR", "An internal error occurred").with_source(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::unavailable("STORAGE_UNAVAILABLE", "Storage is temporarily unavailable").with_source(err)
        } else {
            Self::internal("INTERNAL_SERVER_ERROR", "An internal error occurred").with_source(err)
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let message = err.to_string();
        match err {
            BookingError::InvalidDateRange(_) => Self::validation("INVALID_DATE_RANGE", message),
            BookingError::NoPricingAvailable => Self::validation("NO_PRICING_AVAILABLE", message),
            BookingError::ResourceNotFound(_) => Self::not_found("RESOURCE_NOT_FOUND", message),
            BookingError::ResourceUnavailable(_) => Self::conflict("RESOURCE_UNAVAILABLE", message),
            BookingError::DateConflict { .. } => Self::conflict("DATE_CONFLICT", message),
            BookingError::NumberGenerationFailed { .. } => {
                Self::internal("BOOKING_NUMBER_EXHAUSTED", message).with_source(err)
            }
            BookingError::Store(store) => store.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let message = err.to_string();
        match err {
            GatewayError::NotConfigured(_) => Self::validation("PROVIDER_NOT_CONFIGURED", message),
            GatewayError::Disabled(_) => Self::validation("PROVIDER_DISABLED", message),
            _ if err.is_transient() => {
                Self::unavailable("GATEWAY_UNAVAILABLE", "Payment provider is temporarily unavailable")
                    .with_source(err)
            }
            _ => Self::bad_gateway("Payment provider refused the request").with_source(err),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Booking(e) => e.into(),
            OrderError::AmountMismatch { .. } => Self::validation("AMOUNT_MISMATCH", err.to_string()),
            OrderError::Gateway(e) => e.into(),
            OrderError::Store(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        let message = err.to_string();
        match err {
            ReconcileError::TransactionNotFound(_) => Self::not_found("TRANSACTION_NOT_FOUND", message),
            ReconcileError::UnknownOrder(_) => Self::not_found("UNKNOWN_ORDER", message),
            ReconcileError::Gateway(e) => e.into(),
            ReconcileError::Store(e) => e.into(),
            ReconcileError::Booking(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyhall_core::types::{PaymentMethod, ResourceId};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_validation_errors_are_422() {
        let err = AppError::from(BookingError::NoPricingAvailable);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "NO_PRICING_AVAILABLE");

        let err = AppError::from(BookingError::InvalidDateRange("end before start".into()));
        assert_eq!(err.code(), "INVALID_DATE_RANGE");
    }

    #[test]
    fn test_contention_is_409() {
        let id = ResourceId::new();
        let err = AppError::from(BookingError::DateConflict { resource_id: id });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "DATE_CONFLICT");

        let err = AppError::from(BookingError::ResourceUnavailable(id));
        assert_eq!(err.code(), "RESOURCE_UNAVAILABLE");
    }

    #[test]
    fn test_transient_failures_are_503() {
        let err = AppError::from(BookingError::Store(StoreError::Transient("pool timed out".into())));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = AppError::from(GatewayError::Timeout);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_integrity_failures_are_500() {
        let err = AppError::from(BookingError::NumberGenerationFailed { attempts: 5 });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(std::error::Error::source(&err).is_some());

        let err = AppError::from(StoreError::Integrity("two rows".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_disabled_provider_is_validation() {
        let err = AppError::from(OrderError::Gateway(GatewayError::Disabled(PaymentMethod::Qr)));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "PROVIDER_DISABLED");
    }

    #[test]
    fn test_provider_refusal_is_502() {
        let err = AppError::from(GatewayError::Unauthorized);
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
