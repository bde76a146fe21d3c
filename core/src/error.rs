//! Error types shared across the booking core.

use crate::pricing::PricingError;
use crate::types::ResourceId;
use thiserror::Error;

/// Errors raised while creating or converting a reservation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The requested range is malformed (end before start)
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// No enabled, priced tier covers the range
    #[error("No pricing available for the requested range")]
    NoPricingAvailable,

    /// The resource does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// The resource is not in a bookable state
    #[error("Resource {0} is not available for booking")]
    ResourceUnavailable(ResourceId),

    /// A blocking reservation overlaps the requested range
    #[error("Requested dates conflict with an existing reservation on resource {resource_id}")]
    DateConflict {
        /// The contested resource
        resource_id: ResourceId,
    },

    /// Every booking number candidate collided
    #[error("Could not generate a unique booking number after {attempts} attempts")]
    NumberGenerationFailed {
        /// Attempts made
        attempts: u32,
    },

    /// Storage failure underneath the writer
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Contention errors: the resource or dates were taken by someone else
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::DateConflict { .. } | Self::ResourceUnavailable(_))
    }

    /// Only storage transients are worth retrying
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

impl From<PricingError> for BookingError {
    fn from(error: PricingError) -> Self {
        match error {
            PricingError::NoPricingAvailable => Self::NoPricingAvailable,
        }
    }
}

/// Errors from the storage seams.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization failure, deadlock or lost connection; retrying may succeed
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Any other database error
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored state violates a domain invariant
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

impl StoreError {
    /// Whether the failed unit of work may be retried as a whole
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
