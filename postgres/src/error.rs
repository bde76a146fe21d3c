//! Mapping from `sqlx` errors to the core error taxonomy.

use studyhall_core::error::StoreError;

/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";
/// `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";
/// `exclusion_violation`
const EXCLUSION_VIOLATION: &str = "23P01";

/// Unique constraint on `reservations.booking_number`
pub(crate) const BOOKING_NUMBER_KEY: &str = "reservations_booking_number_key";

/// Convert a `sqlx` error, keeping transient failures retryable.
pub(crate) fn store_error(context: &str, error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                StoreError::Transient(format!("{context}: {db}"))
            }
            _ => StoreError::Database(format!("{context}: {db}")),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Transient(format!("{context}: {error}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("{context}: {error}"))
        }
        _ => StoreError::Database(format!("{context}: {error}")),
    }
}

/// Whether `error` is a unique violation of `constraint`
pub(crate) fn is_unique_violation(error: &sqlx::Error, constraint: &str) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db)
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) && db.constraint() == Some(constraint)
    )
}

/// Whether `error` is the paid-overlap exclusion constraint firing
pub(crate) fn is_exclusion_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(EXCLUSION_VIOLATION)
    )
}
