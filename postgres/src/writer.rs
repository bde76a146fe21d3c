//! The reservation writer.
//!
//! Every reservation row is written here, inside a database transaction that holds the
//! resource row lock:
//!
//! ```text
//! BEGIN
//!   SELECT ... FROM resources WHERE id = $1 FOR UPDATE     -- (1) lock, require active
//!   SELECT ... FROM reservations WHERE overlapping         -- (2) conflict predicate
//!   INSERT INTO reservations ... | UPDATE hold ...         -- (3) unique booking number
//!   UPDATE resources SET is_available = FALSE              -- (4) availability hint
//! COMMIT
//! ```
//!
//! A booking-number collision aborts the database transaction; the whole unit is retried
//! with a fresh number up to `BookingPolicy::number_attempts` times.

use crate::error::{BOOKING_NUMBER_KEY, is_exclusion_violation, is_unique_violation, store_error};
use crate::rows::{RESERVATION_COLUMNS, RESOURCE_COLUMNS, money_to_db, reservation_from_row, resource_from_row};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgConnection, PgExecutor};
use studyhall_core::availability::find_conflict;
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::types::{
    DateRange, Money, PaymentStatus, RequesterId, Reservation, ReservationId, ReservationStatus, Resource,
    ResourceId,
};

/// Outcome of one attempt inside the booking-number retry loop
pub(crate) enum Attempt<T> {
    /// The unit of work committed
    Done(T),
    /// The candidate booking number was already taken
    NumberTaken,
}

/// Fields of a reservation row about to be inserted
pub(crate) struct NewReservation<'a> {
    pub resource_id: ResourceId,
    pub requester_id: RequesterId,
    pub range: DateRange,
    pub amount: Money,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub booking_number: &'a str,
    pub now: DateTime<Utc>,
}

/// Step (1): lock the resource row and require it to be bookable.
pub(crate) async fn lock_bookable_resource(
    conn: &mut PgConnection,
    resource_id: ResourceId,
) -> Result<Resource, BookingError> {
    let row = sqlx::query(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1 FOR UPDATE"
    ))
    .bind(resource_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| store_error("Failed to lock resource", &e))?
    .ok_or(BookingError::ResourceNotFound(resource_id))?;

    let resource = resource_from_row(&row)?;
    if !resource.status.is_bookable() {
        return Err(BookingError::ResourceUnavailable(resource_id));
    }
    Ok(resource)
}

/// Non-cancelled reservations on `resource_id` overlapping `range`, inclusive.
pub(crate) async fn fetch_overlapping<'c>(
    executor: impl PgExecutor<'c>,
    resource_id: ResourceId,
    range: DateRange,
) -> Result<Vec<Reservation>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations \
         WHERE resource_id = $1 AND status <> 'cancelled' \
           AND start_date <= $3 AND $2 <= end_date \
         ORDER BY start_date ASC"
    ))
    .bind(resource_id.as_uuid())
    .bind(range.start())
    .bind(range.end())
    .fetch_all(executor)
    .await
    .map_err(|e| store_error("Failed to load overlapping reservations", &e))?;

    rows.iter().map(reservation_from_row).collect()
}

/// Step (2): apply the conflict predicate to rows read under the lock.
pub(crate) fn ensure_no_conflict(
    candidates: &[Reservation],
    resource_id: ResourceId,
    range: &DateRange,
    exclude: Option<ReservationId>,
    now: DateTime<Utc>,
    hold_grace: TimeDelta,
) -> Result<(), BookingError> {
    match find_conflict(candidates, resource_id, range, exclude, now, hold_grace) {
        Some(existing) => {
            tracing::info!(
                resource_id = %resource_id,
                blocking = %existing.id,
                range = %range,
                "Date conflict under resource lock"
            );
            Err(BookingError::DateConflict { resource_id })
        }
        None => Ok(()),
    }
}

/// Step (3): insert the row.
pub(crate) async fn insert_reservation(
    conn: &mut PgConnection,
    new: &NewReservation<'_>,
) -> Result<Attempt<Reservation>, BookingError> {
    let result = sqlx::query(&format!(
        "INSERT INTO reservations \
             (id, booking_number, resource_id, requester_id, start_date, end_date, \
              amount_paise, status, payment_status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
         RETURNING {RESERVATION_COLUMNS}"
    ))
    .bind(ReservationId::new().as_uuid())
    .bind(new.booking_number)
    .bind(new.resource_id.as_uuid())
    .bind(new.requester_id.as_uuid())
    .bind(new.range.start())
    .bind(new.range.end())
    .bind(money_to_db(new.amount)?)
    .bind(new.status.as_str())
    .bind(new.payment_status.as_str())
    .bind(new.now)
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(row) => Ok(Attempt::Done(reservation_from_row(&row)?)),
        Err(e) if is_unique_violation(&e, BOOKING_NUMBER_KEY) => {
            tracing::warn!(booking_number = new.booking_number, "Booking number collision");
            metrics::counter!("booking_number_collisions_total").increment(1);
            Ok(Attempt::NumberTaken)
        }
        Err(e) => Err(write_error("Failed to insert reservation", new.resource_id, &e)),
    }
}

/// Step (3), converting the intent's own hold instead of inserting.
pub(crate) async fn mark_hold_paid(
    conn: &mut PgConnection,
    hold: &Reservation,
    status: ReservationStatus,
    now: DateTime<Utc>,
) -> Result<Reservation, BookingError> {
    let row = sqlx::query(&format!(
        "UPDATE reservations \
         SET status = $2, payment_status = 'paid', updated_at = $3 \
         WHERE id = $1 AND status = 'pending' AND payment_status = 'unpaid' \
         RETURNING {RESERVATION_COLUMNS}"
    ))
    .bind(hold.id.as_uuid())
    .bind(status.as_str())
    .bind(now)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| write_error("Failed to convert hold", hold.resource_id, &e))?
    .ok_or_else(|| StoreError::Integrity(format!("hold {} changed under resource lock", hold.id)))?;

    Ok(reservation_from_row(&row)?)
}

/// Step (4): clear the availability hint.
pub(crate) async fn clear_availability_hint(
    conn: &mut PgConnection,
    resource_id: ResourceId,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE resources SET is_available = FALSE, updated_at = $2 WHERE id = $1")
        .bind(resource_id.as_uuid())
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to update availability hint", &e))?;
    Ok(())
}

/// The exclusion constraint is the last line of defence for paid overlaps.
fn write_error(context: &str, resource_id: ResourceId, error: &sqlx::Error) -> BookingError {
    if is_exclusion_violation(error) {
        tracing::warn!(resource_id = %resource_id, "Paid overlap rejected by exclusion constraint");
        return BookingError::DateConflict { resource_id };
    }
    BookingError::Store(store_error(context, error))
}
