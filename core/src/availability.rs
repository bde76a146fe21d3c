//! Availability checking.
//!
//! The conflict predicate lives here once and is applied by every path that decides
//! whether dates are taken: the advisory [`AvailabilityChecker`], the Postgres writer
//! under its resource row lock, and the in-memory test store.
//!
//! A reservation *blocks* a requested range when all of the following hold:
//!
//! - it is on the same resource and overlaps inclusively
//! - it is not cancelled and is not the excluded reservation
//! - it is `paid`, or it is a `pending/unpaid` hold younger than `hold_grace`

use crate::environment::Clock;
use crate::error::StoreError;
use crate::store::ReservationStore;
use crate::types::{DateRange, PaymentStatus, Reservation, ReservationId, ReservationStatus, ResourceId};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Knobs shared by the checker and the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookingPolicy {
    /// How long an unpaid hold keeps its dates
    pub hold_grace: TimeDelta,
    /// Booking-number attempts before giving up
    pub number_attempts: u32,
}

impl BookingPolicy {
    /// Default hold grace window
    pub const DEFAULT_HOLD_GRACE: TimeDelta = TimeDelta::minutes(15);

    /// Default booking-number attempts
    pub const DEFAULT_NUMBER_ATTEMPTS: u32 = 3;
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_grace: Self::DEFAULT_HOLD_GRACE,
            number_attempts: Self::DEFAULT_NUMBER_ATTEMPTS,
        }
    }
}

/// Whether `existing` blocks `range` at `now`.
#[must_use]
pub fn blocks(existing: &Reservation, range: &DateRange, now: DateTime<Utc>, hold_grace: TimeDelta) -> bool {
    if existing.status == ReservationStatus::Cancelled || !existing.range.overlaps(range) {
        return false;
    }
    existing.payment_status == PaymentStatus::Paid || existing.is_fresh_hold(now, hold_grace)
}

/// First reservation in `candidates` that blocks `range` on `resource_id`.
pub fn find_conflict<'a>(
    candidates: impl IntoIterator<Item = &'a Reservation>,
    resource_id: ResourceId,
    range: &DateRange,
    exclude: Option<ReservationId>,
    now: DateTime<Utc>,
    hold_grace: TimeDelta,
) -> Option<&'a Reservation> {
    candidates.into_iter().find(|r| {
        r.resource_id == resource_id && Some(r.id) != exclude && blocks(r, range, now, hold_grace)
    })
}

/// Advisory availability for client UIs. The writer re-checks under a lock.
pub struct AvailabilityChecker<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl<S: ReservationStore + ?Sized> AvailabilityChecker<S> {
    /// Creates a checker
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self { store, clock, policy }
    }

    /// Whether `range` is free on `resource_id`, ignoring `exclude`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn is_available(
        &self,
        resource_id: ResourceId,
        range: DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<bool, StoreError> {
        let candidates = self.store.overlapping_reservations(resource_id, range).await?;
        let conflict = find_conflict(
            &candidates,
            resource_id,
            &range,
            exclude,
            self.clock.now(),
            self.policy.hold_grace,
        );
        if let Some(existing) = conflict {
            tracing::debug!(
                resource_id = %resource_id,
                blocking = %existing.id,
                range = %range,
                "Range not available"
            );
        }
        Ok(conflict.is_none())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Money, RequesterId};
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, start).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, end).unwrap(),
        )
        .unwrap()
    }

    fn reservation(
        resource_id: ResourceId,
        range: DateRange,
        status: ReservationStatus,
        payment_status: PaymentStatus,
        created_at: DateTime<Utc>,
    ) -> Reservation {
        Reservation {
            id: ReservationId::new(),
            booking_number: "BK-240101-TEST01".to_string(),
            resource_id,
            requester_id: RequesterId::new(),
            range,
            amount: Money::from_rupees(100),
            status,
            payment_status,
            created_at,
            updated_at: created_at,
        }
    }

    const GRACE: TimeDelta = TimeDelta::minutes(15);

    #[test]
    fn test_paid_reservation_blocks_overlap() {
        let resource = ResourceId::new();
        let paid = reservation(resource, range(1, 7), ReservationStatus::Confirmed, PaymentStatus::Paid, now());

        assert!(blocks(&paid, &range(7, 9), now(), GRACE));
        assert!(!blocks(&paid, &range(8, 9), now(), GRACE));
    }

    #[test]
    fn test_hold_blocks_only_within_grace() {
        let resource = ResourceId::new();
        let fresh = reservation(
            resource,
            range(1, 7),
            ReservationStatus::Pending,
            PaymentStatus::Unpaid,
            now() - TimeDelta::minutes(14),
        );
        let stale = reservation(
            resource,
            range(1, 7),
            ReservationStatus::Pending,
            PaymentStatus::Unpaid,
            now() - TimeDelta::minutes(15),
        );

        assert!(blocks(&fresh, &range(3, 4), now(), GRACE));
        assert!(!blocks(&stale, &range(3, 4), now(), GRACE));
    }

    #[test]
    fn test_cancelled_never_blocks() {
        let resource = ResourceId::new();
        let cancelled = reservation(resource, range(1, 7), ReservationStatus::Cancelled, PaymentStatus::Paid, now());

        assert!(!blocks(&cancelled, &range(1, 7), now(), GRACE));
    }

    #[test]
    fn test_find_conflict_honours_exclusion_and_resource() {
        let resource = ResourceId::new();
        let mine = reservation(resource, range(1, 7), ReservationStatus::Confirmed, PaymentStatus::Paid, now());
        let elsewhere = reservation(ResourceId::new(), range(1, 7), ReservationStatus::Confirmed, PaymentStatus::Paid, now());
        let rows = vec![mine.clone(), elsewhere];

        assert!(find_conflict(&rows, resource, &range(2, 3), Some(mine.id), now(), GRACE).is_none());
        assert_eq!(
            find_conflict(&rows, resource, &range(2, 3), None, now(), GRACE).map(|r| r.id),
            Some(mine.id)
        );
    }
}
