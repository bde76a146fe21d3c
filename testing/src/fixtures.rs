//! Test data builders.

#![allow(clippy::expect_used)]
#![allow(clippy::missing_panics_doc)]

use chrono::NaiveDate;
use studyhall_core::pricing::PriceTable;
use studyhall_core::types::{
    BookingIntent, DateRange, Money, RequesterId, Resource, ResourceId, ResourceKind, ResourceStatus, VenueId,
};

/// Date from `YYYY-MM-DD`
#[must_use]
pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("fixture date should parse")
}

/// Inclusive range from two `YYYY-MM-DD` strings
#[must_use]
pub fn range(start: &str, end: &str) -> DateRange {
    DateRange::new(date(start), date(end)).expect("fixture range should be ordered")
}

/// The week used across scenarios: 2024-01-01..=2024-01-07
#[must_use]
pub fn first_week() -> DateRange {
    range("2024-01-01", "2024-01-07")
}

/// Daily ₹100 and weekly ₹500
#[must_use]
pub const fn weekly_table() -> PriceTable {
    PriceTable::new()
        .with_daily(Money::from_rupees(100))
        .with_weekly(Money::from_rupees(500))
}

/// Active resource of `kind`
#[must_use]
pub fn resource(kind: ResourceKind, price_table: PriceTable) -> Resource {
    Resource {
        id: ResourceId::new(),
        venue_id: VenueId::new(),
        kind,
        label: match kind {
            ResourceKind::Seat => "S-01".to_string(),
            ResourceKind::Cabin => "C-01".to_string(),
        },
        status: ResourceStatus::Active,
        is_available: true,
        price_table,
    }
}

/// Active seat
#[must_use]
pub fn seat(price_table: PriceTable) -> Resource {
    resource(ResourceKind::Seat, price_table)
}

/// Active cabin
#[must_use]
pub fn cabin(price_table: PriceTable) -> Resource {
    resource(ResourceKind::Cabin, price_table)
}

/// Intent for a fresh requester without a hold
#[must_use]
pub fn intent(resource_id: ResourceId, range: DateRange) -> BookingIntent {
    BookingIntent {
        resource_id,
        requester_id: RequesterId::new(),
        range,
        hold_id: None,
    }
}
