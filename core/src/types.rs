//! Domain types for the booking core.
//!
//! Value objects (ids, [`Money`], [`DateRange`]) and the three persisted entities:
//! [`Resource`], [`Reservation`] and [`Transaction`].

use crate::error::{BookingError, StoreError};
use crate::pricing::PriceTable;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a venue (study hall) owning resources
    VenueId
);
uuid_id!(
    /// Unique identifier for a bookable seat or cabin
    ResourceId
);
uuid_id!(
    /// Unique identifier for a reservation row
    ReservationId
);
uuid_id!(
    /// Unique identifier for the person requesting a booking
    RequesterId
);
uuid_id!(
    /// Unique identifier for a payment transaction
    TransactionId
);

// ============================================================================
// Money (paise-based to avoid floating point errors)
// ============================================================================

/// Represents an INR amount in paise
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero rupees
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from paise
    #[must_use]
    pub const fn from_paise(paise: u64) -> Self {
        Self(paise)
    }

    /// Creates a `Money` value from whole rupees, saturating on overflow
    #[must_use]
    pub const fn from_rupees(rupees: u64) -> Self {
        Self(rupees.saturating_mul(100))
    }

    /// Returns the amount in paise
    #[must_use]
    pub const fn paise(&self) -> u64 {
        self.0
    }

    /// Returns the whole-rupee part
    #[must_use]
    pub const fn rupees(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies by a unit count with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "₹{}.{:02}", self.rupees(), self.0 % 100)
    }
}

// ============================================================================
// Date range
// ============================================================================

/// Inclusive `[start, end]` range of calendar days
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = BookingError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    /// Creates a range, rejecting `end < start`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidDateRange`] when the end precedes the start.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if end < start {
            return Err(BookingError::InvalidDateRange(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// First booked day
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last booked day (inclusive)
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of booked days, `end - start + 1`
    #[must_use]
    pub fn days(&self) -> u32 {
        let span = (self.end - self.start).num_days() + 1;
        u32::try_from(span).unwrap_or(u32::MAX)
    }

    /// Inclusive-inclusive overlap: `a.start <= b.end && b.start <= a.end`
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Kind of bookable unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Open seat in a shared hall
    Seat,
    /// Private cabin
    Cabin,
}

impl ResourceKind {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Seat => "seat",
            Self::Cabin => "cabin",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "seat" => Ok(Self::Seat),
            "cabin" => Ok(Self::Cabin),
            _ => Err(StoreError::Serialization(format!("Invalid resource kind: {s}"))),
        }
    }

    /// Reservation status a paid booking of this kind settles into
    #[must_use]
    pub const fn paid_status(&self) -> ReservationStatus {
        match self {
            Self::Seat => ReservationStatus::Confirmed,
            Self::Cabin => ReservationStatus::Active,
        }
    }
}

/// Operational status of a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Open for bookings
    Active,
    /// Temporarily closed
    Maintenance,
    /// Permanently removed from sale
    Retired,
}

impl ResourceStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Retired => "retired",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(Self::Active),
            "maintenance" => Ok(Self::Maintenance),
            "retired" => Ok(Self::Retired),
            _ => Err(StoreError::Serialization(format!("Invalid resource status: {s}"))),
        }
    }

    /// Only active resources accept new reservations
    #[must_use]
    pub const fn is_bookable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A bookable seat or cabin.
///
/// `is_available` is a cached hint for listings. Whether the resource is free for a
/// range is decided by the absence of a blocking [`Reservation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource ID
    pub id: ResourceId,
    /// Owning venue
    pub venue_id: VenueId,
    /// Seat or cabin
    pub kind: ResourceKind,
    /// Display label, e.g. "A-12"
    pub label: String,
    /// Operational status
    pub status: ResourceStatus,
    /// Cached availability hint
    pub is_available: bool,
    /// Merchant price table
    pub price_table: PriceTable,
}

// ============================================================================
// Reservations
// ============================================================================

/// Lifecycle status of a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Hold awaiting payment
    Pending,
    /// Paid seat booking
    Confirmed,
    /// Paid cabin booking
    Active,
    /// Finished
    Completed,
    /// Cancelled by staff or expiry
    Cancelled,
}

impl ReservationStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Serialization(format!("Invalid reservation status: {s}"))),
        }
    }
}

/// Payment status of a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not paid yet
    Unpaid,
    /// Paid through reconciliation
    Paid,
    /// Refunded
    Refunded,
}

impl PaymentStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "refunded" => Ok(Self::Refunded),
            _ => Err(StoreError::Serialization(format!("Invalid payment status: {s}"))),
        }
    }
}

/// A claim on a resource for a date range
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub id: ReservationId,
    /// Human-readable booking number, unique
    pub booking_number: String,
    /// Reserved resource
    pub resource_id: ResourceId,
    /// Who booked it
    pub requester_id: RequesterId,
    /// Booked days
    pub range: DateRange,
    /// Amount charged
    pub amount: Money,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// When the row was inserted
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// `pending/unpaid`: a hold created by the writer before payment
    #[must_use]
    pub fn is_hold(&self) -> bool {
        self.status == ReservationStatus::Pending && self.payment_status == PaymentStatus::Unpaid
    }

    /// Whether a hold is still inside the grace window at `now`
    #[must_use]
    pub fn is_fresh_hold(&self, now: DateTime<Utc>, hold_grace: TimeDelta) -> bool {
        self.is_hold() && self.created_at > now - hold_grace
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// Payment provider family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Provider that calls back with an HMAC-signed payload
    SignedCallback,
    /// QR provider whose result is only observable by polling
    Qr,
}

impl PaymentMethod {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SignedCallback => "signed_callback",
            Self::Qr => "qr",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "signed_callback" => Ok(Self::SignedCallback),
            "qr" => Ok(Self::Qr),
            _ => Err(StoreError::Serialization(format!("Invalid payment method: {s}"))),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a payment transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Outcome not yet reconciled
    Pending,
    /// Linked to exactly one paid reservation
    Completed,
    /// Terminally failed, see `failure_reason`
    Failed,
}

impl TransactionStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::Serialization(format!("Invalid transaction status: {s}"))),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the requester wanted, captured on the transaction before any reservation
/// exists for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingIntent {
    /// Wanted resource
    pub resource_id: ResourceId,
    /// Who is paying
    pub requester_id: RequesterId,
    /// Wanted days
    pub range: DateRange,
    /// Hold created by `create booking`, when the client made one first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_id: Option<ReservationId>,
}

/// A payment attempt, independent of whether a reservation exists yet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: TransactionId,
    /// Who is paying
    pub requester_id: RequesterId,
    /// Amount charged
    pub amount: Money,
    /// Provider family
    pub method: PaymentMethod,
    /// Provider order id, unique
    pub external_order_id: String,
    /// Reconciliation status
    pub status: TransactionStatus,
    /// Booking intent captured at order creation
    pub intent: BookingIntent,
    /// Opaque provider data (order response, settlement raw payload)
    pub provider_payload: serde_json::Value,
    /// Provider payment id once settled
    pub provider_payment_id: Option<String>,
    /// Linked reservation, single assignment
    pub reservation_id: Option<ReservationId>,
    /// Reason recorded when failed
    pub failure_reason: Option<String>,
    /// Money moved but no reservation could be made
    pub refund_pending: bool,
    /// When the order was created
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Still awaiting reconciliation
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Time since the order was created
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }
}
