//! Storage seams.
//!
//! Two implementations are provided:
//!
//! - **`PostgresBookingStore`** (production, `studyhall-postgres`): row locks on the
//!   resource and transaction rows
//! - **`InMemoryBookingStore`** (testing, `studyhall-testing`): one mutex, same predicate
//!
//! # Lock scopes
//!
//! ```text
//! insert_hold   ── resource row ──► conflict check ──► insert pending/unpaid
//! settle        ── transaction row ──► resource row ──► convert hold | insert paid
//!                                                   └──► transaction completed + linked
//! mark_failed   ── UPDATE ... WHERE status = 'pending' (compare-and-swap)
//! ```
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so the stores can be shared
//! as `Arc<dyn BookingStore>` across services.

use crate::BoxFuture;
use crate::error::{BookingError, StoreError};
use crate::types::{
    BookingIntent, DateRange, Money, PaymentMethod, RequesterId, Reservation, ReservationId, Resource,
    ResourceId, Transaction, TransactionId, TransactionStatus,
};
use chrono::{DateTime, Utc};

/// Read access to resources.
pub trait ResourceStore: Send + Sync {
    /// Load a resource by id
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup fails.
    fn get_resource(&self, id: ResourceId) -> BoxFuture<'_, Result<Option<Resource>, StoreError>>;
}

/// Input to the reservation writer for an unpaid hold
#[derive(Clone, Debug)]
pub struct HoldRequest {
    /// What to reserve
    pub intent: BookingIntent,
    /// Quoted amount
    pub amount: Money,
    /// Time of the request
    pub now: DateTime<Utc>,
}

/// The reservation writer and reservation reads.
pub trait ReservationStore: Send + Sync {
    /// Non-cancelled reservations on `resource_id` overlapping `range`.
    ///
    /// Callers apply [`crate::availability::blocks`] to decide which of them conflict.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    fn overlapping_reservations(
        &self,
        resource_id: ResourceId,
        range: DateRange,
    ) -> BoxFuture<'_, Result<Vec<Reservation>, StoreError>>;

    /// Load a reservation by id
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup fails.
    fn get_reservation(&self, id: ReservationId) -> BoxFuture<'_, Result<Option<Reservation>, StoreError>>;

    /// Insert a `pending/unpaid` hold under the resource lock.
    ///
    /// # Errors
    ///
    /// - `ResourceNotFound` / `ResourceUnavailable`: resource missing or not active
    /// - `DateConflict`: a blocking reservation overlaps
    /// - `NumberGenerationFailed`: every booking number candidate collided
    /// - `Store`: the database failed
    fn insert_hold(&self, request: HoldRequest) -> BoxFuture<'_, Result<Reservation, BookingError>>;
}

/// A transaction about to be recorded
#[derive(Clone, Debug)]
pub struct NewTransaction {
    /// Pre-generated id, also sent to the provider as the receipt
    pub id: TransactionId,
    /// Who is paying
    pub requester_id: RequesterId,
    /// Amount charged
    pub amount: Money,
    /// Provider family
    pub method: PaymentMethod,
    /// Provider order id
    pub external_order_id: String,
    /// Captured booking intent
    pub intent: BookingIntent,
    /// Provider order response
    pub provider_payload: serde_json::Value,
    /// Creation time
    pub now: DateTime<Utc>,
}

/// Input to the settle step of reconciliation
#[derive(Clone, Debug)]
pub struct SettleRequest {
    /// Transaction being settled
    pub transaction_id: TransactionId,
    /// Provider payment id from the verified outcome
    pub provider_payment_id: String,
    /// Raw provider evidence, stored with the transaction
    pub raw: serde_json::Value,
    /// Settlement time
    pub now: DateTime<Utc>,
}

/// What `settle` found under the transaction row lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// The reservation is paid and linked; the transaction is completed
    Settled(Reservation),
    /// Another run already finished the transaction
    AlreadyFinal(TransactionStatus),
    /// The transaction is pending but already points at a reservation
    AlreadyLinked(ReservationId),
}

/// Input to the failure compare-and-swap
#[derive(Clone, Debug)]
pub struct FailRequest {
    /// Transaction to fail
    pub transaction_id: TransactionId,
    /// Recorded verbatim
    pub reason: String,
    /// Money moved but no reservation could be made
    pub refund_pending: bool,
    /// Failure time
    pub now: DateTime<Utc>,
}

/// Payment transactions.
pub trait TransactionStore: Send + Sync {
    /// Record a new `pending` transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the insert fails (including a duplicate order id).
    fn insert_transaction(&self, new: NewTransaction) -> BoxFuture<'_, Result<Transaction, StoreError>>;

    /// Load a transaction by id
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup fails.
    fn get_transaction(&self, id: TransactionId) -> BoxFuture<'_, Result<Option<Transaction>, StoreError>>;

    /// Load a transaction by provider order id
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup fails.
    fn find_by_order_id<'a>(
        &'a self,
        order_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Transaction>, StoreError>>;

    /// Settle a successful payment in one unit of work.
    ///
    /// Under the transaction row lock: re-check pending and unlinked, then run the writer
    /// against the stored intent (converting its hold when present), mark the reservation
    /// paid and complete the transaction. Nothing is written on error.
    ///
    /// # Errors
    ///
    /// Returns the writer's [`BookingError`]s; `DateConflict` and `ResourceUnavailable`
    /// mean the dates were lost after payment.
    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<Settlement, BookingError>>;

    /// Mark a transaction failed if it is still pending.
    ///
    /// Returns `true` when this call performed the transition.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update fails.
    fn mark_failed(&self, request: FailRequest) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Note that a reconcile pass left this pending transaction unresolved.
    ///
    /// Only the listing order of [`list_pending_before`](Self::list_pending_before)
    /// depends on it. Non-pending transactions are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update fails.
    fn record_check(&self, id: TransactionId, now: DateTime<Utc>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Pending transactions created before `cutoff`.
    ///
    /// Never-checked transactions come first, then the least recently checked, each
    /// group oldest first, so unresolved transactions cannot starve newer ones.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, StoreError>>;
}

/// Everything the booking and reconciliation services need from storage.
pub trait BookingStore: ResourceStore + ReservationStore + TransactionStore {}

impl<T> BookingStore for T where T: ResourceStore + ReservationStore + TransactionStore {}
