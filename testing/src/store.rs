//! In-memory booking store.
//!
//! One mutex guards every table, so each store call is atomic the way a Postgres
//! transaction holding the relevant row locks is. The conflict predicate is the same
//! [`find_conflict`] the Postgres writer applies.

#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use studyhall_core::BoxFuture;
use studyhall_core::availability::{BookingPolicy, find_conflict};
use studyhall_core::environment::{BookingNumberGenerator, RandomBookingNumbers};
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::store::{
    FailRequest, HoldRequest, NewTransaction, ReservationStore, ResourceStore, SettleRequest, Settlement,
    TransactionStore,
};
use studyhall_core::types::{
    BookingIntent, DateRange, Money, PaymentStatus, Reservation, ReservationId, ReservationStatus, Resource,
    ResourceId, ResourceStatus, Transaction, TransactionId, TransactionStatus,
};

#[derive(Debug, Default)]
struct Tables {
    resources: HashMap<ResourceId, Resource>,
    reservations: Vec<Reservation>,
    transactions: HashMap<TransactionId, Transaction>,
    last_checked: HashMap<TransactionId, DateTime<Utc>>,
    settle_faults: VecDeque<BookingError>,
    fail_faults: VecDeque<StoreError>,
}

/// In-memory implementation of every storage seam.
///
/// `write_calls` counts invocations of the write methods (`insert_hold`,
/// `insert_transaction`, `settle`, `mark_failed`), whatever their result.
/// `record_check` only affects listing order and is not counted.
#[derive(Clone)]
pub struct InMemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    policy: BookingPolicy,
    numbers: Arc<dyn BookingNumberGenerator>,
    write_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryBookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBookingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBookingStore")
            .field("policy", &self.policy)
            .field("write_calls", &self.write_calls())
            .finish_non_exhaustive()
    }
}

impl InMemoryBookingStore {
    /// Empty store with the default policy
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            policy: BookingPolicy::default(),
            numbers: Arc::new(RandomBookingNumbers),
            write_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override hold grace and booking-number attempts
    #[must_use]
    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the booking-number generator
    #[must_use]
    pub fn with_numbers(mut self, numbers: Arc<dyn BookingNumberGenerator>) -> Self {
        self.numbers = numbers;
        self
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn count_write(&self) {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Seed a resource
    pub fn add_resource(&self, resource: Resource) {
        self.tables().resources.insert(resource.id, resource);
    }

    /// Change a resource's status
    pub fn set_resource_status(&self, id: ResourceId, status: ResourceStatus) {
        if let Some(resource) = self.tables().resources.get_mut(&id) {
            resource.status = status;
        }
    }

    /// Seed a reservation directly, bypassing the writer
    pub fn seed_reservation(&self, reservation: Reservation) {
        self.tables().reservations.push(reservation);
    }

    /// Seed a transaction directly, bypassing order creation
    pub fn seed_transaction(&self, transaction: Transaction) {
        self.tables().transactions.insert(transaction.id, transaction);
    }

    /// Make the next `settle` call fail with `error` before touching any table
    pub fn fail_next_settle(&self, error: BookingError) {
        self.tables().settle_faults.push_back(error);
    }

    /// Make the next `mark_failed` call fail with `error` before touching any table
    pub fn fail_next_mark_failed(&self, error: StoreError) {
        self.tables().fail_faults.push_back(error);
    }

    /// When a reconcile pass last left `id` unresolved
    #[must_use]
    pub fn last_checked(&self, id: TransactionId) -> Option<DateTime<Utc>> {
        self.tables().last_checked.get(&id).copied()
    }

    /// Snapshot of every reservation
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.tables().reservations.clone()
    }

    /// Reservations on `resource_id`
    #[must_use]
    pub fn reservations_for(&self, resource_id: ResourceId) -> Vec<Reservation> {
        self.tables()
            .reservations
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .cloned()
            .collect()
    }

    /// Snapshot of a transaction
    #[must_use]
    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.tables().transactions.get(&id).cloned()
    }

    /// Snapshot of a resource
    #[must_use]
    pub fn resource(&self, id: ResourceId) -> Option<Resource> {
        self.tables().resources.get(&id).cloned()
    }

    /// Write method invocations so far
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Writer steps (1)-(4) against locked tables
    #[allow(clippy::too_many_arguments)]
    fn write_reservation(
        &self,
        tables: &mut Tables,
        intent: &BookingIntent,
        amount: Money,
        exclude: Option<ReservationId>,
        status: ReservationStatus,
        payment_status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BookingError> {
        let resource = tables
            .resources
            .get(&intent.resource_id)
            .ok_or(BookingError::ResourceNotFound(intent.resource_id))?;
        if !resource.status.is_bookable() {
            return Err(BookingError::ResourceUnavailable(intent.resource_id));
        }

        if find_conflict(
            &tables.reservations,
            intent.resource_id,
            &intent.range,
            exclude,
            now,
            self.policy.hold_grace,
        )
        .is_some()
        {
            return Err(BookingError::DateConflict {
                resource_id: intent.resource_id,
            });
        }

        let attempts = self.policy.number_attempts.max(1);
        let booking_number = (0..attempts)
            .map(|_| self.numbers.next(now))
            .find(|candidate| !tables.reservations.iter().any(|r| &r.booking_number == candidate))
            .ok_or(BookingError::NumberGenerationFailed { attempts })?;

        let reservation = Reservation {
            id: ReservationId::new(),
            booking_number,
            resource_id: intent.resource_id,
            requester_id: intent.requester_id,
            range: intent.range,
            amount,
            status,
            payment_status,
            created_at: now,
            updated_at: now,
        };
        tables.reservations.push(reservation.clone());
        if let Some(resource) = tables.resources.get_mut(&intent.resource_id) {
            resource.is_available = false;
        }
        Ok(reservation)
    }

    fn settle_locked(&self, request: &SettleRequest) -> Result<Settlement, BookingError> {
        let mut tables = self.tables();
        if let Some(fault) = tables.settle_faults.pop_front() {
            return Err(fault);
        }
        let transaction = tables
            .transactions
            .get(&request.transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::Integrity(format!("transaction {} vanished", request.transaction_id)))?;

        if transaction.status != TransactionStatus::Pending {
            return Ok(Settlement::AlreadyFinal(transaction.status));
        }
        if let Some(linked) = transaction.reservation_id {
            return Ok(Settlement::AlreadyLinked(linked));
        }

        let intent = &transaction.intent;
        let kind = tables
            .resources
            .get(&intent.resource_id)
            .map(|r| r.kind)
            .ok_or(BookingError::ResourceNotFound(intent.resource_id))?;
        let paid_status = kind.paid_status();

        let hold_index = intent.hold_id.and_then(|hold_id| {
            tables.reservations.iter().position(|r| {
                r.id == hold_id
                    && r.is_hold()
                    && r.requester_id == intent.requester_id
                    && r.range == intent.range
            })
        });

        let reservation = if let Some(index) = hold_index {
            let hold_id = tables.reservations[index].id;
            let resource = tables
                .resources
                .get(&intent.resource_id)
                .ok_or(BookingError::ResourceNotFound(intent.resource_id))?;
            if !resource.status.is_bookable() {
                return Err(BookingError::ResourceUnavailable(intent.resource_id));
            }
            if find_conflict(
                &tables.reservations,
                intent.resource_id,
                &intent.range,
                Some(hold_id),
                request.now,
                self.policy.hold_grace,
            )
            .is_some()
            {
                return Err(BookingError::DateConflict {
                    resource_id: intent.resource_id,
                });
            }
            let hold = &mut tables.reservations[index];
            hold.status = paid_status;
            hold.payment_status = PaymentStatus::Paid;
            hold.updated_at = request.now;
            hold.clone()
        } else {
            self.write_reservation(
                &mut tables,
                intent,
                transaction.amount,
                None,
                paid_status,
                PaymentStatus::Paid,
                request.now,
            )?
        };

        if let Some(resource) = tables.resources.get_mut(&intent.resource_id) {
            resource.is_available = false;
        }
        let stored = tables
            .transactions
            .get_mut(&request.transaction_id)
            .ok_or_else(|| StoreError::Integrity(format!("transaction {} vanished", request.transaction_id)))?;
        stored.status = TransactionStatus::Completed;
        stored.reservation_id = Some(reservation.id);
        stored.provider_payment_id = Some(request.provider_payment_id.clone());
        if let Some(payload) = stored.provider_payload.as_object_mut() {
            payload.insert("settlement".to_string(), request.raw.clone());
        }
        stored.updated_at = request.now;

        Ok(Settlement::Settled(reservation))
    }
}

impl ResourceStore for InMemoryBookingStore {
    fn get_resource(&self, id: ResourceId) -> BoxFuture<'_, Result<Option<Resource>, StoreError>> {
        let resource = self.resource(id);
        Box::pin(async move { Ok(resource) })
    }
}

impl ReservationStore for InMemoryBookingStore {
    fn overlapping_reservations(
        &self,
        resource_id: ResourceId,
        range: DateRange,
    ) -> BoxFuture<'_, Result<Vec<Reservation>, StoreError>> {
        let rows = self
            .tables()
            .reservations
            .iter()
            .filter(|r| {
                r.resource_id == resource_id && r.status != ReservationStatus::Cancelled && r.range.overlaps(&range)
            })
            .cloned()
            .collect();
        Box::pin(async move { Ok(rows) })
    }

    fn get_reservation(&self, id: ReservationId) -> BoxFuture<'_, Result<Option<Reservation>, StoreError>> {
        let reservation = self.tables().reservations.iter().find(|r| r.id == id).cloned();
        Box::pin(async move { Ok(reservation) })
    }

    fn insert_hold(&self, request: HoldRequest) -> BoxFuture<'_, Result<Reservation, BookingError>> {
        self.count_write();
        let result = {
            let mut tables = self.tables();
            self.write_reservation(
                &mut tables,
                &request.intent,
                request.amount,
                None,
                ReservationStatus::Pending,
                PaymentStatus::Unpaid,
                request.now,
            )
        };
        Box::pin(async move { result })
    }
}

impl TransactionStore for InMemoryBookingStore {
    fn insert_transaction(&self, new: NewTransaction) -> BoxFuture<'_, Result<Transaction, StoreError>> {
        self.count_write();
        let result = {
            let mut tables = self.tables();
            if tables
                .transactions
                .values()
                .any(|t| t.external_order_id == new.external_order_id)
            {
                Err(StoreError::Database(format!(
                    "duplicate external order id {}",
                    new.external_order_id
                )))
            } else {
                let transaction = Transaction {
                    id: new.id,
                    requester_id: new.requester_id,
                    amount: new.amount,
                    method: new.method,
                    external_order_id: new.external_order_id,
                    status: TransactionStatus::Pending,
                    intent: new.intent,
                    provider_payload: new.provider_payload,
                    provider_payment_id: None,
                    reservation_id: None,
                    failure_reason: None,
                    refund_pending: false,
                    created_at: new.now,
                    updated_at: new.now,
                };
                tables.transactions.insert(transaction.id, transaction.clone());
                Ok(transaction)
            }
        };
        Box::pin(async move { result })
    }

    fn get_transaction(&self, id: TransactionId) -> BoxFuture<'_, Result<Option<Transaction>, StoreError>> {
        let transaction = self.transaction(id);
        Box::pin(async move { Ok(transaction) })
    }

    fn find_by_order_id<'a>(
        &'a self,
        order_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Transaction>, StoreError>> {
        let transaction = self
            .tables()
            .transactions
            .values()
            .find(|t| t.external_order_id == order_id)
            .cloned();
        Box::pin(async move { Ok(transaction) })
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<Settlement, BookingError>> {
        self.count_write();
        let result = self.settle_locked(&request);
        Box::pin(async move { result })
    }

    fn mark_failed(&self, request: FailRequest) -> BoxFuture<'_, Result<bool, StoreError>> {
        self.count_write();
        let result = {
            let mut tables = self.tables();
            if let Some(fault) = tables.fail_faults.pop_front() {
                Err(fault)
            } else {
                match tables.transactions.get_mut(&request.transaction_id) {
                    Some(t) if t.status == TransactionStatus::Pending => {
                        t.status = TransactionStatus::Failed;
                        t.failure_reason = Some(request.reason.clone());
                        t.refund_pending = request.refund_pending;
                        t.updated_at = request.now;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        };
        Box::pin(async move { result })
    }

    fn record_check(&self, id: TransactionId, now: DateTime<Utc>) -> BoxFuture<'_, Result<(), StoreError>> {
        {
            let mut tables = self.tables();
            let pending = tables
                .transactions
                .get(&id)
                .is_some_and(|t| t.status == TransactionStatus::Pending);
            if pending {
                tables.last_checked.insert(id, now);
            }
        }
        Box::pin(async move { Ok(()) })
    }

    fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, StoreError>> {
        let pending = {
            let tables = self.tables();
            let mut keyed: Vec<(Option<DateTime<Utc>>, Transaction)> = tables
                .transactions
                .values()
                .filter(|t| t.status == TransactionStatus::Pending && t.created_at < cutoff)
                .map(|t| (tables.last_checked.get(&t.id).copied(), t.clone()))
                .collect();
            // `None` sorts first, matching NULLS FIRST
            keyed.sort_by_key(|(checked, t)| (*checked, t.created_at));
            keyed.into_iter().take(limit).map(|(_, t)| t).collect::<Vec<_>>()
        };
        Box::pin(async move { Ok(pending) })
    }
}
