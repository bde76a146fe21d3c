//! `PostgreSQL` storage for the Studyhall booking core.
//!
//! [`PostgresBookingStore`] implements the storage seams from `studyhall-core`:
//!
//! - the **reservation writer**: the resource row is the lock scope for date exclusivity
//! - **settle**: the transaction row is the lock scope for reconciliation; the writer
//!   runs nested inside it so reservation and link commit together
//! - compare-and-swap failure marking and the sweep query
//!
//! A `btree_gist` exclusion constraint backs the paid-overlap invariant in the schema.
//!
//! # Example
//!
//! ```no_run
//! use studyhall_postgres::PostgresBookingStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/studyhall").await?;
//! let store = PostgresBookingStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod rows;
mod transactions;
mod writer;

use crate::error::store_error;
use crate::rows::{RESERVATION_COLUMNS, RESOURCE_COLUMNS, reservation_from_row, resource_from_row};
use crate::writer::{
    Attempt, NewReservation, clear_availability_hint, ensure_no_conflict, fetch_overlapping, insert_reservation,
    lock_bookable_resource,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use std::sync::Arc;
use studyhall_core::BoxFuture;
use studyhall_core::availability::BookingPolicy;
use studyhall_core::environment::{BookingNumberGenerator, RandomBookingNumbers};
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::store::{
    FailRequest, HoldRequest, NewTransaction, ReservationStore, ResourceStore, SettleRequest, Settlement,
    TransactionStore,
};
use studyhall_core::types::{
    DateRange, PaymentStatus, Reservation, ReservationId, ReservationStatus, Resource, ResourceId, Transaction,
    TransactionId,
};

/// Postgres-backed booking store
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
    policy: BookingPolicy,
    numbers: Arc<dyn BookingNumberGenerator>,
}

impl PostgresBookingStore {
    /// Store over `pool` with the default policy and random booking numbers
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: BookingPolicy::default(),
            numbers: Arc::new(RandomBookingNumbers),
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

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Insert or replace a resource. Used for seeding and tests.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the upsert fails.
    pub async fn upsert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO resources (id, venue_id, kind, label, status, is_available, price_table)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET venue_id = EXCLUDED.venue_id,
                kind = EXCLUDED.kind,
                label = EXCLUDED.label,
                status = EXCLUDED.status,
                is_available = EXCLUDED.is_available,
                price_table = EXCLUDED.price_table,
                updated_at = now()
            ",
        )
        .bind(resource.id.as_uuid())
        .bind(resource.venue_id.as_uuid())
        .bind(resource.kind.as_str())
        .bind(&resource.label)
        .bind(resource.status.as_str())
        .bind(resource.is_available)
        .bind(Json(&resource.price_table))
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to upsert resource", &e))?;
        Ok(())
    }

    async fn write_hold(&self, request: HoldRequest) -> Result<Reservation, BookingError> {
        let attempts = self.policy.number_attempts.max(1);
        for attempt in 1..=attempts {
            let booking_number = self.numbers.next(request.now);
            match self.try_write_hold(&request, &booking_number).await? {
                Attempt::Done(reservation) => {
                    tracing::info!(
                        reservation_id = %reservation.id,
                        resource_id = %reservation.resource_id,
                        booking_number = %reservation.booking_number,
                        "Hold created"
                    );
                    return Ok(reservation);
                }
                Attempt::NumberTaken => {
                    tracing::debug!(attempt, "Retrying hold with a new booking number");
                }
            }
        }
        tracing::error!(attempts, "Booking number generation exhausted");
        Err(BookingError::NumberGenerationFailed { attempts })
    }

    async fn try_write_hold(
        &self,
        request: &HoldRequest,
        booking_number: &str,
    ) -> Result<Attempt<Reservation>, BookingError> {
        let intent = &request.intent;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to start transaction", &e))?;

        lock_bookable_resource(&mut tx, intent.resource_id).await?;
        let candidates = fetch_overlapping(&mut *tx, intent.resource_id, intent.range).await?;
        ensure_no_conflict(
            &candidates,
            intent.resource_id,
            &intent.range,
            None,
            request.now,
            self.policy.hold_grace,
        )?;

        let new = NewReservation {
            resource_id: intent.resource_id,
            requester_id: intent.requester_id,
            range: intent.range,
            amount: request.amount,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            booking_number,
            now: request.now,
        };
        let reservation = match insert_reservation(&mut tx, &new).await? {
            Attempt::Done(reservation) => reservation,
            Attempt::NumberTaken => return Ok(Attempt::NumberTaken),
        };

        clear_availability_hint(&mut tx, intent.resource_id, request.now).await?;
        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit hold", &e))?;

        Ok(Attempt::Done(reservation))
    }
}

impl ResourceStore for PostgresBookingStore {
    fn get_resource(&self, id: ResourceId) -> BoxFuture<'_, Result<Option<Resource>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("Failed to load resource", &e))?;

            row.as_ref().map(resource_from_row).transpose()
        })
    }
}

impl ReservationStore for PostgresBookingStore {
    fn overlapping_reservations(
        &self,
        resource_id: ResourceId,
        range: DateRange,
    ) -> BoxFuture<'_, Result<Vec<Reservation>, StoreError>> {
        Box::pin(async move { fetch_overlapping(&self.pool, resource_id, range).await })
    }

    fn get_reservation(&self, id: ReservationId) -> BoxFuture<'_, Result<Option<Reservation>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load reservation", &e))?;

            row.as_ref().map(reservation_from_row).transpose()
        })
    }

    fn insert_hold(&self, request: HoldRequest) -> BoxFuture<'_, Result<Reservation, BookingError>> {
        Box::pin(self.write_hold(request))
    }
}

impl TransactionStore for PostgresBookingStore {
    fn insert_transaction(&self, new: NewTransaction) -> BoxFuture<'_, Result<Transaction, StoreError>> {
        Box::pin(self.insert_transaction_row(new))
    }

    fn get_transaction(&self, id: TransactionId) -> BoxFuture<'_, Result<Option<Transaction>, StoreError>> {
        Box::pin(self.fetch_transaction(id))
    }

    fn find_by_order_id<'a>(
        &'a self,
        order_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Transaction>, StoreError>> {
        Box::pin(self.fetch_transaction_by_order(order_id))
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<Settlement, BookingError>> {
        Box::pin(self.settle_transaction(request))
    }

    fn mark_failed(&self, request: FailRequest) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(self.fail_transaction(request))
    }

    fn record_check(&self, id: TransactionId, now: DateTime<Utc>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.touch_pending(id, now))
    }

    fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, StoreError>> {
        Box::pin(self.pending_before(cutoff, limit))
    }
}
