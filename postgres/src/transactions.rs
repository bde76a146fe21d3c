//! Transaction persistence and the settle step of reconciliation.

use crate::PostgresBookingStore;
use crate::error::store_error;
use crate::rows::{TRANSACTION_COLUMNS, money_to_db, transaction_from_row};
use crate::writer::{
    Attempt, NewReservation, clear_availability_hint, ensure_no_conflict, fetch_overlapping, insert_reservation,
    lock_bookable_resource, mark_hold_paid,
};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::store::{FailRequest, NewTransaction, SettleRequest, Settlement};
use studyhall_core::types::{PaymentStatus, Transaction, TransactionId, TransactionStatus};

impl PostgresBookingStore {
    pub(crate) async fn insert_transaction_row(&self, new: NewTransaction) -> Result<Transaction, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO transactions \
                 (id, requester_id, amount_paise, method, external_order_id, status, intent, \
                  provider_payload, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $8) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(new.id.as_uuid())
        .bind(new.requester_id.as_uuid())
        .bind(money_to_db(new.amount)?)
        .bind(new.method.as_str())
        .bind(&new.external_order_id)
        .bind(Json(&new.intent))
        .bind(&new.provider_payload)
        .bind(new.now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("Failed to insert transaction", &e))?;

        transaction_from_row(&row)
    }

    pub(crate) async fn fetch_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load transaction", &e))?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    pub(crate) async fn fetch_transaction_by_order(&self, order_id: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE external_order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to load transaction by order id", &e))?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    pub(crate) async fn fail_transaction(&self, request: FailRequest) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE transactions
            SET status = 'failed', failure_reason = $2, refund_pending = $3, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(request.transaction_id.as_uuid())
        .bind(&request.reason)
        .bind(request.refund_pending)
        .bind(request.now)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to mark transaction failed", &e))?;

        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn touch_pending(&self, id: TransactionId, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE transactions SET last_checked_at = $2 WHERE id = $1 AND status = 'pending'")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("Failed to record reconcile check", &e))?;
        Ok(())
    }

    pub(crate) async fn pending_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE status = 'pending' AND created_at < $1 \
             ORDER BY last_checked_at ASC NULLS FIRST, created_at ASC \
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list pending transactions", &e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    pub(crate) async fn settle_transaction(&self, request: SettleRequest) -> Result<Settlement, BookingError> {
        let attempts = self.policy.number_attempts.max(1);
        for attempt in 1..=attempts {
            let booking_number = self.numbers.next(request.now);
            match self.try_settle(&request, &booking_number).await? {
                Attempt::Done(settlement) => return Ok(settlement),
                Attempt::NumberTaken => {
                    tracing::debug!(
                        transaction_id = %request.transaction_id,
                        attempt,
                        "Retrying settle with a new booking number"
                    );
                }
            }
        }
        Err(BookingError::NumberGenerationFailed { attempts })
    }

    /// One settle attempt. Dropping `tx` without commit rolls everything back.
    async fn try_settle(
        &self,
        request: &SettleRequest,
        booking_number: &str,
    ) -> Result<Attempt<Settlement>, BookingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to start transaction", &e))?;

        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(request.transaction_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to lock transaction", &e))?
        .ok_or_else(|| StoreError::Integrity(format!("transaction {} vanished", request.transaction_id)))?;
        let transaction = transaction_from_row(&row)?;

        if transaction.status != TransactionStatus::Pending {
            return Ok(Attempt::Done(Settlement::AlreadyFinal(transaction.status)));
        }
        if let Some(linked) = transaction.reservation_id {
            return Ok(Attempt::Done(Settlement::AlreadyLinked(linked)));
        }

        let intent = &transaction.intent;
        let resource = lock_bookable_resource(&mut tx, intent.resource_id).await?;
        let candidates = fetch_overlapping(&mut *tx, intent.resource_id, intent.range).await?;

        let hold = intent.hold_id.and_then(|hold_id| {
            candidates.iter().find(|r| {
                r.id == hold_id
                    && r.is_hold()
                    && r.requester_id == intent.requester_id
                    && r.range == intent.range
            })
        });
        ensure_no_conflict(
            &candidates,
            intent.resource_id,
            &intent.range,
            hold.map(|h| h.id),
            request.now,
            self.policy.hold_grace,
        )?;

        let paid_status = resource.kind.paid_status();
        let reservation = if let Some(hold) = hold {
            mark_hold_paid(&mut tx, hold, paid_status, request.now).await?
        } else {
            let new = NewReservation {
                resource_id: intent.resource_id,
                requester_id: intent.requester_id,
                range: intent.range,
                amount: transaction.amount,
                status: paid_status,
                payment_status: PaymentStatus::Paid,
                booking_number,
                now: request.now,
            };
            match insert_reservation(&mut tx, &new).await? {
                Attempt::Done(reservation) => reservation,
                Attempt::NumberTaken => return Ok(Attempt::NumberTaken),
            }
        };

        let linked = sqlx::query(
            r"
            UPDATE transactions
            SET status = 'completed',
                reservation_id = $2,
                provider_payment_id = $3,
                provider_payload = provider_payload || jsonb_build_object('settlement', $4::jsonb),
                updated_at = $5
            WHERE id = $1 AND status = 'pending' AND reservation_id IS NULL
            ",
        )
        .bind(request.transaction_id.as_uuid())
        .bind(reservation.id.as_uuid())
        .bind(&request.provider_payment_id)
        .bind(&request.raw)
        .bind(request.now)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to complete transaction", &e))?;

        if linked.rows_affected() != 1 {
            return Err(StoreError::Integrity(format!(
                "transaction {} changed under its row lock",
                request.transaction_id
            ))
            .into());
        }

        clear_availability_hint(&mut tx, intent.resource_id, request.now).await?;

        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit settlement", &e))?;

        tracing::info!(
            transaction_id = %request.transaction_id,
            reservation_id = %reservation.id,
            booking_number = %reservation.booking_number,
            converted_hold = hold.is_some(),
            "Transaction settled"
        );

        Ok(Attempt::Done(Settlement::Settled(reservation)))
    }
}
