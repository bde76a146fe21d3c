//! Row decoding.

use crate::error::store_error;
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use studyhall_core::error::StoreError;
use studyhall_core::pricing::PriceTable;
use studyhall_core::types::{
    BookingIntent, DateRange, Money, PaymentMethod, PaymentStatus, RequesterId, Reservation, ReservationId,
    ReservationStatus, Resource, ResourceId, ResourceKind, ResourceStatus, Transaction, TransactionId,
    TransactionStatus, VenueId,
};
use uuid::Uuid;

pub(crate) const RESOURCE_COLUMNS: &str = "id, venue_id, kind, label, status, is_available, price_table";

pub(crate) const RESERVATION_COLUMNS: &str = "id, booking_number, resource_id, requester_id, start_date, \
     end_date, amount_paise, status, payment_status, created_at, updated_at";

pub(crate) const TRANSACTION_COLUMNS: &str = "id, requester_id, amount_paise, method, external_order_id, \
     status, intent, provider_payload, provider_payment_id, reservation_id, failure_reason, \
     refund_pending, created_at, updated_at";

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(|e| store_error(column, &e))
}

/// Money is stored as `BIGINT` paise.
pub(crate) fn money_to_db(money: Money) -> Result<i64, StoreError> {
    i64::try_from(money.paise())
        .map_err(|_| StoreError::Serialization(format!("amount {money} exceeds BIGINT")))
}

fn money_from_db(paise: i64) -> Result<Money, StoreError> {
    u64::try_from(paise)
        .map(Money::from_paise)
        .map_err(|_| StoreError::Integrity(format!("negative amount {paise} in database")))
}

pub(crate) fn resource_from_row(row: &PgRow) -> Result<Resource, StoreError> {
    let Json(price_table): Json<PriceTable> = get(row, "price_table")?;
    Ok(Resource {
        id: ResourceId::from_uuid(get::<Uuid>(row, "id")?),
        venue_id: VenueId::from_uuid(get::<Uuid>(row, "venue_id")?),
        kind: ResourceKind::parse(&get::<String>(row, "kind")?)?,
        label: get(row, "label")?,
        status: ResourceStatus::parse(&get::<String>(row, "status")?)?,
        is_available: get(row, "is_available")?,
        price_table,
    })
}

pub(crate) fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let range = DateRange::new(get(row, "start_date")?, get(row, "end_date")?)
        .map_err(|e| StoreError::Integrity(e.to_string()))?;
    Ok(Reservation {
        id: ReservationId::from_uuid(get::<Uuid>(row, "id")?),
        booking_number: get(row, "booking_number")?,
        resource_id: ResourceId::from_uuid(get::<Uuid>(row, "resource_id")?),
        requester_id: RequesterId::from_uuid(get::<Uuid>(row, "requester_id")?),
        range,
        amount: money_from_db(get(row, "amount_paise")?)?,
        status: ReservationStatus::parse(&get::<String>(row, "status")?)?,
        payment_status: PaymentStatus::parse(&get::<String>(row, "payment_status")?)?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let Json(intent): Json<BookingIntent> = get(row, "intent")?;
    Ok(Transaction {
        id: TransactionId::from_uuid(get::<Uuid>(row, "id")?),
        requester_id: RequesterId::from_uuid(get::<Uuid>(row, "requester_id")?),
        amount: money_from_db(get(row, "amount_paise")?)?,
        method: PaymentMethod::parse(&get::<String>(row, "method")?)?,
        external_order_id: get(row, "external_order_id")?,
        status: TransactionStatus::parse(&get::<String>(row, "status")?)?,
        intent,
        provider_payload: get(row, "provider_payload")?,
        provider_payment_id: get(row, "provider_payment_id")?,
        reservation_id: get::<Option<Uuid>>(row, "reservation_id")?.map(ReservationId::from_uuid),
        failure_reason: get(row, "failure_reason")?,
        refund_pending: get(row, "refund_pending")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}
