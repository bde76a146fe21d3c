//! Booking service: quotes, holds and payment orders.
//!
//! The service never writes `paid` reservations. Holds go through the store's writer;
//! payment orders only record a pending transaction carrying the booking intent, and
//! the [`ReconciliationEngine`](crate::reconcile::ReconciliationEngine) finishes the job.

use crate::metrics::BookingMetrics;
use std::sync::Arc;
use studyhall_core::availability::{AvailabilityChecker, BookingPolicy};
use studyhall_core::environment::Clock;
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::payment::{GatewayError, GatewayRegistry, ProviderToggles};
use studyhall_core::pricing::{self, Quote};
use studyhall_core::store::{BookingStore, HoldRequest, NewTransaction};
use studyhall_core::types::{
    BookingIntent, DateRange, Money, PaymentMethod, Reservation, ReservationId, Resource, ResourceId, Transaction,
    TransactionId,
};
use thiserror::Error;

/// Errors from payment order creation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Resource, pricing or availability problem
    #[error(transparent)]
    Booking(#[from] BookingError),

    /// Client-supplied amount differs from the server quote
    #[error("Amount mismatch: quoted {quoted}, supplied {supplied}")]
    AmountMismatch {
        /// Server quote
        quoted: Money,
        /// Client value
        supplied: Money,
    },

    /// Provider refused or could not be reached
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Order created at the provider but not recorded
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Payment order request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// What to book once paid
    pub intent: BookingIntent,
    /// Provider to pay with
    pub method: PaymentMethod,
    /// Amount the client displayed, checked against the quote
    pub amount: Option<Money>,
}

/// A recorded payment order.
#[derive(Debug, Clone)]
pub struct PaymentOrder {
    /// Pending transaction
    pub transaction: Transaction,
    /// Key the client needs to open the provider checkout (or QR payload)
    pub provider_public_key: String,
}

/// Quote, hold and order entry points.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    gateways: GatewayRegistry,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl BookingService {
    /// Creates a service
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateways: GatewayRegistry,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            store,
            gateways,
            clock,
            policy,
        }
    }

    /// Configured providers
    #[must_use]
    pub const fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    async fn resource(&self, id: ResourceId) -> Result<Resource, BookingError> {
        self.store
            .get_resource(id)
            .await?
            .ok_or(BookingError::ResourceNotFound(id))
    }

    /// Price `range` on `resource_id`.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound`, `NoPricingAvailable`, or a storage failure.
    pub async fn quote(&self, resource_id: ResourceId, range: DateRange) -> Result<Quote, BookingError> {
        let resource = self.resource(resource_id).await?;
        Ok(pricing::quote(range, &resource.price_table)?)
    }

    /// Advisory availability; the writer re-checks under the resource lock.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn check_availability(
        &self,
        resource_id: ResourceId,
        range: DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<bool, StoreError> {
        AvailabilityChecker::new(Arc::clone(&self.store), Arc::clone(&self.clock), self.policy)
            .is_available(resource_id, range, exclude)
            .await
    }

    /// Write a `pending/unpaid` hold priced from the resource's table.
    ///
    /// # Errors
    ///
    /// Pricing errors, `ResourceNotFound`, `ResourceUnavailable`, `DateConflict`,
    /// `NumberGenerationFailed`, or a storage failure.
    pub async fn create_booking(&self, intent: BookingIntent) -> Result<Reservation, BookingError> {
        let quote = self.quote(intent.resource_id, intent.range).await?;
        let resource_id = intent.resource_id;
        let request = HoldRequest {
            intent,
            amount: quote.amount,
            now: self.clock.now(),
        };

        match self.store.insert_hold(request).await {
            Ok(reservation) => {
                BookingMetrics::record_created();
                tracing::info!(
                    resource_id = %resource_id,
                    reservation_id = %reservation.id,
                    booking_number = %reservation.booking_number,
                    amount = %reservation.amount,
                    "Hold created"
                );
                Ok(reservation)
            }
            Err(e) => {
                if e.is_contention() {
                    BookingMetrics::record_conflict();
                }
                tracing::info!(resource_id = %resource_id, error = %e, "Hold rejected");
                Err(e)
            }
        }
    }

    /// The intent's hold id, if it names an unpaid hold for exactly this requester,
    /// resource and range.
    async fn own_hold(&self, intent: &BookingIntent) -> Result<Option<ReservationId>, StoreError> {
        let Some(hold_id) = intent.hold_id else {
            return Ok(None);
        };
        let matches = self.store.get_reservation(hold_id).await?.is_some_and(|r| {
            r.is_hold()
                && r.requester_id == intent.requester_id
                && r.resource_id == intent.resource_id
                && r.range == intent.range
        });
        if !matches {
            tracing::warn!(
                resource_id = %intent.resource_id,
                hold_id = %hold_id,
                "Order names a reservation that is not the requester's hold"
            );
        }
        Ok(matches.then_some(hold_id))
    }

    /// Create a provider order and record a pending transaction for it.
    ///
    /// The amount always comes from the server quote. The availability check here is
    /// advisory; a resource lost between now and payment is settled as a refund.
    ///
    /// # Errors
    ///
    /// `Disabled`/`NotConfigured` for the method, pricing and availability errors,
    /// [`OrderError::AmountMismatch`], provider errors, or a storage failure.
    pub async fn create_payment_order(
        &self,
        request: OrderRequest,
        toggles: ProviderToggles,
    ) -> Result<PaymentOrder, OrderError> {
        let gateway = self.gateways.for_new_order(request.method, toggles)?;
        let intent = request.intent;

        let resource = self.resource(intent.resource_id).await?;
        if !resource.status.is_bookable() {
            return Err(BookingError::ResourceUnavailable(resource.id).into());
        }
        let quote = pricing::quote(intent.range, &resource.price_table).map_err(BookingError::from)?;
        if let Some(supplied) = request.amount.filter(|supplied| *supplied != quote.amount) {
            tracing::warn!(
                resource_id = %intent.resource_id,
                quoted = %quote.amount,
                supplied = %supplied,
                "Client amount does not match quote"
            );
            return Err(OrderError::AmountMismatch {
                quoted: quote.amount,
                supplied,
            });
        }

        let own_hold = self.own_hold(&intent).await?;
        let available = self
            .check_availability(intent.resource_id, intent.range, own_hold)
            .await?;
        if !available {
            BookingMetrics::record_conflict();
            return Err(BookingError::DateConflict {
                resource_id: intent.resource_id,
            }
            .into());
        }

        let transaction_id = TransactionId::new();
        let order = gateway.create_order(quote.amount, &intent, transaction_id).await?;

        let transaction = self
            .store
            .insert_transaction(NewTransaction {
                id: transaction_id,
                requester_id: intent.requester_id,
                amount: quote.amount,
                method: request.method,
                external_order_id: order.provider_order_id,
                intent,
                provider_payload: serde_json::json!({ "order": order.raw }),
                now: self.clock.now(),
            })
            .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            order_id = %transaction.external_order_id,
            method = %transaction.method,
            amount = %transaction.amount,
            "Payment order created"
        );

        Ok(PaymentOrder {
            transaction,
            provider_public_key: order.provider_public_key,
        })
    }
}

impl std::fmt::Debug for BookingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingService")
            .field("gateways", &self.gateways)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
