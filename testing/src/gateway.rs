//! Scripted payment provider.

#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use studyhall_core::BoxFuture;
use studyhall_core::payment::{CallbackPayload, GatewayError, OrderRef, PaymentGateway, PaymentOutcome, reasons};
use studyhall_core::types::{BookingIntent, Money, PaymentMethod, TransactionId};
use studyhall_gateways::verify_signature;

/// Payment provider driven by a script of status results.
///
/// `check_status` answers from the per-order script first, then pops queued results;
/// once the queue is empty it keeps returning the sticky result (`StillPending` by
/// default). Callbacks verify with the same HMAC scheme
/// as the signed-callback provider, keyed by [`ScriptedGateway::SECRET`].
///
/// ```
/// use studyhall_core::payment::{PaymentGateway, PaymentOutcome};
/// use studyhall_testing::ScriptedGateway;
///
/// let gateway = ScriptedGateway::signed_callback();
/// let payload = ScriptedGateway::signed_payload("order_1", "pay_1");
/// assert!(matches!(gateway.verify_callback(&payload), PaymentOutcome::Success { .. }));
/// ```
#[derive(Debug)]
pub struct ScriptedGateway {
    method: PaymentMethod,
    per_order: Mutex<HashMap<String, Result<PaymentOutcome, GatewayError>>>,
    queued: Mutex<VecDeque<Result<PaymentOutcome, GatewayError>>>,
    sticky: Mutex<Result<PaymentOutcome, GatewayError>>,
    order_error: Mutex<Option<GatewayError>>,
    status_delay: Mutex<Option<Duration>>,
    orders: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedGateway {
    /// Callback signing secret
    pub const SECRET: &'static str = "scripted-secret";

    /// Scripted provider for `method`
    #[must_use]
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            per_order: Mutex::new(HashMap::new()),
            queued: Mutex::new(VecDeque::new()),
            sticky: Mutex::new(Ok(PaymentOutcome::StillPending)),
            order_error: Mutex::new(None),
            status_delay: Mutex::new(None),
            orders: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Scripted signed-callback provider
    #[must_use]
    pub fn signed_callback() -> Self {
        Self::new(PaymentMethod::SignedCallback)
    }

    /// Scripted QR provider
    #[must_use]
    pub fn qr() -> Self {
        Self::new(PaymentMethod::Qr)
    }

    /// Status result for one order, returned on every check of that order
    pub fn set_status_for(&self, order_id: &str, result: Result<PaymentOutcome, GatewayError>) {
        lock(&self.per_order).insert(order_id.to_string(), result);
    }

    /// Queue one status result
    pub fn push_status(&self, result: Result<PaymentOutcome, GatewayError>) {
        lock(&self.queued).push_back(result);
    }

    /// Result returned once the queue is drained
    pub fn set_status(&self, result: Result<PaymentOutcome, GatewayError>) {
        *lock(&self.sticky) = result;
    }

    /// Make every later status check report a captured payment
    pub fn succeed_with(&self, provider_payment_id: &str) {
        self.set_status(Ok(success(provider_payment_id)));
    }

    /// Make `create_order` fail
    pub fn fail_orders_with(&self, error: GatewayError) {
        *lock(&self.order_error) = Some(error);
    }

    /// Sleep this long inside every status check
    pub fn delay_status(&self, delay: Duration) {
        *lock(&self.status_delay) = Some(delay);
    }

    /// Orders created so far
    #[must_use]
    pub fn orders_created(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }

    /// Status checks made so far
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Valid callback signature for an order/payment pair
    #[must_use]
    pub fn sign(order_id: &str, payment_id: &str) -> String {
        studyhall_gateways::sign_callback(Self::SECRET, order_id, payment_id)
    }

    /// Signed callback payload for an order/payment pair
    #[must_use]
    pub fn signed_payload(order_id: &str, payment_id: &str) -> CallbackPayload {
        CallbackPayload {
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            signature: Self::sign(order_id, payment_id),
        }
    }
}

/// A success outcome carrying a captured-payment raw body
#[must_use]
pub fn success(provider_payment_id: &str) -> PaymentOutcome {
    PaymentOutcome::Success {
        provider_payment_id: provider_payment_id.to_string(),
        raw: serde_json::json!({ "id": provider_payment_id, "status": "captured" }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl PaymentGateway for ScriptedGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    fn create_order<'a>(
        &'a self,
        amount: Money,
        _intent: &'a BookingIntent,
        receipt: TransactionId,
    ) -> BoxFuture<'a, Result<OrderRef, GatewayError>> {
        Box::pin(async move {
            let order_error = lock(&self.order_error).clone();
            if let Some(error) = order_error {
                return Err(error);
            }
            let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(OrderRef {
                provider_order_id: format!("order_{n}"),
                provider_public_key: "scripted_key".to_string(),
                raw: serde_json::json!({ "receipt": receipt.to_string(), "amount": amount.paise() }),
            })
        })
    }

    fn check_status<'a>(&'a self, order_id: &'a str) -> BoxFuture<'a, Result<PaymentOutcome, GatewayError>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.status_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = lock(&self.per_order).get(order_id).cloned();
            if let Some(result) = scripted {
                return result;
            }
            let queued = lock(&self.queued).pop_front();
            queued.unwrap_or_else(|| lock(&self.sticky).clone())
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> PaymentOutcome {
        if self.method == PaymentMethod::Qr {
            return PaymentOutcome::failure(reasons::CALLBACK_NOT_SUPPORTED);
        }
        if verify_signature(Self::SECRET, &payload.order_id, &payload.payment_id, &payload.signature) {
            success(&payload.payment_id)
        } else {
            PaymentOutcome::failure(reasons::SIGNATURE_MISMATCH)
        }
    }
}
