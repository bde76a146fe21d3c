//! Signed-callback provider.
//!
//! ```text
//! POST {base}/orders                 basic auth (key id, key secret)
//!   -> { "id": "order_..." }
//!
//! callback { order_id, payment_id, signature }
//!   signature = hex(HMAC-SHA256(key secret, "{order_id}|{payment_id}"))
//!
//! GET  {base}/orders/{id}/payments   basic auth
//!   -> { "items": [ { "id": "pay_...", "status": "captured" | "failed" | ... } ] }
//! ```

use crate::http::{send_json, str_field};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{Value, json};
use sha2::Sha256;
use studyhall_core::BoxFuture;
use studyhall_core::payment::{CallbackPayload, GatewayError, OrderRef, PaymentGateway, PaymentOutcome, reasons};
use studyhall_core::types::{BookingIntent, Money, PaymentMethod, TransactionId};

type HmacSha256 = Hmac<Sha256>;

/// Payment states that count as money captured
const CAPTURED: &str = "captured";
/// Terminal failure state for one payment attempt
const FAILED: &str = "failed";

/// Credentials and endpoint for the signed-callback provider
#[derive(Clone)]
pub struct SignedCallbackConfig {
    /// Public key id, also handed to the client checkout
    pub key_id: String,
    /// Shared secret for basic auth and callback signatures
    pub key_secret: String,
    /// API base URL
    pub base_url: String,
}

impl std::fmt::Debug for SignedCallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCallbackConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Adapter for the HMAC signed-callback provider
#[derive(Clone, Debug)]
pub struct SignedCallbackGateway {
    client: Client,
    config: SignedCallbackConfig,
}

impl SignedCallbackGateway {
    /// Creates an adapter sharing `client`
    #[must_use]
    pub const fn new(client: Client, config: SignedCallbackConfig) -> Self {
        Self { client, config }
    }

    async fn create_order_inner(
        &self,
        amount: Money,
        intent: &BookingIntent,
        receipt: TransactionId,
    ) -> Result<OrderRef, GatewayError> {
        let body = json!({
            "amount": amount.paise(),
            "currency": "INR",
            "receipt": receipt.to_string(),
            "notes": {
                "resource_id": intent.resource_id.to_string(),
                "requester_id": intent.requester_id.to_string(),
                "start_date": intent.range.start().to_string(),
                "end_date": intent.range.end().to_string(),
            }
        });

        let raw = send_json(
            self.client
                .post(format!("{}/orders", self.config.base_url))
                .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
                .json(&body),
        )
        .await?;

        let provider_order_id = str_field(&raw, "id")
            .ok_or_else(|| GatewayError::InvalidResponse("order response has no id".to_string()))?
            .to_string();

        tracing::info!(
            order_id = %provider_order_id,
            receipt = %receipt,
            amount = amount.paise(),
            "Signed-callback order created"
        );

        Ok(OrderRef {
            provider_order_id,
            provider_public_key: self.config.key_id.clone(),
            raw,
        })
    }

    async fn check_status_inner(&self, order_id: &str) -> Result<PaymentOutcome, GatewayError> {
        let raw = send_json(
            self.client
                .get(format!("{}/orders/{order_id}/payments", self.config.base_url))
                .basic_auth(&self.config.key_id, Some(&self.config.key_secret)),
        )
        .await?;

        let items = raw
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::InvalidResponse("payments response has no items".to_string()))?;

        Ok(outcome_from_payments(items))
    }

    /// Expected hex signature for a callback
    #[must_use]
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        sign_callback(&self.config.key_secret, order_id, payment_id)
    }
}

/// `hex(HMAC-SHA256(secret, "{order_id}|{payment_id}"))`
#[must_use]
pub fn sign_callback(secret: &str, order_id: &str, payment_id: &str) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(format!("{order_id}|{payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex callback signature.
#[must_use]
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{order_id}|{payment_id}").as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Any captured payment wins; all-failed is a failure; anything else is not known yet.
fn outcome_from_payments(items: &[Value]) -> PaymentOutcome {
    if let Some(captured) = items.iter().find(|p| str_field(p, "status") == Some(CAPTURED)) {
        if let Some(payment_id) = str_field(captured, "id") {
            return PaymentOutcome::Success {
                provider_payment_id: payment_id.to_string(),
                raw: captured.clone(),
            };
        }
    }

    let all_failed = !items.is_empty() && items.iter().all(|p| str_field(p, "status") == Some(FAILED));
    if all_failed {
        let last = items.last();
        let reason = last
            .and_then(|p| str_field(p, "error_description").or_else(|| str_field(p, "error_reason")))
            .unwrap_or("payment_failed");
        return PaymentOutcome::failure(reason);
    }

    PaymentOutcome::StillPending
}

impl PaymentGateway for SignedCallbackGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::SignedCallback
    }

    fn create_order<'a>(
        &'a self,
        amount: Money,
        intent: &'a BookingIntent,
        receipt: TransactionId,
    ) -> BoxFuture<'a, Result<OrderRef, GatewayError>> {
        Box::pin(self.create_order_inner(amount, intent, receipt))
    }

    fn check_status<'a>(&'a self, order_id: &'a str) -> BoxFuture<'a, Result<PaymentOutcome, GatewayError>> {
        Box::pin(self.check_status_inner(order_id))
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> PaymentOutcome {
        if !verify_signature(
            &self.config.key_secret,
            &payload.order_id,
            &payload.payment_id,
            &payload.signature,
        ) {
            tracing::warn!(
                order_id = %payload.order_id,
                payment_id = %payload.payment_id,
                "Callback signature mismatch"
            );
            return PaymentOutcome::failure(reasons::SIGNATURE_MISMATCH);
        }

        PaymentOutcome::Success {
            provider_payment_id: payload.payment_id.clone(),
            raw: json!({
                "order_id": payload.order_id,
                "payment_id": payload.payment_id,
                "source": "callback",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let signature = sign_callback("secret", "order_1", "pay_1");

        assert!(verify_signature("secret", "order_1", "pay_1", &signature));
        assert!(!verify_signature("secret", "order_1", "pay_2", &signature));
        assert!(!verify_signature("other", "order_1", "pay_1", &signature));
    }

    #[test]
    fn test_non_hex_signature_is_rejected() {
        assert!(!verify_signature("secret", "order_1", "pay_1", "not-hex"));
        assert!(!verify_signature("secret", "order_1", "pay_1", ""));
    }

    #[test]
    fn test_captured_payment_wins_over_failed_attempts() {
        let items = vec![
            json!({"id": "pay_1", "status": "failed", "error_description": "declined"}),
            json!({"id": "pay_2", "status": "captured"}),
        ];

        assert!(matches!(
            outcome_from_payments(&items),
            PaymentOutcome::Success { provider_payment_id, .. } if provider_payment_id == "pay_2"
        ));
    }

    #[test]
    fn test_all_failed_reports_provider_reason() {
        let items = vec![json!({"id": "pay_1", "status": "failed", "error_description": "Card declined by bank"})];

        assert_eq!(
            outcome_from_payments(&items),
            PaymentOutcome::failure("Card declined by bank")
        );
    }

    #[test]
    fn test_authorized_or_empty_is_still_pending() {
        assert_eq!(outcome_from_payments(&[]), PaymentOutcome::StillPending);
        assert_eq!(
            outcome_from_payments(&[json!({"id": "pay_1", "status": "authorized"})]),
            PaymentOutcome::StillPending
        );
    }
}
