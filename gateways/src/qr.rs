//! Poll-based QR provider.
//!
//! Requests are signed with a salted SHA-256 checksum header:
//!
//! ```text
//! X-VERIFY = hex(sha256(payload + path + salt_key)) + "###" + salt_index
//!
//! POST {base}/pg/v1/pay                       { "request": base64(json) }
//! GET  {base}/pg/v1/status/{merchant}/{order}  payload = ""
//! ```
//!
//! Completion is only observable by polling. Provider state tokens go through two
//! allow-lists; anything unrecognised is `StillPending`.

use crate::http::{send_json, str_field};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use studyhall_core::BoxFuture;
use studyhall_core::payment::{CallbackPayload, GatewayError, OrderRef, PaymentGateway, PaymentOutcome, reasons};
use studyhall_core::types::{BookingIntent, Money, PaymentMethod, TransactionId};

const PAY_PATH: &str = "/pg/v1/pay";

/// Tokens meaning money was captured
pub const SUCCESS_TOKENS: [&str; 4] = ["COMPLETED", "SUCCESS", "PAYMENT_SUCCESS", "PAID"];

/// Tokens meaning the payment definitely did not happen
pub const FAILURE_TOKENS: [&str; 5] = ["FAILED", "PAYMENT_ERROR", "DECLINED", "EXPIRED", "CANCELLED"];

/// Merchant credentials and endpoint for the QR provider
#[derive(Clone)]
pub struct QrConfig {
    /// Merchant id
    pub merchant_id: String,
    /// Checksum salt
    pub salt_key: String,
    /// Index of the salt key at the provider
    pub salt_index: u32,
    /// API base URL
    pub base_url: String,
}

impl std::fmt::Debug for QrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrConfig")
            .field("merchant_id", &self.merchant_id)
            .field("salt_key", &"<redacted>")
            .field("salt_index", &self.salt_index)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Adapter for the poll-only QR provider
#[derive(Clone, Debug)]
pub struct QrGateway {
    client: Client,
    config: QrConfig,
}

impl QrGateway {
    /// Creates an adapter sharing `client`
    #[must_use]
    pub const fn new(client: Client, config: QrConfig) -> Self {
        Self { client, config }
    }

    /// `X-VERIFY` header value for `payload` sent to `path`
    #[must_use]
    pub fn checksum(&self, payload: &str, path: &str) -> String {
        let digest = Sha256::digest(format!("{payload}{path}{}", self.config.salt_key).as_bytes());
        format!("{}###{}", hex::encode(digest), self.config.salt_index)
    }

    async fn create_order_inner(
        &self,
        amount: Money,
        intent: &BookingIntent,
        receipt: TransactionId,
    ) -> Result<OrderRef, GatewayError> {
        let order_id = receipt.to_string();
        let request = json!({
            "merchantId": self.config.merchant_id,
            "merchantTransactionId": order_id,
            "merchantUserId": intent.requester_id.to_string(),
            "amount": amount.paise(),
            "paymentInstrument": { "type": "UPI_QR" },
        });
        let encoded = BASE64.encode(request.to_string());

        let raw = send_json(
            self.client
                .post(format!("{}{PAY_PATH}", self.config.base_url))
                .header("X-VERIFY", self.checksum(&encoded, PAY_PATH))
                .json(&json!({ "request": encoded })),
        )
        .await?;

        if raw.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(GatewayError::Rejected {
                status: 200,
                message: str_field(&raw, "code").unwrap_or("UNKNOWN").to_string(),
            });
        }

        let data = raw.get("data").cloned().unwrap_or(Value::Null);
        let provider_order_id = str_field(&data, "merchantTransactionId")
            .unwrap_or(&order_id)
            .to_string();
        let qr_payload = data
            .pointer("/instrumentResponse/qrData")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidResponse("pay response has no qrData".to_string()))?
            .to_string();

        tracing::info!(order_id = %provider_order_id, amount = amount.paise(), "QR order created");

        Ok(OrderRef {
            provider_order_id,
            provider_public_key: qr_payload,
            raw,
        })
    }

    async fn check_status_inner(&self, order_id: &str) -> Result<PaymentOutcome, GatewayError> {
        let path = format!("/pg/v1/status/{}/{order_id}", self.config.merchant_id);
        let raw = send_json(
            self.client
                .get(format!("{}{path}", self.config.base_url))
                .header("X-VERIFY", self.checksum("", &path))
                .header("X-MERCHANT-ID", &self.config.merchant_id),
        )
        .await?;

        let outcome = outcome_from_status(&raw);
        tracing::debug!(order_id, outcome = outcome.label(), "QR status checked");
        Ok(outcome)
    }
}

/// Map a status response through the allow-lists.
fn outcome_from_status(raw: &Value) -> PaymentOutcome {
    let data = raw.get("data");
    let token = data
        .and_then(|d| str_field(d, "state"))
        .or_else(|| str_field(raw, "code"))
        .unwrap_or_default()
        .to_ascii_uppercase();

    if SUCCESS_TOKENS.contains(&token.as_str()) {
        let payment_id = data
            .and_then(|d| str_field(d, "transactionId"))
            .or_else(|| data.and_then(|d| str_field(d, "merchantTransactionId")));
        // success without a provider payment id is not trusted
        return match payment_id {
            Some(id) => PaymentOutcome::Success {
                provider_payment_id: id.to_string(),
                raw: raw.clone(),
            },
            None => PaymentOutcome::StillPending,
        };
    }

    if FAILURE_TOKENS.contains(&token.as_str()) {
        let reason = data
            .and_then(|d| str_field(d, "responseCode"))
            .unwrap_or(token.as_str());
        return PaymentOutcome::failure(reason);
    }

    PaymentOutcome::StillPending
}

impl PaymentGateway for QrGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Qr
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
        tracing::warn!(order_id = %payload.order_id, "Callback received for poll-only QR provider");
        PaymentOutcome::failure(reasons::CALLBACK_NOT_SUPPORTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: &str) -> Value {
        json!({
            "success": true,
            "code": "PAYMENT_PENDING",
            "data": { "state": state, "transactionId": "T123", "responseCode": "ZA" }
        })
    }

    #[test]
    fn test_success_tokens_map_to_success() {
        for token in SUCCESS_TOKENS {
            assert!(matches!(
                outcome_from_status(&status(token)),
                PaymentOutcome::Success { provider_payment_id, .. } if provider_payment_id == "T123"
            ));
        }
    }

    #[test]
    fn test_failure_tokens_carry_response_code() {
        for token in FAILURE_TOKENS {
            assert_eq!(outcome_from_status(&status(token)), PaymentOutcome::failure("ZA"));
        }
    }

    #[test]
    fn test_unknown_tokens_are_still_pending() {
        for token in ["PENDING", "INITIATED", "SUCCESSISH", ""] {
            assert_eq!(outcome_from_status(&status(token)), PaymentOutcome::StillPending);
        }
    }

    #[test]
    fn test_top_level_code_used_without_state() {
        let raw = json!({ "success": false, "code": "PAYMENT_ERROR", "data": {} });
        assert_eq!(outcome_from_status(&raw), PaymentOutcome::failure("PAYMENT_ERROR"));
    }

    #[test]
    fn test_checksum_shape() {
        let gateway = QrGateway::new(
            Client::new(),
            QrConfig {
                merchant_id: "M1".to_string(),
                salt_key: "salt".to_string(),
                salt_index: 1,
                base_url: "http://localhost".to_string(),
            },
        );

        let header = gateway.checksum("", "/pg/v1/status/M1/T1");
        let (digest, index) = header.split_once("###").unwrap_or_default();

        assert_eq!(digest.len(), 64);
        assert_eq!(index, "1");
    }

    #[test]
    fn test_callbacks_not_supported() {
        let gateway = QrGateway::new(
            Client::new(),
            QrConfig {
                merchant_id: "M1".to_string(),
                salt_key: "salt".to_string(),
                salt_index: 1,
                base_url: "http://localhost".to_string(),
            },
        );
        let payload = CallbackPayload {
            order_id: "T1".to_string(),
            payment_id: "P1".to_string(),
            signature: "00".to_string(),
        };

        assert_eq!(
            gateway.verify_callback(&payload),
            PaymentOutcome::failure(reasons::CALLBACK_NOT_SUPPORTED)
        );
    }
}
