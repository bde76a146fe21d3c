//! HTTP-level tests for the provider adapters against a wiremock server.

#![allow(clippy::unwrap_used)]

use chrono::NaiveDate;
use serde_json::json;
use std::time::Duration;
use studyhall_core::payment::{CallbackPayload, GatewayError, PaymentGateway, PaymentOutcome, reasons};
use studyhall_core::types::{BookingIntent, DateRange, Money, RequesterId, ResourceId, TransactionId};
use studyhall_gateways::{QrConfig, QrGateway, SignedCallbackConfig, SignedCallbackGateway, sign_callback};
use wiremock::matchers::{basic_auth, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn intent() -> BookingIntent {
    BookingIntent {
        resource_id: ResourceId::new(),
        requester_id: RequesterId::new(),
        range: DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        )
        .unwrap(),
        hold_id: None,
    }
}

fn signed_gateway(server: &MockServer, timeout: Duration) -> SignedCallbackGateway {
    let client = reqwest::Client::builder().timeout(timeout).build().unwrap();
    SignedCallbackGateway::new(
        client,
        SignedCallbackConfig {
            key_id: "key_live".to_string(),
            key_secret: "s3cret".to_string(),
            base_url: server.uri(),
        },
    )
}

fn qr_gateway(server: &MockServer) -> QrGateway {
    QrGateway::new(
        reqwest::Client::new(),
        QrConfig {
            merchant_id: "MERCHANT".to_string(),
            salt_key: "salt".to_string(),
            salt_index: 1,
            base_url: server.uri(),
        },
    )
}

#[tokio::test]
async fn test_signed_create_order_uses_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(basic_auth("key_live", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_abc",
            "amount": 50_000,
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = signed_gateway(&server, Duration::from_secs(5));
    let order = gateway
        .create_order(Money::from_rupees(500), &intent(), TransactionId::new())
        .await
        .unwrap();

    assert_eq!(order.provider_order_id, "order_abc");
    assert_eq!(order.provider_public_key, "key_live");
}

#[tokio::test]
async fn test_signed_status_captured_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/order_abc/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": "pay_1", "status": "captured" }]
        })))
        .mount(&server)
        .await;

    let outcome = signed_gateway(&server, Duration::from_secs(5))
        .check_status("order_abc")
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        PaymentOutcome::Success { provider_payment_id, .. } if provider_payment_id == "pay_1"
    ));
}

#[tokio::test]
async fn test_signed_status_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/order_slow/payments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "items": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = signed_gateway(&server, Duration::from_millis(50))
        .check_status("order_slow")
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::Timeout);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_signed_status_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/order_abc/payments"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = signed_gateway(&server, Duration::from_secs(5))
        .check_status("order_abc")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Rejected { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_signed_callback_tampering_fails_closed() {
    let server = MockServer::start().await;
    let gateway = signed_gateway(&server, Duration::from_secs(5));
    let signature = sign_callback("s3cret", "order_abc", "pay_1");

    let genuine = CallbackPayload {
        order_id: "order_abc".to_string(),
        payment_id: "pay_1".to_string(),
        signature: signature.clone(),
    };
    let tampered = CallbackPayload {
        payment_id: "pay_2".to_string(),
        ..genuine.clone()
    };

    assert!(matches!(gateway.verify_callback(&genuine), PaymentOutcome::Success { .. }));
    assert_eq!(
        gateway.verify_callback(&tampered),
        PaymentOutcome::failure(reasons::SIGNATURE_MISMATCH)
    );
}

#[tokio::test]
async fn test_qr_create_order_returns_qr_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pg/v1/pay"))
        .and(header_exists("X-VERIFY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": "PAYMENT_INITIATED",
            "data": {
                "merchantTransactionId": "T-1",
                "instrumentResponse": { "qrData": "upi://pay?pa=studyhall@bank" }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = qr_gateway(&server)
        .create_order(Money::from_rupees(500), &intent(), TransactionId::new())
        .await
        .unwrap();

    assert_eq!(order.provider_order_id, "T-1");
    assert_eq!(order.provider_public_key, "upi://pay?pa=studyhall@bank");
}

#[tokio::test]
async fn test_qr_status_maps_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pg/v1/status/MERCHANT/T-paid"))
        .and(header_exists("X-VERIFY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": "PAYMENT_SUCCESS",
            "data": { "state": "COMPLETED", "transactionId": "P-99" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pg/v1/status/MERCHANT/T-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": "PAYMENT_PENDING",
            "data": { "state": "AWAITING_SCAN" }
        })))
        .mount(&server)
        .await;

    let gateway = qr_gateway(&server);

    assert!(matches!(
        gateway.check_status("T-paid").await.unwrap(),
        PaymentOutcome::Success { provider_payment_id, .. } if provider_payment_id == "P-99"
    ));
    assert_eq!(
        gateway.check_status("T-new").await.unwrap(),
        PaymentOutcome::StillPending
    );
}

#[tokio::test]
async fn test_qr_unauthorized_is_definite() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pg/v1/status/MERCHANT/T-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = qr_gateway(&server).check_status("T-1").await.unwrap_err();

    assert_eq!(err, GatewayError::Unauthorized);
    assert!(!err.is_transient());
}
