//! HTTP surface tests against the in-memory store and a scripted provider.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use studyhall_core::availability::BookingPolicy;
use studyhall_core::environment::Clock;
use studyhall_core::payment::{GatewayRegistry, PaymentGateway, ProviderToggles};
use studyhall_core::store::BookingStore;
use studyhall_core::types::{Resource, ResourceStatus, TransactionId, TransactionStatus};
use studyhall_runtime::{BookingService, ReconcileConfig, ReconciliationEngine, Recovery, RetryPolicy};
use studyhall_testing::{InMemoryBookingStore, ManualClock, ScriptedGateway, fixtures, init_test_tracing};
use studyhall_web::{AppState, build_router};

struct TestApp {
    server: TestServer,
    store: Arc<InMemoryBookingStore>,
    gateway: Arc<ScriptedGateway>,
    seat: Resource,
}

fn app_with(toggles: ProviderToggles) -> TestApp {
    init_test_tracing();
    let store = Arc::new(InMemoryBookingStore::new());
    let seat = fixtures::seat(fixtures::weekly_table());
    store.add_resource(seat.clone());

    let gateway = Arc::new(ScriptedGateway::signed_callback());
    let registry = GatewayRegistry::new().with(Arc::clone(&gateway) as Arc<dyn PaymentGateway>);
    let dyn_store: Arc<dyn BookingStore> = Arc::clone(&store) as Arc<dyn BookingStore>;
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at_epoch());

    let bookings = BookingService::new(
        Arc::clone(&dyn_store),
        registry.clone(),
        Arc::clone(&clock),
        BookingPolicy::default(),
    );
    let config = ReconcileConfig {
        status_timeout: Duration::from_millis(50),
        retry: RetryPolicy::none(),
        ..ReconcileConfig::default()
    };
    let engine = ReconciliationEngine::new(dyn_store, registry, clock, config);
    let recovery = Recovery::new(engine.clone(), 4);
    let state = AppState::new(bookings, engine, recovery).with_toggles(toggles);

    TestApp {
        server: TestServer::new(build_router(state)).unwrap(),
        store,
        gateway,
        seat,
    }
}

fn app() -> TestApp {
    app_with(ProviderToggles::ALL)
}

impl TestApp {
    fn order_body(&self) -> Value {
        json!({
            "intent": {
                "resource_id": self.seat.id,
                "requester_id": uuid::Uuid::new_v4(),
                "start_date": "2024-01-01",
                "end_date": "2024-01-07",
            },
            "method": "signed_callback",
        })
    }

    async fn create_order(&self) -> Value {
        let response = self.server.post("/api/v1/payments/orders").json(&self.order_body()).await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()
    }
}

#[tokio::test]
async fn health_reports_enabled_providers() {
    let app = app();

    let response = app.server.get("/health").await;

    response.assert_status_ok();
    response.assert_json(&json!({ "status": "ok", "providers": ["signed_callback"] }));
}

#[tokio::test]
async fn quote_returns_weekly_tier() {
    let app = app();

    let response = app
        .server
        .post("/api/v1/quotes")
        .json(&json!({
            "resource_id": app.seat.id,
            "start_date": "2024-01-01",
            "end_date": "2024-01-07",
        }))
        .await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["amount"], 50_000);
    assert_eq!(body["tier_used"], "weekly");
    assert_eq!(body["days"], 7);
    assert_eq!(body["units"], 1);
}

#[tokio::test]
async fn inverted_range_is_422() {
    let app = app();

    let response = app
        .server
        .post("/api/v1/quotes")
        .json(&json!({
            "resource_id": app.seat.id,
            "start_date": "2024-01-07",
            "end_date": "2024-01-01",
        }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "INVALID_DATE_RANGE");
}

#[tokio::test]
async fn unpriced_resource_is_422() {
    let app = app();
    let bare = fixtures::seat(studyhall_core::pricing::PriceTable::new());
    app.store.add_resource(bare.clone());

    let response = app
        .server
        .post("/api/v1/quotes")
        .json(&json!({
            "resource_id": bare.id,
            "start_date": "2024-01-01",
            "end_date": "2024-01-03",
        }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "NO_PRICING_AVAILABLE");
}

#[tokio::test]
async fn second_hold_on_same_dates_is_409() {
    let app = app();
    let body = json!({
        "resource_id": app.seat.id,
        "requester_id": uuid::Uuid::new_v4(),
        "start_date": "2024-01-01",
        "end_date": "2024-01-07",
    });

    let first = app.server.post("/api/v1/bookings").json(&body).await;
    first.assert_status(StatusCode::CREATED);
    let created = first.json::<Value>();
    assert_eq!(created["status"], "pending");
    assert_eq!(created["payment_status"], "unpaid");
    assert_eq!(created["amount"], 50_000);

    let second = app.server.post("/api/v1/bookings").json(&body).await;
    second.assert_status(StatusCode::CONFLICT);
    assert_eq!(second.json::<Value>()["code"], "DATE_CONFLICT");
}

#[tokio::test]
async fn hold_on_retired_resource_is_409_unavailable() {
    let app = app();
    app.store.set_resource_status(app.seat.id, ResourceStatus::Retired);

    let response = app
        .server
        .post("/api/v1/bookings")
        .json(&json!({
            "resource_id": app.seat.id,
            "requester_id": uuid::Uuid::new_v4(),
            "start_date": "2024-01-01",
            "end_date": "2024-01-07",
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "RESOURCE_UNAVAILABLE");
}

#[tokio::test]
async fn availability_excludes_own_hold() {
    let app = app();
    let hold = app
        .server
        .post("/api/v1/bookings")
        .json(&json!({
            "resource_id": app.seat.id,
            "requester_id": uuid::Uuid::new_v4(),
            "start_date": "2024-01-01",
            "end_date": "2024-01-07",
        }))
        .await
        .json::<Value>();
    let path = format!("/api/v1/resources/{}/availability", app.seat.id);

    let taken = app
        .server
        .get(&path)
        .add_query_param("start_date", "2024-01-03")
        .add_query_param("end_date", "2024-01-04")
        .await;
    taken.assert_json(&json!({ "available": false }));

    let own = app
        .server
        .get(&path)
        .add_query_param("start_date", "2024-01-03")
        .add_query_param("end_date", "2024-01-04")
        .add_query_param("exclude_reservation_id", hold["reservation_id"].as_str().unwrap())
        .await;
    own.assert_json(&json!({ "available": true }));
}

#[tokio::test]
async fn order_then_signed_callback_completes() {
    let app = app();
    let order = app.create_order().await;
    assert_eq!(order["amount"], 50_000);
    assert_eq!(order["provider_public_key"], "scripted_key");
    let order_id = order["provider_order_id"].as_str().unwrap();

    let response = app
        .server
        .post("/api/v1/payments/callback")
        .json(&ScriptedGateway::signed_payload(order_id, "pay_1"))
        .await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["outcome"], "completed");
    assert!(body["booking_number"].is_string());

    let transaction_id = order["transaction_id"].as_str().unwrap();
    let view = app
        .server
        .get(&format!("/api/v1/transactions/{transaction_id}"))
        .await
        .json::<Value>();
    assert_eq!(view["status"], "completed");
    assert_eq!(view["reservation_id"], body["reservation_id"]);
    assert!(view.get("provider_payload").is_none());

    // Duplicate callback is a no-op
    let again = app
        .server
        .post("/api/v1/payments/callback")
        .json(&ScriptedGateway::signed_payload(order_id, "pay_1"))
        .await;
    again.assert_status_ok();
    assert_eq!(again.json::<Value>()["outcome"], "already_final");
}

#[tokio::test]
async fn tampered_callback_is_401_and_stays_pending() {
    let app = app();
    let order = app.create_order().await;
    let order_id = order["provider_order_id"].as_str().unwrap();
    let mut payload = ScriptedGateway::signed_payload(order_id, "pay_1");
    payload.payment_id = "pay_forged".to_string();

    let response = app.server.post("/api/v1/payments/callback").json(&payload).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["code"], "CALLBACK_REJECTED");
    assert!(app.store.reservations().is_empty());
    let id = order["transaction_id"].as_str().unwrap();
    let tx = app
        .store
        .transaction(TransactionId::from_uuid(id.parse().unwrap()))
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn callback_for_unknown_order_is_404() {
    let app = app();

    let response = app
        .server
        .post("/api/v1/payments/callback")
        .json(&ScriptedGateway::signed_payload("order_nobody", "pay_1"))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "UNKNOWN_ORDER");
}

#[tokio::test]
async fn poll_reports_pending_then_completed() {
    let app = app();
    let order = app.create_order().await;
    let path = format!("/api/v1/payments/{}/poll", order["transaction_id"].as_str().unwrap());

    let pending = app.server.post(&path).await;
    pending.assert_status_ok();
    assert_eq!(pending.json::<Value>()["outcome"], "still_pending");

    app.gateway.succeed_with("pay_late");
    let done = app.server.post(&path).await;
    assert_eq!(done.json::<Value>()["outcome"], "completed");
}

#[tokio::test]
async fn amount_mismatch_is_422() {
    let app = app();
    let mut body = app.order_body();
    body["amount"] = json!(49_900);

    let response = app.server.post("/api/v1/payments/orders").json(&body).await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "AMOUNT_MISMATCH");
    assert_eq!(app.gateway.orders_created(), 0);
}

#[tokio::test]
async fn disabled_provider_refuses_new_orders() {
    let app = app_with(ProviderToggles {
        signed_callback: false,
        qr: true,
    });

    let response = app.server.post("/api/v1/payments/orders").json(&app.order_body()).await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "PROVIDER_DISABLED");
}

#[tokio::test]
async fn unknown_transaction_is_404() {
    let app = app();

    let response = app
        .server
        .get(&format!("/api/v1/transactions/{}", uuid::Uuid::new_v4()))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "TRANSACTION_NOT_FOUND");
}

#[tokio::test]
async fn admin_recovers_pending_transactions() {
    let app = app();
    let first = app.create_order().await;
    let mut later = app.order_body();
    later["intent"]["start_date"] = json!("2024-02-01");
    later["intent"]["end_date"] = json!("2024-02-07");
    app.server
        .post("/api/v1/payments/orders")
        .json(&later)
        .await
        .assert_status(StatusCode::CREATED);
    app.gateway.succeed_with("pay_recovered");

    let one = app
        .server
        .post(&format!(
            "/api/v1/admin/transactions/{}/reconcile",
            first["transaction_id"].as_str().unwrap()
        ))
        .await;
    assert_eq!(one.json::<Value>()["outcome"], "completed");

    let report = app
        .server
        .post("/api/v1/admin/transactions/reconcile-pending")
        .await
        .json::<Value>();
    assert_eq!(report["examined"], 1);
    assert_eq!(report["completed"], 1);
    assert_eq!(app.store.reservations().len(), 2);
}

#[tokio::test]
async fn responses_carry_correlation_id() {
    let app = app();

    let response = app.server.get("/health").await;

    let header = response.header(studyhall_web::CORRELATION_ID_HEADER);
    assert!(uuid::Uuid::parse_str(header.to_str().unwrap()).is_ok());
}
