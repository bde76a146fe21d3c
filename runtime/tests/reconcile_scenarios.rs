//! End-to-end booking and reconciliation scenarios against the in-memory store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use studyhall_core::availability::BookingPolicy;
use studyhall_core::environment::Clock;
use studyhall_core::error::{BookingError, StoreError};
use studyhall_core::payment::{GatewayError, GatewayRegistry, PaymentGateway, PaymentOutcome, ProviderToggles};
use studyhall_core::store::BookingStore;
use studyhall_core::types::{
    BookingIntent, Money, PaymentMethod, PaymentStatus, RequesterId, Reservation, ReservationId, ReservationStatus,
    Resource, Transaction, TransactionId, TransactionStatus,
};
use studyhall_runtime::{
    BookingService, Evidence, OrderError, OrderRequest, PaymentOrder, ReconcileConfig, ReconcileError,
    ReconcileOutcome, ReconciliationEngine, Recovery, RetryPolicy, SweepConfig, Sweeper, Trigger,
};
use studyhall_testing::{InMemoryBookingStore, ManualClock, ScriptedGateway, fixtures, init_test_tracing};

struct Harness {
    store: Arc<InMemoryBookingStore>,
    gateway: Arc<ScriptedGateway>,
    clock: Arc<ManualClock>,
    service: BookingService,
    engine: ReconciliationEngine,
    seat: Resource,
}

fn harness_with(gateway: ScriptedGateway, resource: Resource) -> Harness {
    init_test_tracing();
    let store = Arc::new(InMemoryBookingStore::new());
    store.add_resource(resource.clone());
    let gateway = Arc::new(gateway);
    let clock = Arc::new(ManualClock::starting_at_epoch());

    let dyn_store: Arc<dyn BookingStore> = Arc::clone(&store) as Arc<dyn BookingStore>;
    let dyn_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
    let registry = GatewayRegistry::new().with(Arc::clone(&gateway) as Arc<dyn PaymentGateway>);

    let service = BookingService::new(
        Arc::clone(&dyn_store),
        registry.clone(),
        Arc::clone(&dyn_clock),
        BookingPolicy::default(),
    );
    let config = ReconcileConfig {
        status_timeout: Duration::from_millis(50),
        retry: RetryPolicy::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .build(),
        ..ReconcileConfig::default()
    };
    let engine = ReconciliationEngine::new(dyn_store, registry, dyn_clock, config);

    Harness {
        store,
        gateway,
        clock,
        service,
        engine,
        seat: resource,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedGateway::signed_callback(), fixtures::seat(fixtures::weekly_table()))
}

impl Harness {
    fn intent(&self) -> BookingIntent {
        fixtures::intent(self.seat.id, fixtures::first_week())
    }

    async fn order(&self, intent: BookingIntent) -> PaymentOrder {
        self.service
            .create_payment_order(
                OrderRequest {
                    intent,
                    method: self.gateway.method(),
                    amount: None,
                },
                ProviderToggles::ALL,
            )
            .await
            .expect("order should be created")
    }

    async fn poll(&self, id: TransactionId) -> ReconcileOutcome {
        self.engine
            .reconcile(id, Evidence::Poll, Trigger::ClientPoll)
            .await
            .expect("reconcile should not error")
    }

    fn transaction(&self, id: TransactionId) -> Transaction {
        self.store.transaction(id).expect("transaction should exist")
    }

    fn paid(&self) -> Vec<Reservation> {
        self.store
            .reservations_for(self.seat.id)
            .into_iter()
            .filter(|r| r.payment_status == PaymentStatus::Paid)
            .collect()
    }
}

fn paid_reservation(resource: &Resource, intent: &BookingIntent, harness: &Harness) -> Reservation {
    let now = harness.clock.now();
    Reservation {
        id: ReservationId::new(),
        booking_number: "BK-OTHER-000001".to_string(),
        resource_id: resource.id,
        requester_id: RequesterId::new(),
        range: intent.range,
        amount: Money::from_rupees(500),
        status: ReservationStatus::Confirmed,
        payment_status: PaymentStatus::Paid,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_happy_path_weekly_booking() {
    let h = harness();

    let quote = h.service.quote(h.seat.id, fixtures::first_week()).await.unwrap();
    assert_eq!(quote.amount, Money::from_rupees(500));

    let mut intent = h.intent();
    let hold = h.service.create_booking(intent.clone()).await.unwrap();
    assert_eq!(hold.status, ReservationStatus::Pending);
    assert_eq!(hold.payment_status, PaymentStatus::Unpaid);
    assert_eq!(hold.amount, Money::from_rupees(500));

    intent.hold_id = Some(hold.id);
    let order = h
        .service
        .create_payment_order(
            OrderRequest {
                intent,
                method: PaymentMethod::SignedCallback,
                amount: Some(Money::from_rupees(500)),
            },
            ProviderToggles::ALL,
        )
        .await
        .unwrap();
    assert_eq!(order.transaction.status, TransactionStatus::Pending);
    assert_eq!(order.transaction.amount, Money::from_rupees(500));

    let payload = ScriptedGateway::signed_payload(&order.transaction.external_order_id, "pay_1");
    let (id, outcome) = h.engine.on_callback(payload).await.unwrap();

    assert_eq!(id, order.transaction.id);
    assert!(matches!(outcome, ReconcileOutcome::Completed { reservation_id, .. } if reservation_id == hold.id));

    let transaction = h.transaction(id);
    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert_eq!(transaction.reservation_id, Some(hold.id));
    assert_eq!(transaction.provider_payment_id.as_deref(), Some("pay_1"));

    let paid = h.paid();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].id, hold.id);
    assert_eq!(paid[0].status, ReservationStatus::Confirmed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_have_one_winner() {
    let h = harness();
    let first = {
        let service = h.service.clone();
        let intent = h.intent();
        tokio::spawn(async move { service.create_booking(intent).await })
    };
    let second = {
        let service = h.service.clone();
        let intent = h.intent();
        tokio::spawn(async move { service.create_booking(intent).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::DateConflict { .. })))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(h.store.reservations_for(h.seat.id).len(), 1);
}

#[tokio::test]
async fn test_late_success_settles_through_sweep() {
    let h = harness();
    let order = h.order(h.intent()).await;
    let sweeper = Sweeper::new(h.engine.clone(), SweepConfig::default());

    // Too fresh to sweep
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.examined, 0);

    h.clock.advance(TimeDelta::minutes(10));
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.still_pending, 1);

    h.gateway.succeed_with("pay_late");
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.completed, 1);

    let transaction = h.transaction(order.transaction.id);
    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert_eq!(h.paid().len(), 1);

    // Nothing left to sweep
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_tampered_callback_is_rejected_and_left_pending() {
    let h = harness();
    let order = h.order(h.intent()).await;

    let mut payload = ScriptedGateway::signed_payload(&order.transaction.external_order_id, "pay_1");
    payload.payment_id = "pay_forged".to_string();
    let (_, outcome) = h.engine.on_callback(payload).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::CallbackRejected {
            reason: "signature_mismatch".to_string()
        }
    );
    assert_eq!(h.transaction(order.transaction.id).status, TransactionStatus::Pending);
    assert!(h.paid().is_empty());
}

#[tokio::test]
async fn test_payment_after_resource_taken_is_refund_pending() {
    let h = harness();
    let intent = h.intent();
    let order = h.order(intent.clone()).await;

    h.store.seed_reservation(paid_reservation(&h.seat, &intent, &h));
    h.gateway.succeed_with("pay_1");

    let outcome = h.poll(order.transaction.id).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Failed {
            reason: "resource_no_longer_available".to_string(),
            refund_pending: true,
        }
    );

    let transaction = h.transaction(order.transaction.id);
    assert_eq!(transaction.status, TransactionStatus::Failed);
    assert!(transaction.refund_pending);
    assert_eq!(transaction.reservation_id, None);
    assert_eq!(h.paid().len(), 1);
}

#[tokio::test]
async fn test_second_reconcile_writes_nothing() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.succeed_with("pay_1");

    let first = h.poll(order.transaction.id).await;
    assert!(matches!(first, ReconcileOutcome::Completed { .. }));

    let writes = h.store.write_calls();
    let second = h.poll(order.transaction.id).await;

    assert_eq!(second, ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed));
    assert_eq!(h.store.write_calls(), writes);
    assert_eq!(h.paid().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconciles_settle_once() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.succeed_with("pay_1");
    let id = order.transaction.id;
    let payload = ScriptedGateway::signed_payload(&order.transaction.external_order_id, "pay_1");

    let mut handles = Vec::new();
    for n in 0..4 {
        let engine = h.engine.clone();
        let evidence = if n % 2 == 0 {
            Evidence::Callback(payload.clone())
        } else {
            Evidence::Poll
        };
        handles.push(tokio::spawn(async move {
            engine.reconcile(id, evidence, Trigger::Callback).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReconcileOutcome::Completed { .. } => completed += 1,
            ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(h.paid().len(), 1);
    assert!(h.transaction(id).reservation_id.is_some());
}

#[tokio::test]
async fn test_provider_failure_is_recorded_verbatim() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.push_status(Ok(PaymentOutcome::failure("card_declined")));

    let outcome = h.poll(order.transaction.id).await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Failed {
            reason: "card_declined".to_string(),
            refund_pending: false,
        }
    );
    let transaction = h.transaction(order.transaction.id);
    assert_eq!(transaction.failure_reason.as_deref(), Some("card_declined"));
    assert!(!transaction.refund_pending);
}

#[tokio::test]
async fn test_slow_provider_stays_pending_after_retries() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.delay_status(Duration::from_millis(200));
    h.gateway.succeed_with("pay_1");

    let outcome = h.poll(order.transaction.id).await;

    assert_eq!(outcome, ReconcileOutcome::StillPending);
    assert_eq!(h.gateway.status_calls(), 3);
    assert_eq!(h.transaction(order.transaction.id).status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_transient_error_then_success() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.push_status(Err(GatewayError::Rejected {
        status: 503,
        message: "unavailable".to_string(),
    }));
    h.gateway.succeed_with("pay_1");

    let outcome = h.poll(order.transaction.id).await;

    assert!(matches!(outcome, ReconcileOutcome::Completed { .. }));
    assert_eq!(h.gateway.status_calls(), 2);
}

#[tokio::test]
async fn test_definite_provider_error_is_not_retried() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.push_status(Err(GatewayError::Unauthorized));

    let outcome = h.poll(order.transaction.id).await;

    assert_eq!(outcome, ReconcileOutcome::StillPending);
    assert_eq!(h.gateway.status_calls(), 1);
}

#[tokio::test]
async fn test_old_pending_payment_is_never_auto_failed() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.clock.advance(TimeDelta::hours(30));

    let outcome = h.poll(order.transaction.id).await;

    assert_eq!(outcome, ReconcileOutcome::StillPending);
    assert_eq!(h.transaction(order.transaction.id).status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_pending_transaction_with_link_is_drift() {
    let h = harness();
    let order = h.order(h.intent()).await;
    let mut drifted = h.transaction(order.transaction.id);
    drifted.reservation_id = Some(ReservationId::new());
    h.store.seed_transaction(drifted.clone());
    h.gateway.succeed_with("pay_1");
    let writes = h.store.write_calls();

    let outcome = h.poll(drifted.id).await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Drift {
            reservation_id: drifted.reservation_id.unwrap()
        }
    );
    assert_eq!(h.store.write_calls(), writes);
    assert!(h.paid().is_empty());
}

#[tokio::test]
async fn test_qr_callbacks_are_not_accepted() {
    let h = harness_with(ScriptedGateway::qr(), fixtures::seat(fixtures::weekly_table()));
    let order = h.order(h.intent()).await;
    let payload = ScriptedGateway::signed_payload(&order.transaction.external_order_id, "pay_1");

    let (_, outcome) = h.engine.on_callback(payload).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::CallbackRejected {
            reason: "callback_not_supported".to_string()
        }
    );
}

#[tokio::test]
async fn test_cabin_settles_active() {
    let h = harness_with(ScriptedGateway::signed_callback(), fixtures::cabin(fixtures::weekly_table()));
    let order = h.order(h.intent()).await;
    h.gateway.succeed_with("pay_1");

    let outcome = h.poll(order.transaction.id).await;

    assert!(matches!(outcome, ReconcileOutcome::Completed { .. }));
    assert_eq!(h.paid()[0].status, ReservationStatus::Active);
}

#[tokio::test]
async fn test_unknown_order_callback() {
    let h = harness();
    let payload = ScriptedGateway::signed_payload("order_missing", "pay_1");

    let err = h.engine.on_callback(payload).await.unwrap_err();

    assert_eq!(err, ReconcileError::UnknownOrder("order_missing".to_string()));
}

#[tokio::test]
async fn test_disabled_provider_rejects_new_orders_only() {
    let h = harness();
    let order = h.order(h.intent()).await;
    let toggles = ProviderToggles {
        signed_callback: false,
        qr: true,
    };

    let err = h
        .service
        .create_payment_order(
            OrderRequest {
                intent: fixtures::intent(h.seat.id, fixtures::range("2024-02-01", "2024-02-07")),
                method: PaymentMethod::SignedCallback,
                amount: None,
            },
            toggles,
        )
        .await
        .unwrap_err();
    assert_eq!(err, OrderError::Gateway(GatewayError::Disabled(PaymentMethod::SignedCallback)));

    h.gateway.succeed_with("pay_1");
    assert!(matches!(h.poll(order.transaction.id).await, ReconcileOutcome::Completed { .. }));
}

#[tokio::test]
async fn test_client_amount_must_match_quote() {
    let h = harness();

    let err = h
        .service
        .create_payment_order(
            OrderRequest {
                intent: h.intent(),
                method: PaymentMethod::SignedCallback,
                amount: Some(Money::from_rupees(1)),
            },
            ProviderToggles::ALL,
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        OrderError::AmountMismatch {
            quoted: Money::from_rupees(500),
            supplied: Money::from_rupees(1),
        }
    );
    assert_eq!(h.gateway.orders_created(), 0);
}

#[tokio::test]
async fn test_order_for_taken_range_is_refused() {
    let h = harness();
    let intent = h.intent();
    h.store.seed_reservation(paid_reservation(&h.seat, &intent, &h));

    let err = h
        .service
        .create_payment_order(
            OrderRequest {
                intent,
                method: PaymentMethod::SignedCallback,
                amount: None,
            },
            ProviderToggles::ALL,
        )
        .await
        .unwrap_err();

    assert_eq!(err, OrderError::Booking(BookingError::DateConflict { resource_id: h.seat.id }));
    assert_eq!(h.gateway.orders_created(), 0);
}

#[tokio::test]
async fn test_recover_all_pending_ignores_age() {
    let h = harness();
    let first = h.order(h.intent()).await;
    let second = h
        .order(fixtures::intent(h.seat.id, fixtures::range("2024-03-01", "2024-03-07")))
        .await;
    h.gateway.succeed_with("pay_1");
    let recovery = Recovery::new(h.engine.clone(), 2);

    let report = recovery.recover_all_pending(10).await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(h.transaction(first.transaction.id).status, TransactionStatus::Completed);
    assert_eq!(h.transaction(second.transaction.id).status, TransactionStatus::Completed);

    let again = recovery.recover(first.transaction.id).await.unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed));
}

#[tokio::test]
async fn test_reconcile_missing_transaction() {
    let h = harness();
    let missing = TransactionId::new();

    let err = h
        .engine
        .reconcile(missing, Evidence::Poll, Trigger::Manual)
        .await
        .unwrap_err();

    assert_eq!(err, ReconcileError::TransactionNotFound(missing));
}

#[tokio::test]
async fn test_unresolved_transactions_do_not_starve_the_sweep() {
    let h = harness();
    let stuck_a = h.order(h.intent()).await;
    let stuck_b = h
        .order(fixtures::intent(h.seat.id, fixtures::range("2024-02-01", "2024-02-07")))
        .await;
    h.clock.advance(TimeDelta::minutes(1));
    let paid = h
        .order(fixtures::intent(h.seat.id, fixtures::range("2024-03-01", "2024-03-07")))
        .await;
    h.gateway
        .set_status_for(&paid.transaction.external_order_id, Ok(studyhall_testing::gateway::success("pay_c")));
    h.clock.advance(TimeDelta::minutes(10));

    let sweeper = Sweeper::new(
        h.engine.clone(),
        SweepConfig {
            batch_size: 2,
            concurrency: 1,
            ..SweepConfig::default()
        },
    );

    let first = sweeper.run_once().await.unwrap();
    assert_eq!(first.still_pending, 2);
    assert!(h.store.last_checked(stuck_a.transaction.id).is_some());
    assert!(h.store.last_checked(stuck_b.transaction.id).is_some());

    h.clock.advance(TimeDelta::minutes(1));
    let second = sweeper.run_once().await.unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(h.transaction(paid.transaction.id).status, TransactionStatus::Completed);
    assert_eq!(h.transaction(stuck_a.transaction.id).status, TransactionStatus::Pending);
    assert_eq!(h.transaction(stuck_b.transaction.id).status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_recover_all_pending_works_past_unresolved() {
    let h = harness();
    let stuck = h.order(h.intent()).await;
    h.clock.advance(TimeDelta::minutes(1));
    let paid = h
        .order(fixtures::intent(h.seat.id, fixtures::range("2024-03-01", "2024-03-07")))
        .await;
    h.gateway
        .set_status_for(&paid.transaction.external_order_id, Ok(studyhall_testing::gateway::success("pay_2")));
    let recovery = Recovery::new(h.engine.clone(), 1);

    let first = recovery.recover_all_pending(1).await.unwrap();
    assert_eq!(first.still_pending, 1);

    let second = recovery.recover_all_pending(1).await.unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(h.transaction(paid.transaction.id).status, TransactionStatus::Completed);
    assert_eq!(h.transaction(stuck.transaction.id).status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_transient_storage_error_during_settle_is_retried() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.store
        .fail_next_settle(BookingError::Store(StoreError::Transient("40001 serialization failure".into())));

    let payload = ScriptedGateway::signed_payload(&order.transaction.external_order_id, "pay_1");
    let (_, outcome) = h.engine.on_callback(payload).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Completed { .. }));
    assert_eq!(h.transaction(order.transaction.id).status, TransactionStatus::Completed);
    assert_eq!(h.paid().len(), 1);
}

#[tokio::test]
async fn test_transient_storage_error_during_fail_is_retried() {
    let h = harness();
    let order = h.order(h.intent()).await;
    h.gateway.push_status(Ok(PaymentOutcome::failure("card_declined")));
    h.store.fail_next_mark_failed(StoreError::Transient("pool timed out".into()));

    let outcome = h.poll(order.transaction.id).await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Failed {
            reason: "card_declined".to_string(),
            refund_pending: false,
        }
    );
}

#[tokio::test]
async fn test_persistent_storage_error_is_returned() {
    let h = harness();
    let order = h.order(h.intent()).await;
    for _ in 0..3 {
        h.store.fail_next_settle(BookingError::Store(StoreError::Transient("pool timed out".into())));
    }

    let payload = ScriptedGateway::signed_payload(&order.transaction.external_order_id, "pay_1");
    let err = h.engine.on_callback(payload).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(h.transaction(order.transaction.id).status, TransactionStatus::Pending);
    assert!(h.paid().is_empty());
}

#[tokio::test]
async fn test_order_naming_someone_elses_reservation_is_refused() {
    let h = harness();
    let mut intent = h.intent();
    let taken = paid_reservation(&h.seat, &intent, &h);
    intent.hold_id = Some(taken.id);
    h.store.seed_reservation(taken);

    let err = h
        .service
        .create_payment_order(
            OrderRequest {
                intent,
                method: PaymentMethod::SignedCallback,
                amount: None,
            },
            ProviderToggles::ALL,
        )
        .await
        .unwrap_err();

    assert_eq!(err, OrderError::Booking(BookingError::DateConflict { resource_id: h.seat.id }));
    assert_eq!(h.gateway.orders_created(), 0);
}

#[tokio::test]
async fn test_order_naming_another_requesters_hold_is_refused() {
    let h = harness();
    let hold = h.service.create_booking(h.intent()).await.unwrap();

    let mut intent = h.intent();
    intent.hold_id = Some(hold.id);
    let err = h
        .service
        .create_payment_order(
            OrderRequest {
                intent,
                method: PaymentMethod::SignedCallback,
                amount: None,
            },
            ProviderToggles::ALL,
        )
        .await
        .unwrap_err();

    assert_eq!(err, OrderError::Booking(BookingError::DateConflict { resource_id: h.seat.id }));
}
