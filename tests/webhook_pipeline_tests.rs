//! Webhook pipeline scenarios: normalized provider events flowing through
//! dedup and dispatch into the lifecycle.

mod support;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use payment_service::domain::events::{LifecycleEventKind, ProviderEvent};
use payment_service::domain::payment::{PaymentStatus, Provider};
use payment_service::events::consumer::process_provider_event;
use payment_service::webhooks::normalize::normalize;

use support::{harness, order_of};

fn captured_event(provider_order_id: &str, event_id: &str) -> ProviderEvent {
    let payload = json!({
        "event": "payment.captured",
        "created_at": Utc::now().timestamp(),
        "payload": { "payment": { "entity": {
            "id": "pay_1",
            "order_id": provider_order_id,
            "status": "captured"
        }}}
    });
    normalize(Provider::Razorpay, &payload, Some(event_id)).expect("allow-listed event")
}

#[tokio::test]
async fn provider_event_drives_payment_to_success() {
    let order_id = Uuid::new_v4();
    let h = harness(
        Provider::Razorpay,
        &["INR", "USD"],
        order_of(order_id, 10000, "USD"),
    );

    let created = h
        .orchestrator
        .create_payment(
            payment_service::services::orchestrator::CreatePaymentRequest {
                user_id: h.user_id,
                order_id: h.order_id,
                provider: Provider::Razorpay,
                success_url: None,
                cancel_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

    let event = captured_event(&created.provider_order_id, "evt_1");
    process_provider_event(h.cache.as_ref(), &h.orchestrator, &event)
        .await
        .unwrap();

    let payment = h.store.get(created.payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(h.publisher.count(LifecycleEventKind::Succeeded), 1);
}

#[tokio::test]
async fn duplicate_event_id_is_dispatched_once() {
    let order_id = Uuid::new_v4();
    let h = harness(
        Provider::Razorpay,
        &["INR", "USD"],
        order_of(order_id, 10000, "USD"),
    );

    let created = h
        .orchestrator
        .create_payment(
            payment_service::services::orchestrator::CreatePaymentRequest {
                user_id: h.user_id,
                order_id: h.order_id,
                provider: Provider::Razorpay,
                success_url: None,
                cancel_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

    let event = captured_event(&created.provider_order_id, "evt_dup");
    for _ in 0..3 {
        process_provider_event(h.cache.as_ref(), &h.orchestrator, &event)
            .await
            .unwrap();
    }

    // Replays short-circuit on the processed-event marker; even without it
    // the success guard would swallow the duplicate publish.
    assert_eq!(h.publisher.count(LifecycleEventKind::Succeeded), 1);

    use payment_service::cache::store::KeyValueStore;
    assert!(h
        .cache
        .exists("processed:razorpay:evt_dup")
        .await
        .unwrap());
}

#[tokio::test]
async fn unmapped_event_type_is_ignored() {
    let order_id = Uuid::new_v4();
    let h = harness(
        Provider::Razorpay,
        &["INR", "USD"],
        order_of(order_id, 10000, "USD"),
    );

    // refund.processed passes ingress but has no dispatch action.
    let payload = json!({
        "event": "refund.processed",
        "payload": { "refund": { "entity": { "id": "rfnd_1", "payment_id": "pay_1" } } }
    });
    let event = normalize(Provider::Razorpay, &payload, Some("evt_refund")).unwrap();

    process_provider_event(h.cache.as_ref(), &h.orchestrator, &event)
        .await
        .unwrap();
    assert_eq!(h.publisher.count(LifecycleEventKind::Succeeded), 0);
    assert_eq!(h.publisher.count(LifecycleEventKind::Failed), 0);
}

#[tokio::test]
async fn failed_capture_event_fails_payment() {
    let order_id = Uuid::new_v4();
    let h = harness(
        Provider::Paypal,
        &["USD", "EUR", "GBP", "CAD", "AUD", "JPY"],
        order_of(order_id, 5000, "USD"),
    );

    let created = h
        .orchestrator
        .create_payment(
            payment_service::services::orchestrator::CreatePaymentRequest {
                user_id: h.user_id,
                order_id: h.order_id,
                provider: Provider::Paypal,
                success_url: None,
                cancel_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

    let payload = json!({
        "id": "WH-77",
        "event_type": "PAYMENT.CAPTURE.DENIED",
        "create_time": "2026-02-01T10:00:00Z",
        "resource": {
            "id": "capture_1",
            "supplementary_data": { "related_ids": { "order_id": created.provider_order_id } }
        }
    });
    let event = normalize(Provider::Paypal, &payload, None).unwrap();

    process_provider_event(h.cache.as_ref(), &h.orchestrator, &event)
        .await
        .unwrap();

    let payment = h.store.get(created.payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(h.publisher.count(LifecycleEventKind::Failed), 1);
}
