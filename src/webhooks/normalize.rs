//! Normalization of provider webhook payloads into `ProviderEvent`.
//!
//! Events outside a provider's allow-list are dropped here, before they
//! can reach the bus.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::events::ProviderEvent;
use crate::domain::payment::Provider;

pub const STRIPE_ALLOWED_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "payment_intent.succeeded",
    "payment_intent.payment_failed",
    "charge.refunded",
];

pub const RAZORPAY_ALLOWED_EVENTS: &[&str] = &[
    "payment.captured",
    "payment.failed",
    "order.paid",
    "refund.processed",
    "subscription.charged",
];

pub const PAYPAL_ALLOWED_EVENTS: &[&str] = &[
    "PAYMENT.CAPTURE.COMPLETED",
    "PAYMENT.CAPTURE.DENIED",
    "PAYMENT.CAPTURE.FAILED",
];

pub fn allowed_events(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Stripe => STRIPE_ALLOWED_EVENTS,
        Provider::Razorpay => RAZORPAY_ALLOWED_EVENTS,
        Provider::Paypal => PAYPAL_ALLOWED_EVENTS,
    }
}

/// Map a verified raw payload into the uniform event shape. Returns `None`
/// for event types outside the allow-list or payloads missing their type
/// field.
pub fn normalize(
    provider: Provider,
    payload: &JsonValue,
    event_id_hint: Option<&str>,
) -> Option<ProviderEvent> {
    match provider {
        Provider::Stripe => normalize_stripe(payload),
        Provider::Razorpay => normalize_razorpay(payload, event_id_hint),
        Provider::Paypal => normalize_paypal(payload),
    }
}

fn normalize_stripe(payload: &JsonValue) -> Option<ProviderEvent> {
    let event_type = payload.get("type")?.as_str()?;
    if !STRIPE_ALLOWED_EVENTS.contains(&event_type) {
        return None;
    }
    let object = payload.get("data").and_then(|d| d.get("object"));

    // Checkout-session events carry the session id, which is what we
    // stored as the provider order id. Intent-level events only know the
    // payment intent.
    let (order_id, provider_payment_id) = if event_type.starts_with("checkout.session") {
        (
            object.and_then(|o| o.get("id")).and_then(json_string),
            object
                .and_then(|o| o.get("payment_intent"))
                .and_then(json_string),
        )
    } else if event_type.starts_with("payment_intent") {
        (None, object.and_then(|o| o.get("id")).and_then(json_string))
    } else {
        (
            None,
            object
                .and_then(|o| o.get("payment_intent"))
                .and_then(json_string),
        )
    };

    let occurred_at = payload
        .get("created")
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    Some(ProviderEvent {
        provider: Provider::Stripe,
        provider_event_id: payload
            .get("id")
            .and_then(json_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        provider_event_type: event_type.to_string(),
        provider_payment_id,
        order_id,
        occurred_at,
        raw: payload.clone(),
    })
}

fn normalize_razorpay(payload: &JsonValue, event_id_hint: Option<&str>) -> Option<ProviderEvent> {
    let event_type = payload.get("event")?.as_str()?;
    if !RAZORPAY_ALLOWED_EVENTS.contains(&event_type) {
        return None;
    }

    let entities = payload.get("payload");
    let payment_entity = entities
        .and_then(|p| p.get("payment"))
        .and_then(|p| p.get("entity"));
    let order_entity = entities
        .and_then(|p| p.get("order"))
        .and_then(|o| o.get("entity"));
    let refund_entity = entities
        .and_then(|p| p.get("refund"))
        .and_then(|r| r.get("entity"));

    let order_id = payment_entity
        .and_then(|e| e.get("order_id"))
        .and_then(json_string)
        .or_else(|| order_entity.and_then(|e| e.get("id")).and_then(json_string));

    let provider_payment_id = payment_entity
        .and_then(|e| e.get("id"))
        .and_then(json_string)
        .or_else(|| {
            refund_entity
                .and_then(|e| e.get("payment_id"))
                .and_then(json_string)
        });

    let occurred_at = payload
        .get("created_at")
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    Some(ProviderEvent {
        provider: Provider::Razorpay,
        provider_event_id: event_id_hint
            .map(|id| id.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        provider_event_type: event_type.to_string(),
        provider_payment_id,
        order_id,
        occurred_at,
        raw: payload.clone(),
    })
}

fn normalize_paypal(payload: &JsonValue) -> Option<ProviderEvent> {
    let event_type = payload.get("event_type")?.as_str()?;
    if !PAYPAL_ALLOWED_EVENTS.contains(&event_type) {
        return None;
    }
    let resource = payload.get("resource");

    let order_id = resource
        .and_then(|r| r.get("supplementary_data"))
        .and_then(|s| s.get("related_ids"))
        .and_then(|r| r.get("order_id"))
        .and_then(json_string);

    let occurred_at = payload
        .get("create_time")
        .and_then(json_string)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(ProviderEvent {
        provider: Provider::Paypal,
        provider_event_id: payload
            .get("id")
            .and_then(json_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        provider_event_type: event_type.to_string(),
        provider_payment_id: resource.and_then(|r| r.get("id")).and_then(json_string),
        order_id,
        occurred_at,
        raw: payload.clone(),
    })
}

fn json_string(value: &JsonValue) -> Option<String> {
    value.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stripe_checkout_completed_maps_session_id_to_order() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "cs_test_123",
                "payment_intent": "pi_456",
                "payment_status": "paid"
            }}
        });
        let event = normalize(Provider::Stripe, &payload, None).unwrap();
        assert_eq!(event.provider_event_id, "evt_1");
        assert_eq!(event.order_id.as_deref(), Some("cs_test_123"));
        assert_eq!(event.provider_payment_id.as_deref(), Some("pi_456"));
        assert_eq!(event.occurred_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn stripe_unknown_event_is_dropped() {
        let payload = json!({
            "id": "evt_2",
            "type": "customer.created",
            "data": { "object": {} }
        });
        assert!(normalize(Provider::Stripe, &payload, None).is_none());
    }

    #[test]
    fn razorpay_payment_captured_extracts_order_and_payment() {
        let payload = json!({
            "event": "payment.captured",
            "created_at": 1_700_000_000,
            "payload": { "payment": { "entity": {
                "id": "pay_29QQoUBi66xm2f",
                "order_id": "order_9A33XWu170gUtm",
                "status": "captured"
            }}}
        });
        let event = normalize(Provider::Razorpay, &payload, Some("evt_rzp_1")).unwrap();
        assert_eq!(event.provider_event_id, "evt_rzp_1");
        assert_eq!(event.order_id.as_deref(), Some("order_9A33XWu170gUtm"));
        assert_eq!(
            event.provider_payment_id.as_deref(),
            Some("pay_29QQoUBi66xm2f")
        );
    }

    #[test]
    fn razorpay_order_paid_uses_order_entity() {
        let payload = json!({
            "event": "order.paid",
            "payload": { "order": { "entity": { "id": "order_1" } } }
        });
        let event = normalize(Provider::Razorpay, &payload, None).unwrap();
        assert_eq!(event.order_id.as_deref(), Some("order_1"));
        // No hint means a generated id, never a missing one.
        assert!(!event.provider_event_id.is_empty());
    }

    #[test]
    fn paypal_capture_completed_reads_related_order() {
        let payload = json!({
            "id": "WH-58D329510W468432D-8HN650336L201105X",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "create_time": "2026-01-15T10:13:41Z",
            "resource": {
                "id": "42311647XV020574X",
                "supplementary_data": { "related_ids": { "order_id": "5O190127TN364715T" } }
            }
        });
        let event = normalize(Provider::Paypal, &payload, None).unwrap();
        assert_eq!(event.order_id.as_deref(), Some("5O190127TN364715T"));
        assert_eq!(
            event.provider_payment_id.as_deref(),
            Some("42311647XV020574X")
        );
        assert_eq!(event.provider_event_type, "PAYMENT.CAPTURE.COMPLETED");
    }

    #[test]
    fn paypal_unlisted_event_is_dropped() {
        let payload = json!({
            "id": "WH-1",
            "event_type": "BILLING.SUBSCRIPTION.CREATED",
            "resource": {}
        });
        assert!(normalize(Provider::Paypal, &payload, None).is_none());
    }
}
