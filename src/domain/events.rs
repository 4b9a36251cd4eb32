//! Outbound event shapes for the message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentStatus, Provider};

pub const EVENT_SOURCE: &str = "payment-service";

pub mod topics {
    pub const ORDER_PAYMENT_INITIATED: &str = "payment.order.initiated.v1";
    pub const ORDER_PAYMENT_SUCCEEDED: &str = "payment.order.succeeded.v1";
    pub const ORDER_PAYMENT_FAILED: &str = "payment.order.failed.v1";
    pub const ORDER_PAYMENT_TIMEOUT: &str = "payment.order.timeout.v1";
    pub const PROVIDER_EVENTS: &str = "payment.provider-events.v1";
}

/// Envelope shared by every message the service publishes. The `source`
/// field is stamped on every variant without exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub event_type: String,
    pub source: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(event_type: impl Into<String>, payload: T, now: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: EVENT_SOURCE.to_string(),
            timestamp: now.timestamp_millis(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    Initiated,
    Succeeded,
    Failed,
    Timeout,
}

impl LifecycleEventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            LifecycleEventKind::Initiated => topics::ORDER_PAYMENT_INITIATED,
            LifecycleEventKind::Succeeded => topics::ORDER_PAYMENT_SUCCEEDED,
            LifecycleEventKind::Failed => topics::ORDER_PAYMENT_FAILED,
            LifecycleEventKind::Timeout => topics::ORDER_PAYMENT_TIMEOUT,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEventKind::Initiated => "OrderPaymentInitiated",
            LifecycleEventKind::Succeeded => "OrderPaymentSucceeded",
            LifecycleEventKind::Failed => "OrderPaymentFailed",
            LifecycleEventKind::Timeout => "OrderPaymentTimeout",
        }
    }
}

/// Payload of the lifecycle events consumed by the Order service. Messages
/// are keyed by `user_id` for per-user FIFO across partitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderPaymentEvent {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub provider: Option<Provider>,
    pub provider_order_id: Option<String>,
    pub payment_status: PaymentStatus,
}

impl OrderPaymentEvent {
    pub fn from_payment(payment: &Payment) -> Self {
        let provider = payment
            .sessions
            .last()
            .map(|session| session.provider);
        Self {
            payment_id: payment.id,
            user_id: payment.user_id,
            order_id: payment.order_id,
            provider,
            provider_order_id: payment.provider_order_id.clone(),
            payment_status: payment.status,
        }
    }
}

/// The uniform internal shape every provider webhook is normalized into
/// before it reaches the bus. Keyed by provider name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider: Provider,
    pub provider_event_id: String,
    pub provider_event_type: String,
    pub provider_payment_id: Option<String>,
    pub order_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub raw: JsonValue,
}

impl ProviderEvent {
    /// Cache key suffix used for consumer-side dedup.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.provider, self.provider_event_id)
    }
}
