//! Message-bus producer.
//!
//! Lifecycle events are keyed by user id, provider events by provider name,
//! giving per-key FIFO across partitions.

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::events::{EventEnvelope, LifecycleEventKind, OrderPaymentEvent, ProviderEvent};
use crate::domain::events::topics;
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_lifecycle(
        &self,
        kind: LifecycleEventKind,
        payload: &OrderPaymentEvent,
    ) -> AppResult<()>;

    async fn publish_provider_event(&self, event: &ProviderEvent) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub message_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "127.0.0.1:9092".to_string(),
            group_id: "payment-service".to_string(),
            message_timeout_ms: 5000,
        }
    }
}

pub struct KafkaEventPublisher {
    producer: ThreadedProducer<DefaultProducerContext>,
}

impl KafkaEventPublisher {
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        let producer: ThreadedProducer<DefaultProducerContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("compression.type", "snappy")
            .create()
            .map_err(|e| AppError::Publish(format!("kafka producer init failed: {}", e)))?;

        info!(brokers = %config.brokers, "kafka producer initialized");
        Ok(Self { producer })
    }

    fn send<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope<T>,
    ) -> AppResult<()> {
        let bytes = serde_json::to_vec(envelope)
            .map_err(|e| AppError::Publish(format!("event serialization failed: {}", e)))?;

        self.producer
            .send(BaseRecord::to(topic).key(key).payload(&bytes))
            .map_err(|(e, _)| {
                error!(topic = %topic, error = %e, "kafka send failed");
                AppError::Publish(format!("kafka send to {} failed: {}", topic, e))
            })?;

        debug!(topic = %topic, key = %key, event_type = %envelope.event_type, "event published");
        Ok(())
    }

    /// Drain the in-flight queue on shutdown.
    pub fn flush(&self) {
        if let Err(e) = self.producer.flush(Duration::from_secs(5)) {
            error!(error = %e, "kafka flush failed");
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish_lifecycle(
        &self,
        kind: LifecycleEventKind,
        payload: &OrderPaymentEvent,
    ) -> AppResult<()> {
        let envelope = EventEnvelope::new(kind.event_type(), payload, Utc::now());
        let key = payload.user_id.to_string();
        self.send(kind.topic(), &key, &envelope)
    }

    async fn publish_provider_event(&self, event: &ProviderEvent) -> AppResult<()> {
        let envelope = EventEnvelope::new("ProviderEvent", event, Utc::now());
        let key = event.provider.to_string();
        self.send(topics::PROVIDER_EVENTS, &key, &envelope)
    }
}
