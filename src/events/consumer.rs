//! Provider-events consumer.
//!
//! Consumes `payment.provider-events.v1`, drops duplicates via the
//! processed-event cache, and funnels each event into the same lifecycle
//! use cases the RPC surface reaches. The processed marker is written only
//! after the dispatched use case returns, so a crash mid-dispatch leaves
//! the event eligible for redelivery.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cache::keys::processed_event::ProcessedKey;
use crate::cache::store::KeyValueStore;
use crate::domain::events::{topics, EventEnvelope, ProviderEvent};
use crate::domain::payment::Provider;
use crate::error::{AppError, AppResult};
use crate::events::publisher::KafkaConfig;
use crate::services::orchestrator::PaymentOrchestrator;

/// Processed-event markers live for 30 days.
const PROCESSED_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    Success,
    Failure,
}

/// The `(provider, event type)` dispatch table.
pub fn dispatch_action(provider: Provider, event_type: &str) -> Option<DispatchAction> {
    use DispatchAction::{Failure, Success};
    match (provider, event_type) {
        (Provider::Stripe, "checkout.session.completed")
        | (Provider::Stripe, "payment_intent.succeeded") => Some(Success),
        (Provider::Stripe, "payment_intent.payment_failed") => Some(Failure),
        (Provider::Paypal, "PAYMENT.CAPTURE.COMPLETED") => Some(Success),
        (Provider::Paypal, "PAYMENT.CAPTURE.DENIED")
        | (Provider::Paypal, "PAYMENT.CAPTURE.FAILED") => Some(Failure),
        (Provider::Razorpay, "payment.captured") | (Provider::Razorpay, "order.paid") => {
            Some(Success)
        }
        (Provider::Razorpay, "payment.failed") | (Provider::Razorpay, "order.failed") => {
            Some(Failure)
        }
        _ => None,
    }
}

/// Transport-independent handling of one provider event: dedup against the
/// processed-event cache, dispatch into the lifecycle use case, then mark
/// processed. Marking happens only after the use case returns.
pub async fn process_provider_event(
    cache: &dyn KeyValueStore,
    orchestrator: &PaymentOrchestrator,
    event: &ProviderEvent,
) -> AppResult<()> {
    let processed_key = ProcessedKey::new(event.provider, &event.provider_event_id).to_string();
    if cache.exists(&processed_key).await? {
        info!(event_id = %event.provider_event_id, "provider event already processed");
        return Ok(());
    }

    let Some(action) = dispatch_action(event.provider, &event.provider_event_type) else {
        warn!(
            provider = %event.provider,
            event_type = %event.provider_event_type,
            "no dispatch action for provider event"
        );
        return Ok(());
    };

    let Some(order_id) = event.order_id.as_deref() else {
        warn!(
            event_id = %event.provider_event_id,
            event_type = %event.provider_event_type,
            "provider event carries no order reference, skipping"
        );
        return Ok(());
    };

    match action {
        DispatchAction::Success => orchestrator.success_payment(event.provider, order_id).await?,
        DispatchAction::Failure => orchestrator.failure_payment(event.provider, order_id).await?,
    }

    cache.set(&processed_key, "1", Some(PROCESSED_TTL)).await?;
    Ok(())
}

pub struct ProviderEventConsumer {
    consumer: StreamConsumer,
    cache: Arc<dyn KeyValueStore>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl ProviderEventConsumer {
    pub fn new(
        config: &KafkaConfig,
        cache: Arc<dyn KeyValueStore>,
        orchestrator: Arc<PaymentOrchestrator>,
    ) -> AppResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "10000")
            .create()
            .map_err(|e| AppError::Publish(format!("kafka consumer init failed: {}", e)))?;

        consumer
            .subscribe(&[topics::PROVIDER_EVENTS])
            .map_err(|e| AppError::Publish(format!("kafka subscribe failed: {}", e)))?;

        Ok(Self {
            consumer,
            cache,
            orchestrator,
        })
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(topic = topics::PROVIDER_EVENTS, "provider event consumer started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("provider event consumer stopping");
                        break;
                    }
                }
                message = self.consumer.recv() => {
                    match message {
                        Ok(message) => self.handle_message(&message).await,
                        Err(e) => {
                            error!(error = %e, "kafka receive failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("provider event consumer stopped");
    }

    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        let Some(payload) = message.payload() else {
            warn!("provider event with empty payload");
            self.commit(message);
            return;
        };

        let envelope: EventEnvelope<ProviderEvent> = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // A poison message can never become parseable; drop it.
                error!(error = %e, "undecodable provider event, skipping");
                self.commit(message);
                return;
            }
        };

        match self.process(&envelope.payload).await {
            Ok(()) => self.commit(message),
            Err(e) if e.is_retryable() => {
                // Leave the offset uncommitted; the bus redelivers.
                error!(
                    event_id = %envelope.payload.provider_event_id,
                    error = %e,
                    "provider event processing failed, awaiting redelivery"
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                // Deterministic failures (missing payment, forbidden
                // transition) are idempotent outcomes: log and ack.
                warn!(
                    event_id = %envelope.payload.provider_event_id,
                    error = %e,
                    "provider event rejected"
                );
                self.commit(message);
            }
        }
    }

    async fn process(&self, event: &ProviderEvent) -> AppResult<()> {
        process_provider_event(self.cache.as_ref(), &self.orchestrator, event).await
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            error!(error = %e, "kafka commit failed");
        }
    }
}
