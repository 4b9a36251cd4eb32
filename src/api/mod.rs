pub mod payments;
pub mod response;
pub mod webhooks;

use std::sync::Arc;

use crate::events::publisher::EventPublisher;
use crate::services::orchestrator::PaymentOrchestrator;
use crate::webhooks::verify::WebhookVerifier;

/// Shared state for the payment RPC surface and the webhook endpoints.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub verifier: Arc<WebhookVerifier>,
    pub publisher: Arc<dyn EventPublisher>,
}
