pub mod error;
pub mod http;
pub mod paypal;
pub mod razorpay;
pub mod stripe;
pub mod types;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::payment::Provider;
use error::{ProviderError, ProviderResult};
use types::{
    CancelOutcome, CreateSessionRequest, CreatedSession, RefundOutcome, RefundRequest,
    ResolveOutcome, ResolveRequest,
};

/// Uniform port over the provider variant set. One adapter per provider
/// implements this; the use-case layer never talks to a provider API
/// directly.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> Provider;

    /// Create a provider-side order/intent and return its completion data.
    async fn create_session(&self, request: &CreateSessionRequest)
        -> ProviderResult<CreatedSession>;

    /// Confirm capture to the caller. PayPal captures the order, Razorpay
    /// verifies the checkout signature, Stripe looks the session up.
    async fn resolve(&self, request: &ResolveRequest) -> ProviderResult<ResolveOutcome>;

    /// Best-effort provider-side cancellation.
    async fn cancel(
        &self,
        provider_order_id: &str,
        reason: Option<&str>,
    ) -> ProviderResult<CancelOutcome>;

    async fn refund(&self, request: &RefundRequest) -> ProviderResult<RefundOutcome>;

    fn supported_currencies(&self) -> &'static [&'static str];

    fn is_currency_supported(&self, code: &str) -> bool {
        let code = code.to_uppercase();
        self.supported_currencies().iter().any(|c| *c == code)
    }

    async fn is_available(&self) -> bool;
}

/// Configuration-driven adapter registry. A provider with missing secrets
/// is skipped with a warning instead of aborting boot.
pub struct ProviderFactory {
    providers: HashMap<Provider, Arc<dyn PaymentProvider>>,
}

impl ProviderFactory {
    pub fn new(providers: Vec<Arc<dyn PaymentProvider>>) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.name(), provider))
            .collect();
        Self { providers }
    }

    pub fn from_env() -> Self {
        let mut providers: Vec<Arc<dyn PaymentProvider>> = Vec::new();

        match stripe::StripeProvider::from_env() {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!(error = %e, "stripe provider disabled"),
        }
        match paypal::PaypalProvider::from_env() {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!(error = %e, "paypal provider disabled"),
        }
        match razorpay::RazorpayProvider::from_env() {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!(error = %e, "razorpay provider disabled"),
        }

        info!(count = providers.len(), "payment providers initialized");
        Self::new(providers)
    }

    pub fn get(&self, provider: Provider) -> ProviderResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or(ProviderError::ValidationError {
                message: format!("provider not configured: {}", provider),
                field: Some("provider".to_string()),
            })
    }

    pub fn list(&self) -> Vec<Arc<dyn PaymentProvider>> {
        self.providers.values().cloned().collect()
    }
}
