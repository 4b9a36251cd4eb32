//! Stripe Checkout adapter.
//!
//! Stripe speaks form-encoded requests and minor-unit amounts, so amounts
//! pass through unchanged (zero-decimal currencies included).

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::domain::payment::Provider;

use super::error::{ProviderError, ProviderResult};
use super::http::{AuthScheme, ProviderHttpClient};
use super::types::{
    CancelOutcome, CreateSessionRequest, CreatedSession, RefundOutcome, RefundRequest,
    RefundStatus, ResolveOutcome, ResolveRequest, SessionCompletion,
};
use super::PaymentProvider;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 15,
            max_retries: 3,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| ProviderError::ValidationError {
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
                field: Some("STRIPE_SECRET_KEY".to_string()),
            })?;
        let webhook_secret =
            std::env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| ProviderError::ValidationError {
                message: "STRIPE_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("STRIPE_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            secret_key,
            webhook_secret,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
    client_secret: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_intent: Option<String>,
    payment_status: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeBalance {
    #[allow(dead_code)]
    livemode: Option<bool>,
}

pub struct StripeProvider {
    config: StripeConfig,
    http: ProviderHttpClient,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> ProviderResult<Self> {
        let http =
            ProviderHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Bearer(self.config.secret_key.clone())
    }

    fn checkout_form(request: &CreateSessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "client_reference_id".to_string(),
                request.order_id.to_string(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        for (i, item) in request.line_items.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", i),
                item.currency.to_lowercase(),
            ));
            form.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            if let Some(image) = &item.image_url {
                form.push((
                    format!("line_items[{}][price_data][product_data][images][0]", i),
                    image.clone(),
                ));
            }
            form.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
        }
        form.push((
            "metadata[order_id]".to_string(),
            request.order_id.to_string(),
        ));
        form.push(("metadata[user_id]".to_string(), request.user_id.to_string()));
        form
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> Provider {
        Provider::Stripe
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ProviderResult<CreatedSession> {
        let form = Self::checkout_form(request);
        let idempotency_key = request.idempotency_key.to_string();

        let session: StripeCheckoutSession = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/sessions"),
                &self.auth(),
                &form,
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;

        info!(session_id = %session.id, "stripe checkout session created");

        let amount = session.amount_total.unwrap_or(request.amount);
        let currency = session
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| request.currency.clone());

        Ok(CreatedSession {
            provider: Provider::Stripe,
            provider_order_id: session.id.clone(),
            amount,
            currency,
            completion: SessionCompletion::Stripe {
                client_secret: session.client_secret,
                checkout_url: session.url,
            },
            metadata: serde_json::json!({
                "payment_intent": session.payment_intent,
                "payment_status": session.payment_status,
            }),
        })
    }

    async fn resolve(&self, request: &ResolveRequest) -> ProviderResult<ResolveOutcome> {
        let session_id = match request {
            ResolveRequest::Stripe { session_id } => session_id,
            _ => {
                return Err(ProviderError::ValidationError {
                    message: "stripe resolve requires a stripe payload".to_string(),
                    field: Some("provider".to_string()),
                })
            }
        };

        let session: StripeCheckoutSession = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/checkout/sessions/{}", session_id)),
                &self.auth(),
                None,
                &[],
            )
            .await?;

        let payment_status = session.payment_status.unwrap_or_default();
        Ok(ResolveOutcome {
            verified: payment_status == "paid",
            provider_status: payment_status,
            provider_payment_id: session.payment_intent,
        })
    }

    async fn cancel(
        &self,
        provider_order_id: &str,
        _reason: Option<&str>,
    ) -> ProviderResult<CancelOutcome> {
        let session: StripeCheckoutSession = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/checkout/sessions/{}/expire", provider_order_id)),
                &self.auth(),
                &[],
                &[],
            )
            .await?;

        Ok(CancelOutcome {
            success: session.status.as_deref() == Some("expired"),
        })
    }

    async fn refund(&self, request: &RefundRequest) -> ProviderResult<RefundOutcome> {
        let form = vec![
            (
                "payment_intent".to_string(),
                request.provider_payment_id.clone(),
            ),
            ("amount".to_string(), request.amount.to_string()),
        ];
        let refund: StripeRefund = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                &self.auth(),
                &form,
                &[],
            )
            .await?;

        let status = match refund.status.as_deref() {
            Some("succeeded") => RefundStatus::Success,
            Some("failed") | Some("canceled") => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        };
        Ok(RefundOutcome {
            provider_refund_id: Some(refund.id),
            status,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "CAD", "AUD", "JPY"]
    }

    async fn is_available(&self) -> bool {
        self.http
            .request_json::<StripeBalance>(
                reqwest::Method::GET,
                &self.endpoint("/v1/balance"),
                &self.auth(),
                None,
                &[],
            )
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::LineItem;
    use uuid::Uuid;

    fn sample_request() -> CreateSessionRequest {
        CreateSessionRequest {
            user_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount: 5000,
            currency: "USD".to_string(),
            idempotency_key: Uuid::new_v4(),
            line_items: vec![LineItem {
                name: "Intro to Rust".to_string(),
                quantity: 1,
                unit_amount: 5000,
                currency: "USD".to_string(),
                image_url: Some("https://cdn.example.com/rust.png".to_string()),
            }],
            success_url: "https://shop.example.com/success".to_string(),
            cancel_url: "https://shop.example.com/cancel".to_string(),
            description: "Order".to_string(),
            customer_email: Some("user@example.com".to_string()),
        }
    }

    #[test]
    fn checkout_form_encodes_line_items() {
        let request = sample_request();
        let form = StripeProvider::checkout_form(&request);
        let find = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find("mode"), Some("payment"));
        assert_eq!(find("line_items[0][price_data][currency]"), Some("usd"));
        assert_eq!(find("line_items[0][price_data][unit_amount]"), Some("5000"));
        assert_eq!(
            find("line_items[0][price_data][product_data][name]"),
            Some("Intro to Rust")
        );
        assert_eq!(find("line_items[0][quantity]"), Some("1"));
        assert_eq!(find("customer_email"), Some("user@example.com"));
    }

    #[test]
    fn supported_currencies_match_contract() {
        let provider = StripeProvider::new(StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec_test".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(provider.is_currency_supported("JPY"));
        assert!(provider.is_currency_supported("usd"));
        assert!(!provider.is_currency_supported("INR"));
    }
}
