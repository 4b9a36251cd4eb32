//! PayPal Orders v2 adapter.
//!
//! PayPal wants major-unit decimal strings on the wire, so every amount
//! crosses through `minor_to_major_string` on the way out. Access tokens
//! are fetched with client credentials and reused until shortly before
//! expiry.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::domain::payment::Provider;

use super::error::{ProviderError, ProviderResult};
use super::http::{AuthScheme, ProviderHttpClient};
use super::types::{
    minor_to_major_string, CancelOutcome, CreateSessionRequest, CreatedSession, RefundOutcome,
    RefundRequest, RefundStatus, ResolveOutcome, ResolveRequest, SessionCompletion,
};
use super::PaymentProvider;

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_id: String::new(),
            base_url: "https://api-m.paypal.com".to_string(),
            timeout_secs: 15,
            max_retries: 3,
        }
    }
}

impl PaypalConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let client_id =
            std::env::var("PAYPAL_CLIENT_ID").map_err(|_| ProviderError::ValidationError {
                message: "PAYPAL_CLIENT_ID environment variable is required".to_string(),
                field: Some("PAYPAL_CLIENT_ID".to_string()),
            })?;
        let client_secret =
            std::env::var("PAYPAL_CLIENT_SECRET").map_err(|_| ProviderError::ValidationError {
                message: "PAYPAL_CLIENT_SECRET environment variable is required".to_string(),
                field: Some("PAYPAL_CLIENT_SECRET".to_string()),
            })?;

        Ok(Self {
            webhook_id: std::env::var("PAYPAL_WEBHOOK_ID").unwrap_or_default(),
            base_url: std::env::var("PAYPAL_BASE_URL")
                .unwrap_or_else(|_| "https://api-m.paypal.com".to_string()),
            timeout_secs: std::env::var("PAYPAL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("PAYPAL_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            client_id,
            client_secret,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaypalTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PaypalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    id: String,
    status: Option<String>,
    #[serde(default)]
    links: Vec<PaypalLink>,
    #[serde(default)]
    purchase_units: Vec<PaypalPurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PaypalPurchaseUnit {
    payments: Option<PaypalPayments>,
}

#[derive(Debug, Deserialize)]
struct PaypalPayments {
    #[serde(default)]
    captures: Vec<PaypalCapture>,
}

#[derive(Debug, Deserialize)]
struct PaypalCapture {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaypalRefund {
    id: String,
    status: Option<String>,
}

pub struct PaypalProvider {
    config: PaypalConfig,
    http: ProviderHttpClient,
    token: Mutex<Option<(String, Instant)>>,
}

impl PaypalProvider {
    pub fn new(config: PaypalConfig) -> ProviderResult<Self> {
        let http =
            ProviderHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(PaypalConfig::from_env()?)
    }

    pub fn webhook_id(&self) -> &str {
        &self.config.webhook_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> ProviderResult<String> {
        {
            let cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((token, deadline)) = cached.as_ref() {
                if *deadline > Instant::now() {
                    return Ok(token.clone());
                }
            }
        }

        let response: PaypalTokenResponse = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                &AuthScheme::Basic {
                    username: self.config.client_id.clone(),
                    password: self.config.client_secret.clone(),
                },
                &[("grant_type".to_string(), "client_credentials".to_string())],
                &[],
            )
            .await?;

        // Renew a minute early so in-flight requests never carry a token
        // that expires mid-call.
        let ttl = response.expires_in.saturating_sub(60).max(30);
        let token = response.access_token.clone();
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((response.access_token, Instant::now() + Duration::from_secs(ttl)));
        Ok(token)
    }

    fn order_payload(request: &CreateSessionRequest) -> serde_json::Value {
        let items: Vec<serde_json::Value> = request
            .line_items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "name": item.name,
                    "quantity": item.quantity.to_string(),
                    "unit_amount": {
                        "currency_code": item.currency,
                        "value": minor_to_major_string(item.unit_amount, &item.currency),
                    },
                })
            })
            .collect();

        let item_total: i64 = request.line_items.iter().map(|item| item.total()).sum();

        serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.order_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.currency,
                    "value": minor_to_major_string(request.amount, &request.currency),
                    "breakdown": {
                        "item_total": {
                            "currency_code": request.currency,
                            "value": minor_to_major_string(item_total, &request.currency),
                        },
                    },
                },
                "items": items,
            }],
            "application_context": {
                "return_url": request.success_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
            },
        })
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn name(&self) -> Provider {
        Provider::Paypal
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ProviderResult<CreatedSession> {
        let token = self.access_token().await?;
        let payload = Self::order_payload(request);
        let request_id = request.idempotency_key.to_string();

        let order: PaypalOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/checkout/orders"),
                &AuthScheme::Bearer(token),
                Some(&payload),
                &[("PayPal-Request-Id", request_id.as_str())],
            )
            .await?;

        let approval_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.clone())
            .ok_or_else(|| ProviderError::ApiError {
                provider: "paypal".to_string(),
                message: "order response missing approval link".to_string(),
                provider_code: None,
                retryable: false,
            })?;

        info!(order_id = %order.id, "paypal order created");

        Ok(CreatedSession {
            provider: Provider::Paypal,
            provider_order_id: order.id,
            amount: request.amount,
            currency: request.currency.clone(),
            completion: SessionCompletion::Paypal { approval_url },
            metadata: serde_json::json!({ "status": order.status }),
        })
    }

    async fn resolve(&self, request: &ResolveRequest) -> ProviderResult<ResolveOutcome> {
        let order_id = match request {
            ResolveRequest::Paypal { order_id } => order_id,
            _ => {
                return Err(ProviderError::ValidationError {
                    message: "paypal resolve requires a paypal payload".to_string(),
                    field: Some("provider".to_string()),
                })
            }
        };

        let token = self.access_token().await?;
        let order: PaypalOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/checkout/orders/{}/capture", order_id)),
                &AuthScheme::Bearer(token),
                Some(&serde_json::json!({})),
                &[],
            )
            .await?;

        let status = order.status.unwrap_or_default();
        let capture_id = order
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first())
            .map(|capture| capture.id.clone());

        Ok(ResolveOutcome {
            verified: status == "COMPLETED",
            provider_status: status,
            provider_payment_id: capture_id,
        })
    }

    async fn cancel(
        &self,
        provider_order_id: &str,
        reason: Option<&str>,
    ) -> ProviderResult<CancelOutcome> {
        // PayPal exposes no order-cancel API for the CAPTURE intent; the
        // session is marked failed locally and the approval link simply
        // dies with the order.
        info!(
            order_id = %provider_order_id,
            reason = reason.unwrap_or("unspecified"),
            "paypal cancel handled locally"
        );
        Ok(CancelOutcome { success: true })
    }

    async fn refund(&self, request: &RefundRequest) -> ProviderResult<RefundOutcome> {
        let token = self.access_token().await?;
        let payload = serde_json::json!({
            "amount": {
                "currency_code": request.currency,
                "value": minor_to_major_string(request.amount, &request.currency),
            },
            "note_to_payer": request.reason,
        });

        let refund: PaypalRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!(
                    "/v2/payments/captures/{}/refund",
                    request.provider_payment_id
                )),
                &AuthScheme::Bearer(token),
                Some(&payload),
                &[],
            )
            .await?;

        let status = match refund.status.as_deref() {
            Some("COMPLETED") => RefundStatus::Success,
            Some("FAILED") | Some("CANCELLED") => RefundStatus::Failed,
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
        match self.access_token().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "paypal availability check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::LineItem;
    use uuid::Uuid;

    #[test]
    fn order_payload_uses_major_unit_strings() {
        let request = CreateSessionRequest {
            user_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount: 10800,
            currency: "USD".to_string(),
            idempotency_key: Uuid::new_v4(),
            line_items: vec![LineItem {
                name: "Advanced Rust".to_string(),
                quantity: 2,
                unit_amount: 5400,
                currency: "USD".to_string(),
                image_url: None,
            }],
            success_url: "https://shop.example.com/success".to_string(),
            cancel_url: "https://shop.example.com/cancel".to_string(),
            description: "Order".to_string(),
            customer_email: None,
        };

        let payload = PaypalProvider::order_payload(&request);
        assert_eq!(payload["intent"], "CAPTURE");
        assert_eq!(payload["purchase_units"][0]["amount"]["value"], "108.00");
        assert_eq!(
            payload["purchase_units"][0]["amount"]["breakdown"]["item_total"]["value"],
            "108.00"
        );
        assert_eq!(
            payload["purchase_units"][0]["items"][0]["unit_amount"]["value"],
            "54.00"
        );
        assert_eq!(payload["purchase_units"][0]["items"][0]["quantity"], "2");
    }
}
