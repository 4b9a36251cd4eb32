//! Razorpay Orders adapter.
//!
//! Resolve is a local HMAC check over `order_id|payment_id`, no network
//! round-trip. Amounts are minor units (paise) end to end.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::domain::payment::Provider;

use super::error::{ProviderError, ProviderResult};
use super::http::{AuthScheme, ProviderHttpClient};
use super::types::{
    CancelOutcome, CreateSessionRequest, CreatedSession, RefundOutcome, RefundRequest,
    RefundStatus, ResolveOutcome, ResolveRequest, SessionCompletion,
};
use super::PaymentProvider;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.razorpay.com".to_string(),
            timeout_secs: 15,
            max_retries: 3,
        }
    }
}

impl RazorpayConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let key_id =
            std::env::var("RAZORPAY_KEY_ID").map_err(|_| ProviderError::ValidationError {
                message: "RAZORPAY_KEY_ID environment variable is required".to_string(),
                field: Some("RAZORPAY_KEY_ID".to_string()),
            })?;
        let key_secret =
            std::env::var("RAZORPAY_KEY_SECRET").map_err(|_| ProviderError::ValidationError {
                message: "RAZORPAY_KEY_SECRET environment variable is required".to_string(),
                field: Some("RAZORPAY_KEY_SECRET".to_string()),
            })?;
        let webhook_secret =
            std::env::var("RAZORPAY_WEBHOOK_SECRET").map_err(|_| {
                ProviderError::ValidationError {
                    message: "RAZORPAY_WEBHOOK_SECRET environment variable is required".to_string(),
                    field: Some("RAZORPAY_WEBHOOK_SECRET".to_string()),
                }
            })?;

        Ok(Self {
            base_url: std::env::var("RAZORPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            timeout_secs: std::env::var("RAZORPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("RAZORPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            key_id,
            key_secret,
            webhook_secret,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayPaymentList {
    #[serde(default)]
    items: Vec<RazorpayPayment>,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayRefund {
    id: String,
    status: Option<String>,
}

pub struct RazorpayProvider {
    config: RazorpayConfig,
    http: ProviderHttpClient,
}

impl RazorpayProvider {
    pub fn new(config: RazorpayConfig) -> ProviderResult<Self> {
        let http =
            ProviderHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(RazorpayConfig::from_env()?)
    }

    pub fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Basic {
            username: self.config.key_id.clone(),
            password: self.config.key_secret.clone(),
        }
    }

    /// Checkout signature: hex HMAC-SHA256 of `order_id|payment_id` under
    /// the webhook secret, compared in constant time.
    fn verify_checkout_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        expected
            .as_bytes()
            .ct_eq(signature.trim().as_bytes())
            .into()
    }
}

#[async_trait]
impl PaymentProvider for RazorpayProvider {
    fn name(&self) -> Provider {
        Provider::Razorpay
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ProviderResult<CreatedSession> {
        let payload = serde_json::json!({
            "amount": request.amount,
            "currency": request.currency,
            "receipt": request.order_id.to_string(),
            "notes": {
                "user_id": request.user_id.to_string(),
                "idempotency_key": request.idempotency_key.to_string(),
                "description": request.description,
            },
        });

        let order: RazorpayOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/orders"),
                &self.auth(),
                Some(&payload),
                &[],
            )
            .await?;

        info!(order_id = %order.id, "razorpay order created");

        Ok(CreatedSession {
            provider: Provider::Razorpay,
            provider_order_id: order.id,
            amount: order.amount,
            currency: order.currency.to_uppercase(),
            completion: SessionCompletion::Razorpay {
                key_id: self.config.key_id.clone(),
            },
            metadata: serde_json::json!({ "status": order.status }),
        })
    }

    async fn resolve(&self, request: &ResolveRequest) -> ProviderResult<ResolveOutcome> {
        let (order_id, payment_id, signature) = match request {
            ResolveRequest::Razorpay {
                order_id,
                payment_id,
                signature,
            } => (order_id, payment_id, signature),
            _ => {
                return Err(ProviderError::ValidationError {
                    message: "razorpay resolve requires a razorpay payload".to_string(),
                    field: Some("provider".to_string()),
                })
            }
        };

        let verified = self.verify_checkout_signature(order_id, payment_id, signature);
        Ok(ResolveOutcome {
            provider_status: if verified { "captured" } else { "signature_mismatch" }.to_string(),
            verified,
            provider_payment_id: Some(payment_id.clone()),
        })
    }

    async fn cancel(
        &self,
        provider_order_id: &str,
        reason: Option<&str>,
    ) -> ProviderResult<CancelOutcome> {
        // Best effort: an authorized payment gets a zero-capture release, a
        // captured one gets a full refund. Remote failure never blocks
        // local cancellation.
        let payments: Result<RazorpayPaymentList, _> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/orders/{}/payments", provider_order_id)),
                &self.auth(),
                None,
                &[],
            )
            .await;

        let payments = match payments {
            Ok(list) => list.items,
            Err(e) => {
                warn!(order_id = %provider_order_id, error = %e, "razorpay payment lookup failed during cancel");
                return Ok(CancelOutcome { success: true });
            }
        };

        for payment in payments {
            let outcome: Result<serde_json::Value, _> = match payment.status.as_deref() {
                Some("authorized") => {
                    self.http
                        .request_json(
                            reqwest::Method::POST,
                            &self.endpoint(&format!("/v1/payments/{}/capture", payment.id)),
                            &self.auth(),
                            Some(&serde_json::json!({ "amount": 0 })),
                            &[],
                        )
                        .await
                }
                Some("captured") => {
                    self.http
                        .request_json(
                            reqwest::Method::POST,
                            &self.endpoint(&format!("/v1/payments/{}/refund", payment.id)),
                            &self.auth(),
                            Some(&serde_json::json!({ "notes": { "reason": reason } })),
                            &[],
                        )
                        .await
                }
                _ => continue,
            };
            if let Err(e) = outcome {
                warn!(payment_id = %payment.id, error = %e, "razorpay remote cancel failed, continuing locally");
            }
        }

        Ok(CancelOutcome { success: true })
    }

    async fn refund(&self, request: &RefundRequest) -> ProviderResult<RefundOutcome> {
        let payload = serde_json::json!({
            "amount": request.amount,
            "notes": { "reason": request.reason },
        });
        let refund: RazorpayRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!(
                    "/v1/payments/{}/refund",
                    request.provider_payment_id
                )),
                &self.auth(),
                Some(&payload),
                &[],
            )
            .await?;

        let status = match refund.status.as_deref() {
            Some("processed") => RefundStatus::Success,
            Some("failed") => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        };
        Ok(RefundOutcome {
            provider_refund_id: Some(refund.id),
            status,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["INR", "USD"]
    }

    async fn is_available(&self) -> bool {
        self.http
            .request_json::<serde_json::Value>(
                reqwest::Method::GET,
                &self.endpoint("/v1/orders?count=1"),
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

    fn provider_with_secret(secret: &str) -> RazorpayProvider {
        RazorpayProvider::new(RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "key_secret".to_string(),
            webhook_secret: secret.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn resolve_accepts_valid_signature() {
        let provider = provider_with_secret("whsec");
        let signature = sign("whsec", "order_1", "pay_1");
        let outcome = provider
            .resolve(&ResolveRequest::Razorpay {
                order_id: "order_1".to_string(),
                payment_id: "pay_1".to_string(),
                signature,
            })
            .await
            .unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.provider_status, "captured");
        assert_eq!(outcome.provider_payment_id.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn resolve_rejects_tampered_signature() {
        let provider = provider_with_secret("whsec");
        let signature = sign("whsec", "order_1", "pay_2");
        let outcome = provider
            .resolve(&ResolveRequest::Razorpay {
                order_id: "order_1".to_string(),
                payment_id: "pay_1".to_string(),
                signature,
            })
            .await
            .unwrap();
        assert!(!outcome.verified);
        assert_eq!(outcome.provider_status, "signature_mismatch");
    }

    #[test]
    fn currency_matrix_is_inr_and_usd() {
        let provider = provider_with_secret("whsec");
        assert!(provider.is_currency_supported("INR"));
        assert!(provider.is_currency_supported("USD"));
        assert!(!provider.is_currency_supported("EUR"));
    }
}
