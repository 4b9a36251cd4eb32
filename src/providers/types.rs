use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::payment::Provider;

/// One purchasable line on the provider checkout page. Unit amounts are
/// minor-unit integers; adapters own any major-unit formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: i64,
    pub unit_amount: i64,
    pub currency: String,
    pub image_url: Option<String>,
}

impl LineItem {
    pub fn total(&self) -> i64 {
        self.unit_amount * self.quantity
    }
}

/// Uniform request shape for `create_session` across all providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: Uuid,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub description: String,
    pub customer_email: Option<String>,
}

/// Provider-specific completion data handed back to the caller so it can
/// finish the checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SessionCompletion {
    Stripe {
        client_secret: Option<String>,
        checkout_url: Option<String>,
    },
    Paypal {
        approval_url: String,
    },
    Razorpay {
        key_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSession {
    pub provider: Provider,
    pub provider_order_id: String,
    /// Amount actually charged by the provider, minor units.
    pub amount: i64,
    pub currency: String,
    pub completion: SessionCompletion,
    pub metadata: JsonValue,
}

/// Provider-specific resolve payloads. Each variant carries enough to find
/// the session on our side and confirm capture on the provider's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ResolveRequest {
    Stripe {
        session_id: String,
    },
    Paypal {
        order_id: String,
    },
    Razorpay {
        order_id: String,
        payment_id: String,
        signature: String,
    },
}

impl ResolveRequest {
    pub fn provider(&self) -> Provider {
        match self {
            ResolveRequest::Stripe { .. } => Provider::Stripe,
            ResolveRequest::Paypal { .. } => Provider::Paypal,
            ResolveRequest::Razorpay { .. } => Provider::Razorpay,
        }
    }

    pub fn provider_order_id(&self) -> &str {
        match self {
            ResolveRequest::Stripe { session_id } => session_id,
            ResolveRequest::Paypal { order_id } => order_id,
            ResolveRequest::Razorpay { order_id, .. } => order_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub provider_status: String,
    pub verified: bool,
    pub provider_payment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub provider_refund_id: Option<String>,
    pub status: RefundStatus,
}

/// ISO-4217 decimal exponent. Zero-decimal currencies pass minor units
/// through unchanged when a provider wants major-unit strings.
pub fn currency_exponent(code: &str) -> u32 {
    match code.to_uppercase().as_str() {
        "JPY" | "KRW" | "VND" => 0,
        _ => 2,
    }
}

/// Format a minor-unit amount as the major-unit decimal string some
/// providers expect, e.g. 5000 USD minor -> "50.00", 500 JPY -> "500".
pub fn minor_to_major_string(amount: i64, currency: &str) -> String {
    let exponent = currency_exponent(currency);
    if exponent == 0 {
        return amount.to_string();
    }
    let factor = 10_i64.pow(exponent);
    let whole = amount / factor;
    let frac = (amount % factor).abs();
    format!("{}.{:0width$}", whole, frac, width = exponent as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_string_formats_two_decimal_currencies() {
        assert_eq!(minor_to_major_string(5000, "USD"), "50.00");
        assert_eq!(minor_to_major_string(1, "USD"), "0.01");
        assert_eq!(minor_to_major_string(10800, "usd"), "108.00");
    }

    #[test]
    fn major_string_passes_zero_decimal_through() {
        assert_eq!(minor_to_major_string(500, "JPY"), "500");
    }

    #[test]
    fn resolve_request_exposes_provider_order_id() {
        let request = ResolveRequest::Razorpay {
            order_id: "order_1".to_string(),
            payment_id: "pay_1".to_string(),
            signature: "sig".to_string(),
        };
        assert_eq!(request.provider(), Provider::Razorpay);
        assert_eq!(request.provider_order_id(), "order_1");
    }

    #[test]
    fn line_item_total_multiplies_quantity() {
        let item = LineItem {
            name: "Course".to_string(),
            quantity: 3,
            unit_amount: 2500,
            currency: "USD".to_string(),
            image_url: None,
        };
        assert_eq!(item.total(), 7500);
    }
}
