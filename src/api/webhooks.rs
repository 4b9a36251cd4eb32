//! Provider webhook endpoints.
//!
//! Handlers consume the raw body bytes (signature schemes are computed
//! over the exact wire bytes), verify, normalize, and publish to the bus
//! before responding. Verification failures and unlisted event types are
//! acknowledged with 200 and no side effects; the error taxonomy never
//! leaks back to a provider.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::domain::payment::Provider;
use crate::webhooks::normalize::normalize;
use crate::webhooks::verify::PaypalHeaders;

use super::ApiState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn ack_ignored() -> (StatusCode, Json<JsonValue>) {
    (StatusCode::OK, Json(serde_json::json!({"status": "ignored"})))
}

/// POST /api/webhooks/:provider
pub async fn handle_webhook(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let provider = match Provider::from_str(&provider) {
        Ok(provider) => provider,
        Err(_) => {
            warn!(provider = %provider, "webhook for unknown provider");
            return (StatusCode::NOT_FOUND, Json(serde_json::json!({"status": "unknown"})))
                .into_response();
        }
    };

    info!(provider = %provider, bytes = body.len(), "webhook received");

    let verified = match provider {
        Provider::Stripe => match header(&headers, "stripe-signature") {
            Some(signature) => state.verifier.verify_stripe(&body, signature),
            None => false,
        },
        Provider::Razorpay => match header(&headers, "x-razorpay-signature") {
            Some(signature) => state.verifier.verify_razorpay(&body, signature),
            None => false,
        },
        Provider::Paypal => {
            let paypal_headers = (
                header(&headers, "paypal-auth-algo"),
                header(&headers, "paypal-cert-url"),
                header(&headers, "paypal-transmission-id"),
                header(&headers, "paypal-transmission-sig"),
                header(&headers, "paypal-transmission-time"),
            );
            match paypal_headers {
                (Some(auth_algo), Some(cert_url), Some(id), Some(sig), Some(time)) => {
                    state
                        .verifier
                        .verify_paypal(
                            &body,
                            &PaypalHeaders {
                                auth_algo: auth_algo.to_string(),
                                cert_url: cert_url.to_string(),
                                transmission_id: id.to_string(),
                                transmission_sig: sig.to_string(),
                                transmission_time: time.to_string(),
                            },
                        )
                        .await
                }
                _ => false,
            }
        }
    };

    if !verified {
        // Invalid input never poisons the pipeline; acknowledge and drop.
        warn!(provider = %provider, "webhook signature verification failed");
        return ack_ignored().into_response();
    }

    let payload: JsonValue = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(provider = %provider, error = %e, "webhook body is not valid JSON");
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"status": "invalid"})))
                .into_response();
        }
    };

    let event_id_hint = header(&headers, "x-razorpay-event-id");
    let event = match normalize(provider, &payload, event_id_hint) {
        Some(event) => event,
        None => {
            info!(provider = %provider, "webhook event type not in allow-list, ignoring");
            return ack_ignored().into_response();
        }
    };

    match state.publisher.publish_provider_event(&event).await {
        Ok(()) => {
            info!(
                provider = %provider,
                event_id = %event.provider_event_id,
                event_type = %event.provider_event_type,
                "provider event published"
            );
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(e) => {
            // Non-2xx makes the provider redeliver; the consumer-side
            // dedup absorbs the duplicate.
            error!(provider = %provider, error = %e, "provider event publish failed");
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({"status": "error"})))
                .into_response()
        }
    }
}
