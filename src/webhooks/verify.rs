//! Webhook signature verification over raw request bodies.
//!
//! Verification always runs on the bytes exactly as received; serializing
//! and re-serializing JSON would silently break every scheme here. All
//! comparisons against attacker-supplied signatures are constant-time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::cache::keys::paypal::CertKey;
use crate::cache::store::KeyValueStore;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for a Stripe-signed timestamp (5 minutes).
const STRIPE_MAX_AGE_SECS: i64 = 300;
/// Clock skew tolerance for future timestamps.
const STRIPE_FUTURE_TOLERANCE_SECS: i64 = 60;
/// PayPal certificates are cached for 12 hours.
const PAYPAL_CERT_TTL: Duration = Duration::from_secs(12 * 3600);

#[derive(Debug, Clone)]
pub struct PaypalHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

pub struct PaypalVerification {
    pub webhook_id: String,
    pub cache: Arc<dyn KeyValueStore>,
    pub client: reqwest::Client,
}

/// Per-provider webhook verifier. Providers without configured secrets
/// reject everything.
pub struct WebhookVerifier {
    stripe_secret: Option<String>,
    razorpay_secret: Option<String>,
    paypal: Option<PaypalVerification>,
}

impl WebhookVerifier {
    pub fn new(
        stripe_secret: Option<String>,
        razorpay_secret: Option<String>,
        paypal: Option<PaypalVerification>,
    ) -> Self {
        Self {
            stripe_secret,
            razorpay_secret,
            paypal,
        }
    }

    pub fn verify_stripe(&self, body: &[u8], signature_header: &str) -> bool {
        let Some(secret) = self.stripe_secret.as_deref() else {
            warn!("stripe webhook secret not configured");
            return false;
        };
        verify_stripe_at(secret, body, signature_header, chrono::Utc::now().timestamp())
    }

    pub fn verify_razorpay(&self, body: &[u8], signature_header: &str) -> bool {
        let Some(secret) = self.razorpay_secret.as_deref() else {
            warn!("razorpay webhook secret not configured");
            return false;
        };
        verify_razorpay_signature(secret, body, signature_header)
    }

    pub async fn verify_paypal(&self, body: &[u8], headers: &PaypalHeaders) -> bool {
        let Some(paypal) = self.paypal.as_ref() else {
            warn!("paypal webhook verification not configured");
            return false;
        };

        if !headers.auth_algo.to_uppercase().contains("SHA256") {
            warn!(algo = %headers.auth_algo, "unsupported paypal auth algorithm");
            return false;
        }
        if !paypal_cert_url_is_trusted(&headers.cert_url) {
            warn!(cert_url = %headers.cert_url, "untrusted paypal cert url");
            return false;
        }

        let cert_pem = match self.fetch_cert(paypal, &headers.cert_url).await {
            Some(pem) => pem,
            None => return false,
        };

        let body_digest = hex::encode(Sha256::digest(body));
        let expected = format!(
            "{}|{}|{}|{}",
            headers.transmission_id, headers.transmission_time, paypal.webhook_id, body_digest
        );

        let signature = match BASE64.decode(headers.transmission_sig.trim()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "paypal transmission signature is not valid base64");
                return false;
            }
        };

        verify_rsa_sha256(&cert_pem, expected.as_bytes(), &signature)
    }

    async fn fetch_cert(&self, paypal: &PaypalVerification, cert_url: &str) -> Option<String> {
        let key = CertKey::from_url(cert_url).to_string();
        match paypal.cache.get(&key).await {
            Ok(Some(pem)) => return Some(pem),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "paypal cert cache read failed"),
        }

        let response = match paypal.client.get(cert_url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = %resp.status(), "paypal cert fetch failed");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "paypal cert fetch failed");
                return None;
            }
        };
        let pem = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "paypal cert body read failed");
                return None;
            }
        };

        if let Err(e) = paypal.cache.set(&key, &pem, Some(PAYPAL_CERT_TTL)).await {
            warn!(error = %e, "paypal cert cache write failed");
        }
        Some(pem)
    }
}

fn paypal_cert_url_is_trusted(cert_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(cert_url) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    matches!(url.host_str(), Some(host) if host == "paypal.com" || host.ends_with(".paypal.com"))
}

fn verify_rsa_sha256(cert_pem: &str, message: &[u8], signature: &[u8]) -> bool {
    use openssl::hash::MessageDigest;
    use openssl::sign::Verifier;
    use openssl::x509::X509;

    let cert = match X509::from_pem(cert_pem.as_bytes()) {
        Ok(cert) => cert,
        Err(e) => {
            warn!(error = %e, "paypal cert parse failed");
            return false;
        }
    };
    let public_key = match cert.public_key() {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "paypal cert public key extraction failed");
            return false;
        }
    };
    let mut verifier = match Verifier::new(MessageDigest::sha256(), &public_key) {
        Ok(verifier) => verifier,
        Err(e) => {
            warn!(error = %e, "openssl verifier init failed");
            return false;
        }
    };
    if verifier.update(message).is_err() {
        return false;
    }
    verifier.verify(signature).unwrap_or(false)
}

/// Stripe `stripe-signature` header: `t=<epoch>,v1=<hex>[,v1=<hex>...]`.
/// The signed payload is `{t}.{raw body}`.
pub fn verify_stripe_at(secret: &str, body: &[u8], header: &str, now_epoch: i64) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let (Some(timestamp), false) = (timestamp, candidates.is_empty()) else {
        return false;
    };

    let age = now_epoch - timestamp;
    if age > STRIPE_MAX_AGE_SECS || age < -STRIPE_FUTURE_TOLERANCE_SECS {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    candidates
        .iter()
        .any(|candidate| expected.as_bytes().ct_eq(candidate.trim().as_bytes()).into())
}

/// Razorpay: hex HMAC-SHA256 of the raw body under the webhook secret.
pub fn verify_razorpay_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.as_bytes().ct_eq(signature.trim().as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_header(secret: &str, body: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn stripe_accepts_fresh_valid_signature() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = stripe_header("whsec_test", body, 1_700_000_000);
        assert!(verify_stripe_at("whsec_test", body, &header, 1_700_000_100));
    }

    #[test]
    fn stripe_rejects_wrong_secret() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = stripe_header("whsec_other", body, 1_700_000_000);
        assert!(!verify_stripe_at("whsec_test", body, &header, 1_700_000_100));
    }

    #[test]
    fn stripe_rejects_stale_timestamp() {
        let body = br#"{}"#;
        let header = stripe_header("whsec_test", body, 1_700_000_000);
        assert!(!verify_stripe_at(
            "whsec_test",
            body,
            &header,
            1_700_000_000 + STRIPE_MAX_AGE_SECS + 1
        ));
    }

    #[test]
    fn stripe_rejects_tampered_body() {
        let header = stripe_header("whsec_test", br#"{"amount":100}"#, 1_700_000_000);
        assert!(!verify_stripe_at(
            "whsec_test",
            br#"{"amount":999}"#,
            &header,
            1_700_000_050
        ));
    }

    #[test]
    fn stripe_rejects_malformed_header() {
        assert!(!verify_stripe_at("whsec_test", b"{}", "not-a-header", 0));
        assert!(!verify_stripe_at("whsec_test", b"{}", "t=abc,v1=", 0));
    }

    #[test]
    fn razorpay_round_trip() {
        let body = br#"{"event":"payment.captured"}"#;
        let mut mac = HmacSha256::new_from_slice(b"rzp_secret").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_razorpay_signature("rzp_secret", body, &signature));
        assert!(!verify_razorpay_signature("rzp_secret", body, "deadbeef"));
        assert!(!verify_razorpay_signature("wrong", body, &signature));
    }

    #[test]
    fn paypal_cert_url_trust() {
        assert!(paypal_cert_url_is_trusted(
            "https://api.paypal.com/v1/notifications/certs/CERT-360caa42"
        ));
        assert!(!paypal_cert_url_is_trusted(
            "http://api.paypal.com/v1/notifications/certs/CERT-360caa42"
        ));
        assert!(!paypal_cert_url_is_trusted("https://evil.example.com/cert"));
        assert!(!paypal_cert_url_is_trusted(
            "https://paypal.com.evil.example.com/cert"
        ));
    }
}
