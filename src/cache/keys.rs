//! Type-safe cache key builders
//!
//! Every Redis key the service touches is built here so the namespaces stay
//! greppable: `lock:*`, `result:*`, `payments:timeout:*`, `processed:*`,
//! `cache:payment:*`, `fx:*`, `paypal_cert:*`.

use std::fmt;
use uuid::Uuid;

pub mod idempotency {
    use super::*;

    /// Short-lived mutual-exclusion lock, one per idempotency key.
    #[derive(Debug, Clone)]
    pub struct LockKey {
        pub key: Uuid,
    }

    impl LockKey {
        pub fn new(key: Uuid) -> Self {
            Self { key }
        }
    }

    impl fmt::Display for LockKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "lock:{}", self.key)
        }
    }

    /// Cached serialized result of a completed execution.
    #[derive(Debug, Clone)]
    pub struct ResultKey {
        pub key: Uuid,
    }

    impl ResultKey {
        pub fn new(key: Uuid) -> Self {
            Self { key }
        }
    }

    impl fmt::Display for ResultKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "result:{}", self.key)
        }
    }
}

pub mod timeout {
    use super::*;

    pub const PREFIX: &str = "payments:timeout:";

    #[derive(Debug, Clone)]
    pub struct TimeoutKey {
        pub payment_id: Uuid,
    }

    impl TimeoutKey {
        pub fn new(payment_id: Uuid) -> Self {
            Self { payment_id }
        }

        /// Recover the payment id from an expired-key notification.
        pub fn parse(key: &str) -> Option<Uuid> {
            key.strip_prefix(PREFIX)
                .and_then(|suffix| Uuid::parse_str(suffix).ok())
        }
    }

    impl fmt::Display for TimeoutKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}{}", PREFIX, self.payment_id)
        }
    }
}

pub mod processed_event {
    use super::*;
    use crate::domain::payment::Provider;

    #[derive(Debug, Clone)]
    pub struct ProcessedKey {
        pub provider: Provider,
        pub provider_event_id: String,
    }

    impl ProcessedKey {
        pub fn new(provider: Provider, provider_event_id: impl Into<String>) -> Self {
            Self {
                provider,
                provider_event_id: provider_event_id.into(),
            }
        }
    }

    impl fmt::Display for ProcessedKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "processed:{}:{}", self.provider, self.provider_event_id)
        }
    }
}

pub mod fx {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct RateKey {
        pub base: String,
        pub target: String,
    }

    impl RateKey {
        pub fn new(base: impl Into<String>, target: impl Into<String>) -> Self {
            Self {
                base: base.into().to_uppercase(),
                target: target.into().to_uppercase(),
            }
        }
    }

    impl fmt::Display for RateKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fx:{}:{}", self.base, self.target)
        }
    }
}

pub mod paypal {
    use super::*;

    /// Certificates are cached under the digest of their URL, not the URL
    /// itself, to keep the key length bounded.
    #[derive(Debug, Clone)]
    pub struct CertKey {
        pub url_digest: String,
    }

    impl CertKey {
        pub fn from_url(cert_url: &str) -> Self {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(cert_url.as_bytes());
            Self {
                url_digest: hex::encode(hasher.finalize()),
            }
        }
    }

    impl fmt::Display for CertKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "paypal_cert:{}", self.url_digest)
        }
    }
}

pub mod payment {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct PaymentKey {
        pub payment_id: Uuid,
    }

    impl PaymentKey {
        pub fn new(payment_id: Uuid) -> Self {
            Self { payment_id }
        }
    }

    impl fmt::Display for PaymentKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "cache:payment:{}", self.payment_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::Provider;

    #[test]
    fn test_lock_and_result_keys() {
        let id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert_eq!(
            idempotency::LockKey::new(id).to_string(),
            "lock:6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
        assert_eq!(
            idempotency::ResultKey::new(id).to_string(),
            "result:6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
    }

    #[test]
    fn test_timeout_key_round_trip() {
        let id = Uuid::new_v4();
        let key = timeout::TimeoutKey::new(id).to_string();
        assert!(key.starts_with("payments:timeout:"));
        assert_eq!(timeout::TimeoutKey::parse(&key), Some(id));
    }

    #[test]
    fn test_timeout_parse_rejects_foreign_keys() {
        assert_eq!(timeout::TimeoutKey::parse("session:abc"), None);
        assert_eq!(timeout::TimeoutKey::parse("payments:timeout:not-a-uuid"), None);
    }

    #[test]
    fn test_processed_event_key() {
        let key = processed_event::ProcessedKey::new(Provider::Razorpay, "evt_9");
        assert_eq!(key.to_string(), "processed:razorpay:evt_9");
    }

    #[test]
    fn test_fx_key_uppercases() {
        assert_eq!(fx::RateKey::new("eur", "usd").to_string(), "fx:EUR:USD");
    }

    #[test]
    fn test_paypal_cert_key_is_digest() {
        let key = paypal::CertKey::from_url("https://api.paypal.com/cert.pem");
        assert!(key.to_string().starts_with("paypal_cert:"));
        assert_eq!(key.url_digest.len(), 64);
    }
}
