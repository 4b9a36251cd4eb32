//! Exchange Rate Service
//!
//! Fetches FX rates through a pluggable source, keeps a short freshness
//! window in the cache, and falls back to the last known (stale) rate when
//! the upstream is down.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::keys::fx::RateKey;
use crate::cache::store::KeyValueStore;
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeRateError {
    #[error("Rate not found for {from} -> {to}")]
    RateNotFound { from: String, to: String },

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Rate provider error: {0}")]
    ProviderError(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

impl From<ExchangeRateError> for AppError {
    fn from(err: ExchangeRateError) -> Self {
        AppError::CurrencyConversion(err.to_string())
    }
}

pub type ExchangeRateResult<T> = Result<T, ExchangeRateError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateQuote {
    pub rate: BigDecimal,
    pub timestamp: DateTime<Utc>,
}

/// Rate provider trait for fetching exchange rates
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rate(&self, base: &str, target: &str) -> ExchangeRateResult<RateQuote>;

    fn name(&self) -> &str;
}

/// Frankfurter-style public FX API source.
pub struct FrankfurterRateSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FrankfurterResponse {
    rates: std::collections::HashMap<String, f64>,
}

impl FrankfurterRateSource {
    pub fn new(base_url: impl Into<String>) -> ExchangeRateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RateSource for FrankfurterRateSource {
    async fn fetch_rate(&self, base: &str, target: &str) -> ExchangeRateResult<RateQuote> {
        let url = format!("{}/latest", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("from", base), ("to", target)])
            .send()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExchangeRateError::ProviderError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: FrankfurterResponse = response
            .json()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;

        let raw = body
            .rates
            .get(&target.to_uppercase())
            .copied()
            .ok_or_else(|| ExchangeRateError::RateNotFound {
                from: base.to_string(),
                to: target.to_string(),
            })?;

        let rate = BigDecimal::from_str(&raw.to_string())
            .map_err(|e| ExchangeRateError::InvalidRate(e.to_string()))?;
        Ok(RateQuote {
            rate,
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "frankfurter"
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeRateConfig {
    /// How long a cached rate counts as fresh.
    pub freshness: Duration,
    /// How long a rate stays around as a stale fallback.
    pub stale_ttl: Duration,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(60),
            stale_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedRate {
    rate: String,
    timestamp: DateTime<Utc>,
    fetched_at: DateTime<Utc>,
}

pub struct ExchangeRateService {
    source: Arc<dyn RateSource>,
    cache: Option<Arc<dyn KeyValueStore>>,
    config: ExchangeRateConfig,
}

impl ExchangeRateService {
    pub fn new(source: Arc<dyn RateSource>, config: ExchangeRateConfig) -> Self {
        Self {
            source,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn KeyValueStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Current rate for `base -> target`. Identical currencies short-circuit
    /// to exactly 1 without touching the cache or the provider.
    pub async fn get_rate(&self, base: &str, target: &str) -> ExchangeRateResult<RateQuote> {
        let base = base.to_uppercase();
        let target = target.to_uppercase();
        if base == target {
            return Ok(RateQuote {
                rate: BigDecimal::from(1),
                timestamp: Utc::now(),
            });
        }

        let cache_key = RateKey::new(&base, &target).to_string();
        let cached = self.read_cached(&cache_key).await;

        if let Some(entry) = &cached {
            let age = Utc::now() - entry.fetched_at;
            if age.num_seconds() >= 0
                && (age.num_seconds() as u64) <= self.config.freshness.as_secs()
            {
                debug!(base = %base, target = %target, "fx cache hit");
                return parse_cached(entry);
            }
        }

        match self.source.fetch_rate(&base, &target).await {
            Ok(quote) => {
                self.write_cached(&cache_key, &quote).await;
                Ok(quote)
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!(
                        base = %base,
                        target = %target,
                        error = %e,
                        "fx fetch failed, serving stale rate"
                    );
                    parse_cached(&entry)
                }
                None => Err(e),
            },
        }
    }

    async fn read_cached(&self, key: &str) -> Option<CachedRate> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "fx cache read failed");
                None
            }
        }
    }

    async fn write_cached(&self, key: &str, quote: &RateQuote) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let entry = CachedRate {
            rate: quote.rate.to_string(),
            timestamp: quote.timestamp,
            fetched_at: Utc::now(),
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = cache.set(key, &raw, Some(self.config.stale_ttl)).await {
                    warn!(error = %e, "fx cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "fx cache serialization failed"),
        }
    }
}

fn parse_cached(entry: &CachedRate) -> ExchangeRateResult<RateQuote> {
    let rate = BigDecimal::from_str(&entry.rate)
        .map_err(|e| ExchangeRateError::InvalidRate(e.to_string()))?;
    Ok(RateQuote {
        rate,
        timestamp: entry.timestamp,
    })
}

/// Minor-unit conversion: minor -> major at `from_factor`, apply the rate,
/// back to minor at `to_factor`, rounded half away from zero.
pub fn convert_minor(
    amount: i64,
    rate: &BigDecimal,
    from_factor: i64,
    to_factor: i64,
) -> ExchangeRateResult<i64> {
    if from_factor <= 0 || to_factor <= 0 {
        return Err(ExchangeRateError::InvalidAmount(
            "conversion factors must be positive".to_string(),
        ));
    }
    let scaled = BigDecimal::from(amount) * rate * BigDecimal::from(to_factor)
        / BigDecimal::from(from_factor);
    scaled
        .round(0)
        .to_i64()
        .ok_or_else(|| ExchangeRateError::InvalidAmount(format!("overflow converting {}", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSource {
        rate: String,
        calls: AtomicU32,
        fail: bool,
    }

    impl FixedSource {
        fn new(rate: &str) -> Self {
            Self {
                rate: rate.to_string(),
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                rate: "0".to_string(),
                calls: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl RateSource for FixedSource {
        async fn fetch_rate(&self, base: &str, target: &str) -> ExchangeRateResult<RateQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExchangeRateError::ProviderError("down".to_string()));
            }
            let _ = (base, target);
            Ok(RateQuote {
                rate: BigDecimal::from_str(&self.rate).unwrap(),
                timestamp: Utc::now(),
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn identical_currencies_return_exactly_one() {
        let source = Arc::new(FixedSource::new("1.08"));
        let service = ExchangeRateService::new(source.clone(), ExchangeRateConfig::default());
        let quote = service.get_rate("USD", "usd").await.unwrap();
        assert_eq!(quote.rate, BigDecimal::from(1));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_provider() {
        let source = Arc::new(FixedSource::new("1.08"));
        let cache: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let service =
            ExchangeRateService::new(source.clone(), ExchangeRateConfig::default()).with_cache(cache);

        service.get_rate("EUR", "USD").await.unwrap();
        service.get_rate("EUR", "USD").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_rate_serves_when_provider_fails() {
        let cache: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let healthy = ExchangeRateService::new(
            Arc::new(FixedSource::new("1.08")),
            ExchangeRateConfig {
                freshness: Duration::from_secs(0),
                ..Default::default()
            },
        )
        .with_cache(cache.clone());
        healthy.get_rate("EUR", "USD").await.unwrap();

        let degraded = ExchangeRateService::new(
            Arc::new(FixedSource::failing()),
            ExchangeRateConfig {
                freshness: Duration::from_secs(0),
                ..Default::default()
            },
        )
        .with_cache(cache);
        let quote = degraded.get_rate("EUR", "USD").await.unwrap();
        assert_eq!(quote.rate, BigDecimal::from_str("1.08").unwrap());
    }

    #[tokio::test]
    async fn provider_failure_without_cache_surfaces() {
        let service = ExchangeRateService::new(
            Arc::new(FixedSource::failing()),
            ExchangeRateConfig::default(),
        );
        assert!(service.get_rate("EUR", "USD").await.is_err());
    }

    #[test]
    fn convert_matches_minor_major_minor_path() {
        // 10000 EUR minor at 1.08 -> 10800 USD minor
        let rate = BigDecimal::from_str("1.08").unwrap();
        assert_eq!(convert_minor(10000, &rate, 100, 100).unwrap(), 10800);
    }

    #[test]
    fn convert_rounds_half_away_from_zero() {
        let rate = BigDecimal::from_str("1.005").unwrap();
        // 101 * 1.005 = 101.505 -> 102
        assert_eq!(convert_minor(101, &rate, 100, 100).unwrap(), 102);
    }

    #[test]
    fn convert_identity_rate_is_noop() {
        let rate = BigDecimal::from(1);
        assert_eq!(convert_minor(12345, &rate, 100, 100).unwrap(), 12345);
    }
}
