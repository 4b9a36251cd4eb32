//! Service health probes.
//!
//! Readiness distinguishes the core dependencies (store, cache) from the
//! provider fleet: a dead database or Redis makes the service unavailable,
//! while an unreachable provider only degrades it, since the remaining
//! providers keep working.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::cache::store::RedisStore;
use crate::database::payment_store::PostgresPaymentStore;
use crate::providers::ProviderFactory;

const PROBE_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub component: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub readiness: Readiness,
    pub probes: Vec<ProbeResult>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn accepts_traffic(&self) -> bool {
        !matches!(self.readiness, Readiness::Unavailable)
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<PostgresPaymentStore>,
    cache: RedisStore,
    providers: Arc<ProviderFactory>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<PostgresPaymentStore>,
        cache: RedisStore,
        providers: Arc<ProviderFactory>,
    ) -> Self {
        Self {
            store,
            cache,
            providers,
        }
    }

    pub async fn report(&self) -> HealthReport {
        let mut probes = Vec::new();

        let database = probe("database", async {
            self.store.ping().await.map_err(|e| e.to_string())
        })
        .await;
        let cache = probe("cache", async {
            self.cache.ping().await.map_err(|e| e.to_string())
        })
        .await;
        let core_ok = database.healthy && cache.healthy;
        probes.push(database);
        probes.push(cache);

        let mut all_providers_ok = true;
        for provider in self.providers.list() {
            let started = Instant::now();
            let available = tokio::time::timeout(PROBE_DEADLINE, provider.is_available())
                .await
                .unwrap_or(false);
            all_providers_ok &= available;
            probes.push(ProbeResult {
                component: format!("provider:{}", provider.name()),
                healthy: available,
                latency_ms: started.elapsed().as_millis() as u64,
                detail: (!available).then(|| "unreachable".to_string()),
            });
        }

        let readiness = if !core_ok {
            Readiness::Unavailable
        } else if !all_providers_ok {
            Readiness::Degraded
        } else {
            Readiness::Ready
        };

        HealthReport {
            readiness,
            probes,
            checked_at: Utc::now(),
        }
    }
}

async fn probe<F>(component: &str, check: F) -> ProbeResult
where
    F: Future<Output = Result<(), String>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(PROBE_DEADLINE, check).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(())) => ProbeResult {
            component: component.to_string(),
            healthy: true,
            latency_ms,
            detail: None,
        },
        Ok(Err(detail)) => {
            warn!(component, detail = %detail, "health probe failed");
            ProbeResult {
                component: component.to_string(),
                healthy: false,
                latency_ms,
                detail: Some(detail),
            }
        }
        Err(_) => ProbeResult {
            component: component.to_string(),
            healthy: false,
            latency_ms,
            detail: Some("probe deadline exceeded".to_string()),
        },
    }
}
