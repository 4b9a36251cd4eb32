//! Idempotency engine: lock-guarded, result-cached execution.
//!
//! The lock is a single atomic `SET NX EX`; no separate existence check is
//! needed because the result lookup already ran and the lock makes the
//! execution single-writer. Failed executions are never cached, so a retry
//! after the lock window can legitimately run again.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::keys::idempotency::{LockKey, ResultKey};
use crate::cache::store::KeyValueStore;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub lock_ttl: Duration,
    pub result_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            result_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Clone)]
pub struct IdempotencyEngine {
    cache: Arc<dyn KeyValueStore>,
    config: IdempotencyConfig,
}

impl IdempotencyEngine {
    pub fn new(cache: Arc<dyn KeyValueStore>, config: IdempotencyConfig) -> Self {
        Self { cache, config }
    }

    /// Run `op` at most once per key. A cached success is returned without
    /// invoking `op`; a concurrent duplicate fails with `InProgress`.
    pub async fn run<T, F, Fut>(&self, key: Uuid, op: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let result_key = ResultKey::new(key).to_string();
        if let Some(cached) = self.cache.get(&result_key).await? {
            debug!(idempotency_key = %key, "returning cached result");
            return serde_json::from_str(&cached).map_err(|e| {
                AppError::Internal(format!("cached result deserialization failed: {}", e))
            });
        }

        let lock_key = LockKey::new(key).to_string();
        let acquired = self
            .cache
            .set_if_absent(&lock_key, "1", self.config.lock_ttl)
            .await?;
        if !acquired {
            return Err(AppError::InProgress);
        }

        let outcome = op().await;

        if let Ok(value) = &outcome {
            match serde_json::to_string(value) {
                Ok(serialized) => {
                    if let Err(e) = self
                        .cache
                        .set(&result_key, &serialized, Some(self.config.result_ttl))
                        .await
                    {
                        warn!(idempotency_key = %key, error = %e, "failed to cache result");
                    }
                }
                Err(e) => {
                    warn!(idempotency_key = %key, error = %e, "result serialization failed")
                }
            }
        }

        if let Err(e) = self.cache.delete(&lock_key).await {
            warn!(idempotency_key = %key, error = %e, "failed to release idempotency lock");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine() -> (IdempotencyEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = IdempotencyEngine::new(store.clone(), IdempotencyConfig::default());
        (engine, store)
    }

    #[tokio::test]
    async fn second_call_returns_cached_result_without_executing() {
        let (engine, _) = engine();
        let key = Uuid::new_v4();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: i64 = engine
                .run(key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(result, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_gets_in_progress() {
        let (engine, store) = engine();
        let key = Uuid::new_v4();

        // Simulate an in-flight execution holding the lock.
        store
            .set_if_absent(
                &LockKey::new(key).to_string(),
                "1",
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let result: AppResult<i64> = engine.run(key, || async { Ok(1) }).await;
        assert!(matches!(result, Err(AppError::InProgress)));
    }

    #[tokio::test]
    async fn failure_is_not_cached_and_lock_is_released() {
        let (engine, store) = engine();
        let key = Uuid::new_v4();
        let calls = AtomicU32::new(0);

        let first: AppResult<i64> = engine
            .run(key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Internal("boom".to_string()))
            })
            .await;
        assert!(first.is_err());
        assert!(!store
            .exists(&LockKey::new(key).to_string())
            .await
            .unwrap());

        let second: i64 = engine
            .run(key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(second, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let (engine, _) = engine();
        let a: i64 = engine.run(Uuid::new_v4(), || async { Ok(1) }).await.unwrap();
        let b: i64 = engine.run(Uuid::new_v4(), || async { Ok(2) }).await.unwrap();
        assert_eq!((a, b), (1, 2));
    }
}
