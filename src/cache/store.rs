//! Key-value store port over Redis.
//!
//! Locks rely on `set_if_absent` being a single atomic `SET NX EX` command;
//! there is deliberately no check-then-set variant.

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::cmd;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::error::{CacheError, CacheResult};

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Atomic `SET NX EX`. Returns `true` when the key was placed, `false`
    /// when it already existed.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> CacheResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> CacheResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

/// How long a checkout may wait for a pooled connection. Kept short: a
/// stalled lock acquisition must fail fast, not queue.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);
/// Connections are recycled after this long to shed stale sockets.
const CONNECTION_LIFETIME: Duration = Duration::from_secs(300);

/// Redis-backed implementation used in production. Owns its pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStore {
    /// Open a pool against `redis_url` and probe it once. An unreachable
    /// Redis does not fail construction: the service boots degraded and
    /// lock-dependent operations error until the connection recovers.
    pub async fn connect(redis_url: &str, max_connections: u32) -> CacheResult<Self> {
        let manager = RedisConnectionManager::new(redis_url)?;
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(CHECKOUT_TIMEOUT)
            .max_lifetime(Some(CONNECTION_LIFETIME))
            .build(manager)
            .await?;

        let store = Self { pool };
        match store.ping().await {
            Ok(()) => info!(max_connections, "redis store online"),
            Err(e) => warn!(error = %e, "redis unreachable at startup, continuing degraded"),
        }
        Ok(store)
    }

    /// Round-trip liveness probe, used by the health surface.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(secs)
                    .query_async::<_, ()>(&mut *conn)
                    .await?;
            }
            None => {
                cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<_, ()>(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let secs = ttl.as_secs().max(1);
        // SET NX EX replies OK on placement, nil when the key exists.
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(secs)
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = cmd("DEL").arg(key).query_async(&mut *conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let found: i64 = cmd("EXISTS").arg(key).query_async(&mut *conn).await?;
        Ok(found > 0)
    }
}

/// In-memory implementation with TTL semantics, used by tests and local
/// development without Redis.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        if self.live_value(key).is_some() {
            return Ok(false);
        }
        self.set(key, value, Some(ttl)).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live_value(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_if_absent_is_exclusive() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("lock:a", "1", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock:a", "1", Duration::from_secs(30))
            .await
            .unwrap());
        store.delete("lock:a").await.unwrap();
        assert!(store
            .set_if_absent("lock:a", "1", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn json_round_trip() {
        let store = MemoryStore::new();
        set_json(&store, "k", &serde_json::json!({"a": 1}), None)
            .await
            .unwrap();
        let value: Option<serde_json::Value> = get_json(&store, "k").await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"a": 1})));
    }
}
