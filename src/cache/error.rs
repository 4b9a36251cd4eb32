//! Errors for the cache and distributed-lock layer.
//!
//! Callers care about one distinction: could Redis not be reached at all
//! (pool checkout), did a command fail mid-flight, or did a stored value
//! (cached result, timeout record, FX quote) come back undecodable. The
//! idempotency path treats all three as hard failures; read-through
//! caching degrades on the first two.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No connection could be checked out of the pool in time.
    #[error("redis connection unavailable: {0}")]
    Unavailable(String),

    /// A command round-trip failed after a connection was obtained.
    #[error("redis command failed: {0}")]
    Command(#[from] redis::RedisError),

    /// A stored value failed to decode into its expected shape.
    #[error("cached value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(e) => CacheError::Command(e),
            bb8::RunError::TimedOut => {
                CacheError::Unavailable("pool checkout timed out".to_string())
            }
        }
    }
}
