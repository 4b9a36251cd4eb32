//! Redis-backed cache and distributed-lock layer.
//!
//! The `KeyValueStore` port in [`store`] owns its own pool; there is no
//! shared cache bootstrap beyond it. Read-through paths degrade when Redis
//! is down, but the idempotency lock path never does: mutual exclusion is
//! not assumed on a best-effort connection.

pub mod error;
pub mod keys;
pub mod store;
