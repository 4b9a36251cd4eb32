//! Postgres persistence for the payment aggregate.
//!
//! The only store in this service is [`payment_store::PostgresPaymentStore`],
//! which owns its connection pool; see `PostgresPaymentStore::connect`.

pub mod error;
pub mod payment_store;
