pub mod exchange_rate;
pub mod idempotency;
pub mod orchestrator;
