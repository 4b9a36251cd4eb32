//! Safety-net sweeper for payments the expiry listener missed.
//!
//! Runs on a fixed interval and expires PENDING payments whose deadline
//! has passed (inclusive comparison). Idempotent with the primary path:
//! `HandlePaymentTimeout` no-ops on anything that is no longer PENDING.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::services::orchestrator::PaymentOrchestrator;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub batch_limit: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_limit: 50,
        }
    }
}

pub struct TimeoutSweeper {
    orchestrator: Arc<PaymentOrchestrator>,
    config: SweeperConfig,
}

impl TimeoutSweeper {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, config: SweeperConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_limit = self.config.batch_limit,
            "timeout sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("timeout sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "sweep cycle failed");
                    }
                }
            }
        }

        info!("timeout sweeper stopped");
    }

    /// One sweep: expire every overdue PENDING payment in the batch.
    /// Failures are isolated per payment.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let overdue = self
            .orchestrator
            .expired_pending(Utc::now(), self.config.batch_limit)
            .await?;

        if overdue.is_empty() {
            return Ok(0);
        }
        info!(count = overdue.len(), "sweeping overdue payments");

        let mut expired = 0;
        for payment in overdue {
            match self.orchestrator.handle_timeout(payment.id).await {
                Ok(()) => expired += 1,
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e, "sweeper failed to expire payment");
                }
            }
        }
        Ok(expired)
    }
}
