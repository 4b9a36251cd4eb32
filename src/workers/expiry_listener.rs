//! Primary timeout path: Redis key-expiration listener.
//!
//! Subscribes to `__keyevent@*__:expired` on a dedicated pub/sub
//! connection and dispatches `HandlePaymentTimeout` for every expired
//! `payments:timeout:*` key. Expired-event delivery is best effort on the
//! Redis side; the sweeper closes the gap.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cache::keys::timeout::TimeoutKey;
use crate::services::orchestrator::PaymentOrchestrator;

const EXPIRED_EVENT_PATTERN: &str = "__keyevent@*__:expired";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct ExpiryListener {
    redis_url: String,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl ExpiryListener {
    pub fn new(redis_url: impl Into<String>, orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self {
            redis_url: redis_url.into(),
            orchestrator,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(pattern = EXPIRED_EVENT_PATTERN, "expiry listener started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let mut listen_rx = shutdown_rx.clone();
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                result = self.listen(&mut listen_rx) => {
                    if let Err(e) = result {
                        warn!(error = %e, "expiry listener connection lost, reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }

        info!("expiry listener stopped");
    }

    async fn listen(&self, shutdown_rx: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let connection = client.get_async_connection().await?;
        let mut pubsub = connection.into_pubsub();
        pubsub.psubscribe(EXPIRED_EVENT_PATTERN).await?;
        info!("expiry listener subscribed to key-expiration notifications");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                message = stream.next() => {
                    let Some(message) = message else {
                        anyhow::bail!("pubsub stream closed");
                    };
                    let expired_key: String = match message.get_payload() {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(error = %e, "undecodable expiration notification");
                            continue;
                        }
                    };
                    self.handle_expired_key(&expired_key).await;
                }
            }
        }
    }

    async fn handle_expired_key(&self, key: &str) {
        let Some(payment_id) = TimeoutKey::parse(key) else {
            return;
        };
        info!(payment_id = %payment_id, "payment timeout key expired");
        if let Err(e) = self.orchestrator.handle_timeout(payment_id).await {
            error!(payment_id = %payment_id, error = %e, "timeout handling failed");
        }
    }
}
