use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::services::webhook_processor::WebhookProcessor;

#[derive(Debug, Clone)]
pub struct WebhookRetryConfig {
    pub interval: Duration,
    /// Events that failed this many times are left for manual review.
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl Default for WebhookRetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_attempts: 5,
            batch_size: 50,
        }
    }
}

impl WebhookRetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: std::env::var("WEBHOOK_RETRY_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            max_attempts: std::env::var("WEBHOOK_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(defaults.max_attempts),
            batch_size: std::env::var("WEBHOOK_RETRY_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(defaults.batch_size),
        }
    }
}

pub struct WebhookRetryWorker {
    processor: Arc<WebhookProcessor>,
    config: WebhookRetryConfig,
}

impl WebhookRetryWorker {
    pub fn new(processor: Arc<WebhookProcessor>, config: WebhookRetryConfig) -> Self {
        Self { processor, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "Webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Webhook retry worker stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self
                        .processor
                        .retry_failed(self.config.max_attempts, self.config.batch_size)
                        .await
                    {
                        Ok(count) => {
                            if count > 0 {
                                info!(processed = count, "Retried failed webhooks");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to retry webhooks");
                        }
                    }
                }
            }
        }
    }
}
