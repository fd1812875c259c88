use crate::payments::types::TransactionState;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PendingSweeperConfig {
    /// How often the sweeper wakes up.
    pub poll_interval: Duration,
    /// Maximum number of expired transactions handled per cycle.
    pub batch_size: i64,
    /// Transactions resolved in parallel within one cycle.
    pub concurrency: usize,
}

impl Default for PendingSweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 100,
            concurrency: 4,
        }
    }
}

impl PendingSweeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("PENDING_SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("PENDING_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg.concurrency = std::env::var("PENDING_SWEEP_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(cfg.concurrency);
        cfg
    }
}

/// Counts from one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub cancelled: usize,
    /// Settled or failed by a last-chance gateway verification.
    pub resolved: usize,
    /// Left pending, usually because the gateway could not be reached.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Moves `pending` transactions older than the payment window to
/// `cancelled` through the same compare-and-set the orchestrator uses.
pub struct PendingSweeperWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    config: PendingSweeperConfig,
}

impl PendingSweeperWorker {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, config: PendingSweeperConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            pending_expiry_secs = self.orchestrator.config().pending_expiry.as_secs(),
            "pending transaction sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending transaction sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "pending sweep cycle failed");
                    }
                }
            }
        }

        info!("pending transaction sweeper stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<SweepReport> {
        let expired = self
            .orchestrator
            .stale_pending(self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<_> = stream::iter(expired)
            .map(|tx| {
                let orchestrator = Arc::clone(&self.orchestrator);
                async move {
                    let result = orchestrator.cancel_expired(&tx.reference).await;
                    (tx.reference, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (reference, result) in outcomes {
            match result {
                Ok(tx) if tx.status == TransactionState::Cancelled => report.cancelled += 1,
                Ok(tx) if tx.status == TransactionState::Pending => report.skipped += 1,
                Ok(tx) => {
                    debug!(reference = %reference, status = %tx.status, "resolved during sweep");
                    report.resolved += 1;
                }
                Err(e) => {
                    warn!(reference = %reference, error = %e, "could not expire transaction");
                    report.skipped += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            cancelled = report.cancelled,
            resolved = report.resolved,
            skipped = report.skipped,
            "pending sweep complete"
        );
        Ok(report)
    }
}
