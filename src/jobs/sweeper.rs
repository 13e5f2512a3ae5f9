use super::store::JobStore;
use crate::server::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically evicts jobs older than the retention horizon.
pub struct JobRetentionSweeper {
    store: Arc<JobStore>,
    interval: Duration,
    max_age: Duration,
}

impl JobRetentionSweeper {
    pub fn new(store: Arc<JobStore>, interval: Duration, max_age: Duration) -> Self {
        Self {
            store,
            interval,
            max_age,
        }
    }

    /// Runs until `shutdown` is cancelled. The first pass happens one full
    /// interval after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Job retention sweeper starting (interval={}s, max_age={}s)",
            self.interval.as_secs(),
            self.max_age.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip the first immediate tick, wait for the first interval
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.cancelled() => {
                    info!("Job retention sweeper shutting down");
                    break;
                }
            }
        }
    }

    pub fn sweep_once(&self) -> usize {
        let removed = self.store.sweep(self.max_age);
        let remaining = self.store.len();
        metrics::record_sweep(removed, remaining);

        if removed > 0 {
            info!("Swept {} expired jobs, {} remaining", removed, remaining);
        } else {
            debug!("Job sweep found nothing to evict ({} jobs held)", remaining);
        }
        removed
    }
}
