use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dlq::DeadLetterQueue;
use crate::error::Result;
use crate::wal::WriteAheadLog;

/// Periodically reapplies due dead-letter entries.
pub struct RetryScheduler {
    dlq: Arc<DeadLetterQueue>,
    interval: Duration,
    running: AtomicBool,
}

/// Clears the running flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RetryScheduler {
    pub fn new(dlq: Arc<DeadLetterQueue>, interval: Duration) -> Self {
        Self {
            dlq,
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sweep. Returns `None` if another sweep is still in progress.
    pub async fn sweep(&self) -> Result<Option<usize>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Previous retry sweep still running, skipping");
            return Ok(None);
        }
        let _guard = SweepGuard(&self.running);

        self.dlq.retry_all().await.map(Some)
    }

    /// Sweep on every tick until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            max_retries = self.dlq.max_retries(),
            "Starting dead-letter retry scheduler"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.sweep().await {
                error!(error = %e, "Dead-letter retry sweep failed");
            }
        }

        info!("Dead-letter retry scheduler stopped");
    }
}

/// Compact the WAL on every tick until `shutdown` is cancelled.
pub async fn run_compactor(
    wal: Arc<WriteAheadLog>,
    every: Duration,
    shutdown: CancellationToken,
) {
    info!(
        interval_secs = every.as_secs(),
        retention_secs = wal.config().compaction_retention_secs,
        "Starting WAL compactor"
    );

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = wal.compact().await {
            error!(error = %e, "WAL compaction failed");
        }
    }
}

/// Expire old permanent dead-letter entries on every tick until `shutdown` is cancelled.
pub async fn run_dlq_cleanup(
    dlq: Arc<DeadLetterQueue>,
    every: Duration,
    shutdown: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), "Starting dead-letter cleanup");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = dlq.cleanup().await {
            error!(error = %e, "Dead-letter cleanup failed");
        }
    }
}
