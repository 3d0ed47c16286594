use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

/// The instant `secs` seconds before `now`, or `None` when that lies outside
/// the representable range and nothing can be old enough.
pub fn retention_cutoff(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_sub_signed(TimeDelta::try_seconds(secs)?)
}

/// Write-ahead log configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WalConfig {
    /// How long confirmed or discarded records are kept before compaction. Default: 3600.
    #[serde(default = "default_wal_compaction_retention_secs")]
    pub compaction_retention_secs: u64,
    /// Interval between background compaction runs. Default: 300.
    #[serde(default = "default_wal_compaction_interval_secs")]
    pub compaction_interval_secs: u64,
}

fn default_wal_compaction_retention_secs() -> u64 {
    3600
}
fn default_wal_compaction_interval_secs() -> u64 {
    300
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            compaction_retention_secs: default_wal_compaction_retention_secs(),
            compaction_interval_secs: default_wal_compaction_interval_secs(),
        }
    }
}

impl WalConfig {
    pub fn compaction_retention(&self) -> Duration {
        Duration::from_secs(self.compaction_retention_secs)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }

    /// Records settled before this instant may be compacted.
    pub fn compaction_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        retention_cutoff(now, self.compaction_retention_secs)
    }
}

/// Dead-letter queue configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DlqConfig {
    /// Retry ceiling; entries at or above it are permanent. Default: 5.
    #[serde(default = "default_dlq_max_retries")]
    pub max_retries: u32,
    /// How long permanent entries are kept after their last failure. Default: 7 days.
    #[serde(default = "default_dlq_retention_secs")]
    pub retention_secs: u64,
    /// Interval between cleanup runs. Default: 3600.
    #[serde(default = "default_dlq_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_dlq_max_retries() -> u32 {
    5
}
fn default_dlq_retention_secs() -> u64 {
    7 * 24 * 3600
}
fn default_dlq_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_retries: default_dlq_max_retries(),
            retention_secs: default_dlq_retention_secs(),
            cleanup_interval_secs: default_dlq_cleanup_interval_secs(),
        }
    }
}

impl DlqConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Permanent entries whose last failure precedes this instant may be purged.
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        retention_cutoff(now, self.retention_secs)
    }
}

/// Auto-retry scheduler and backoff configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Interval between retry sweeps. Default: 30000.
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound on a single reapplication. Default: 30000.
    #[serde(default = "default_retry_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Default: 1000.
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Default: 60000.
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Default: 2.0.
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    /// Default: 0.1.
    #[serde(default = "default_retry_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Entries retried concurrently within one sweep. Default: 5.
    #[serde(default = "default_retry_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_retry_interval_ms() -> u64 {
    30_000
}
fn default_retry_attempt_timeout_ms() -> u64 {
    30_000
}
fn default_retry_initial_backoff_ms() -> u64 {
    1000
}
fn default_retry_max_backoff_ms() -> u64 {
    60_000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_jitter_fraction() -> f64 {
    0.1
}
fn default_retry_max_concurrent() -> usize {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            attempt_timeout_ms: default_retry_attempt_timeout_ms(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
            multiplier: default_retry_multiplier(),
            jitter_fraction: default_retry_jitter_fraction(),
            max_concurrent: default_retry_max_concurrent(),
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}
