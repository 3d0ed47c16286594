use common::{DlqConfig, RetryConfig, WalConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub wal: WalConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("STAGING_CONFIG").unwrap_or_else(|_| "config/staging".into());

        let s = Config::builder()
            .set_default("database.url", "sqlite://data/staging.db?mode=rwc")?
            // Load from config/staging.toml
            .add_source(File::with_name(&path).required(false))
            // Override from environment (e.g., STAGING__DLQ__MAX_RETRIES)
            .add_source(Environment::with_prefix("STAGING").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        let checks = [
            (self.dlq.max_retries >= 1, "dlq.max_retries must be at least 1"),
            (retry.initial_backoff_ms > 0, "retry.initial_backoff_ms must be positive"),
            (
                retry.max_backoff_ms >= retry.initial_backoff_ms,
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms",
            ),
            (retry.multiplier >= 1.0, "retry.multiplier must be at least 1.0"),
            (
                (0.0..=1.0).contains(&retry.jitter_fraction),
                "retry.jitter_fraction must be within [0, 1]",
            ),
            (retry.interval_ms > 0, "retry.interval_ms must be positive"),
            (retry.attempt_timeout_ms > 0, "retry.attempt_timeout_ms must be positive"),
            (retry.max_concurrent >= 1, "retry.max_concurrent must be at least 1"),
            (
                self.wal.compaction_interval_secs > 0,
                "wal.compaction_interval_secs must be positive",
            ),
            (
                self.dlq.cleanup_interval_secs > 0,
                "dlq.cleanup_interval_secs must be positive",
            ),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(ConfigError::Message((*msg).to_string())),
            None => Ok(()),
        }
    }
}
