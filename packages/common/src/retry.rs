use std::time::Duration;

use rand::Rng;

use crate::category::ErrorCategory;
use crate::config::RetryConfig;

/// Exponential backoff schedule for dead-letter retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fraction of the base delay added as random jitter. `0.0` disables it.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter_fraction: config.jitter_fraction,
        }
    }

    /// Delay before the next attempt without jitter.
    ///
    /// Formula: `min(initial * multiplier^retry_count * category_factor, max)`.
    /// Non-decreasing in `retry_count`.
    pub fn base_delay(&self, retry_count: u32, category: ErrorCategory) -> Duration {
        let max_ms = self.max_backoff.as_millis() as f64;
        let exp = self.multiplier.powi(retry_count.min(i32::MAX as u32) as i32);
        let delay_ms = self.initial_backoff.as_millis() as f64 * exp * category.backoff_factor();

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            return self.max_backoff;
        }
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before the next attempt, with up to `jitter_fraction` of the base added.
    ///
    /// Never exceeds `max_backoff`.
    pub fn backoff(&self, retry_count: u32, category: ErrorCategory) -> Duration {
        let base = self.base_delay(retry_count, category);
        let base_ms = base.as_millis() as u64;
        let jitter_cap = (base_ms as f64 * self.jitter_fraction) as u64;

        let jitter = if jitter_cap > 0 {
            rand::rng().random_range(0..=jitter_cap)
        } else {
            0
        };

        let max_ms = self.max_backoff.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_add(jitter).min(max_ms))
    }
}
