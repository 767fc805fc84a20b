//! Configuration for the sync engine.

use bizsync_core::DEFAULT_REPAIR_CEILING;
use rand::Rng;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Configuration for the sync engine.
///
/// Durations deserialize from integer milliseconds:
///
/// ```
/// use bizsync_engine::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::from_json(r#"{ "sync_interval": 1000 }"#).unwrap();
/// assert_eq!(config.sync_interval, Duration::from_secs(1));
/// assert_eq!(config.retry.max_retries, 3);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry configuration.
    pub retry: RetryPolicy,
    /// Period of the background drain timer.
    #[serde(deserialize_with = "duration_ms")]
    pub sync_interval: Duration,
    /// Upper bound on a single dispatch attempt.
    #[serde(deserialize_with = "duration_ms")]
    pub dispatch_timeout: Duration,
    /// Maximum number of entries kept in `SyncStatus::errors`.
    pub max_errors: usize,
    /// Repairs allowed per entity before payloads are rejected.
    pub repair_ceiling: u32,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sync_interval: Duration::from_secs(5),
            dispatch_timeout: Duration::from_secs(30),
            max_errors: 50,
            repair_ceiling: DEFAULT_REPAIR_CEILING,
        }
    }

    /// Parses a JSON configuration; missing fields take default values.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the background drain period.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the per-dispatch timeout.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Sets the size of the error list.
    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }

    /// Sets the per-entity repair ceiling.
    pub fn with_repair_ceiling(mut self, ceiling: u32) -> Self {
        self.repair_ceiling = ceiling;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry and backoff behavior for failed operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after which an operation is marked failed.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(deserialize_with = "duration_ms")]
    pub base_delay: Duration,
    /// Cap on any single delay.
    #[serde(deserialize_with = "duration_ms")]
    pub max_delay: Duration,
    /// Whether to add up to 25% random jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with the given ceiling and a one second base delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }

    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// `base_delay * 2^(retry - 1)`, capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(retry - 1);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter {
            let jitter = rand::thread_rng().gen_range(0.0..=0.25);
            delay + delay.mul_f64(jitter)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

fn duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
