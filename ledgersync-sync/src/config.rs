//! Configuration for the sync engine.
//!
//! Durations are plain millisecond counts so the config can be loaded from
//! JSON without custom (de)serializers.

use crate::rate_limit::OperationClass;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum outbound entries sent per cycle.
    pub batch_size: usize,
    /// Timeout for a single send (ms).
    pub timeout_ms: u64,
    /// Interval between background cycles in [`run`](crate::SyncEngine::run) (ms).
    pub sync_interval_ms: u64,
    /// Lock the key session after this much inactivity (ms). `None` disables.
    pub idle_lock_ms: Option<u64>,
    /// Retry behaviour for failed sends.
    pub retry: RetryConfig,
    /// Per-class operation limits.
    pub rate_limits: RateLimitConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            timeout_ms: 30_000,
            sync_interval_ms: 30_000,
            idle_lock_ms: Some(15 * 60 * 1000),
            retry: RetryConfig::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the send timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets (or disables) the idle auto-lock.
    pub fn with_idle_lock(mut self, idle: Option<Duration>) -> Self {
        self.idle_lock_ms = idle.map(|d| d.as_millis() as u64);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the rate limits.
    pub fn with_rate_limits(mut self, limits: RateLimitConfig) -> Self {
        self.rate_limits = limits;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn idle_lock(&self) -> Option<Duration> {
        self.idle_lock_ms.map(Duration::from_millis)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per entry within one push before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure (ms).
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay (ms).
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after `attempt` failures (0 means no wait).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let capped_ms = base_ms.min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter && capped_ms > 0.0 {
            capped_ms + capped_ms * 0.25 * rand::thread_rng().gen_range(0.0..1.0)
        } else {
            capped_ms
        };
        Duration::from_millis(delay_ms.round() as u64)
    }
}

/// Sliding-window limits per [`OperationClass`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub key_derivation: u32,
    pub batch_encryption: u32,
    pub file_encryption: u32,
    /// Window length (ms).
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            key_derivation: 5,
            batch_encryption: 10,
            file_encryption: 20,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn with_key_derivation(mut self, limit: u32) -> Self {
        self.key_derivation = limit;
        self
    }

    pub fn with_batch_encryption(mut self, limit: u32) -> Self {
        self.batch_encryption = limit;
        self
    }

    pub fn with_file_encryption(mut self, limit: u32) -> Self {
        self.file_encryption = limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = window.as_millis() as u64;
        self
    }

    /// Maximum operations of `class` per window.
    pub fn limit_for(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::KeyDerivation => self.key_derivation,
            OperationClass::BatchEncryption => self.batch_encryption,
            OperationClass::FileEncryption => self.file_encryption,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}
