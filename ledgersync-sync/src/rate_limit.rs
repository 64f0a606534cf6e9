//! Sliding-window rate limiting for expensive crypto operations.
//!
//! Each [`OperationClass`] keeps the instants of its recent operations. A
//! check prunes entries older than the window, then either records the new
//! operation or reports how long until the oldest one expires. Checks never
//! block; the caller decides whether to wait.

use crate::config::RateLimitConfig;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Operations that are rate limited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    KeyDerivation,
    BatchEncryption,
    FileEncryption,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KeyDerivation => "key_derivation",
            Self::BatchEncryption => "batch_encryption",
            Self::FileEncryption => "file_encryption",
        };
        f.write_str(s)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<OperationClass, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records one operation of `class`, or fails with
    /// [`SyncError::RateLimited`] if the window is full.
    pub fn check(&self, class: OperationClass) -> SyncResult<()> {
        let now = Instant::now();
        let window = self.config.window();
        let limit = self.config.limit_for(class) as usize;

        let mut windows = self.lock();
        let hits = windows.entry(class).or_default();
        prune_expired(hits, now, window);

        if hits.len() >= limit {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            debug!("{} rate limited, retry after {:?}", class, retry_after);
            return Err(SyncError::RateLimited { class, retry_after });
        }

        hits.push_back(now);
        Ok(())
    }

    /// Operations of `class` still allowed in the current window.
    pub fn remaining(&self, class: OperationClass) -> u32 {
        let now = Instant::now();
        let mut windows = self.lock();
        let hits = windows.entry(class).or_default();
        prune_expired(hits, now, self.config.window());
        self.config
            .limit_for(class)
            .saturating_sub(hits.len() as u32)
    }

    /// Drops expired entries for every class.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.config.window();
        let mut windows = self.lock();
        for hits in windows.values_mut() {
            prune_expired(hits, now, window);
        }
        windows.retain(|_, hits| !hits.is_empty());
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationClass, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn prune_expired(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
