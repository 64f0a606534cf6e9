//! Advisory wall-clock timestamps.
//!
//! These are never used to decide causal order. The sync core uses them for
//! display and as the first key of the deterministic tie-break when two
//! concurrent edits touch the same field.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Returns the current wall-clock time.
    ///
    /// A clock set before 1970 yields the epoch rather than failing.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns `self`, or one millisecond past `prev` if the wall clock has
    /// not moved beyond it.
    ///
    /// Successive writes to the same entity then carry strictly increasing
    /// stamps even when the system clock steps backwards.
    #[must_use]
    pub fn after(self, prev: Self) -> Self {
        if self > prev {
            self
        } else {
            Self(prev.0.saturating_add(1))
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
