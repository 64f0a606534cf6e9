//! Version vectors for per-entity causality tracking.
//!
//! Every synchronizable entity carries one. A device bumps only its own
//! component when it writes; receiving replicas merge component-wise.
//! Comparing two vectors tells whether one copy supersedes the other or
//! whether they were edited concurrently and need a field-level merge.

use ledgersync_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Causality relationship between two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First vector happened before second.
    Before,
    /// First vector happened after second.
    After,
    /// Vectors are identical.
    Equal,
    /// Neither vector dominates the other.
    Concurrent,
}

impl CausalOrder {
    /// Returns the ordering seen from the other side.
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            other => other,
        }
    }
}

/// Map from device to the number of writes that device made to an entity.
///
/// A missing device is equivalent to a zero counter, so `{A:1}` and
/// `{A:1, B:0}` compare `Equal`. Entries are kept sorted so the serialized
/// form is canonical, which lets merged entities be compared byte-for-byte.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector {
    counters: BTreeMap<DeviceId, u64>,
}

impl VersionVector {
    /// Creates an empty vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vector from `(device, counter)` pairs. Zero counters are dropped.
    pub fn from_entries<I, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (D, u64)>,
        D: Into<DeviceId>,
    {
        let counters = entries
            .into_iter()
            .map(|(d, c)| (d.into(), c))
            .filter(|(_, c)| *c > 0)
            .collect();
        Self { counters }
    }

    /// Returns the counter for a device (0 if absent).
    #[must_use]
    pub fn get(&self, device: &DeviceId) -> u64 {
        self.counters.get(device).copied().unwrap_or(0)
    }

    /// Iterates non-zero components in device order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, u64)> {
        self.counters.iter().map(|(d, c)| (d, *c))
    }

    /// Number of devices with a non-zero counter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.values().filter(|c| **c > 0).count()
    }

    /// Returns true if no device has written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all counters; the number of writes this history covers.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }

    /// Returns a new vector with `device`'s counter advanced by one.
    ///
    /// `self` is left untouched so callers can keep it as history.
    #[must_use]
    pub fn increment(&self, device: &DeviceId) -> Self {
        let mut next = self.clone();
        next.bump(device);
        next
    }

    /// Advances `device`'s counter in place and returns the new value.
    pub fn bump(&mut self, device: &DeviceId) -> u64 {
        let entry = self.counters.entry(device.clone()).or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }

    /// Merges another vector into this one (component-wise maximum).
    pub fn merge(&mut self, other: &Self) {
        for (device, &count) in &other.counters {
            if count > self.get(device) {
                self.counters.insert(device.clone(), count);
            }
        }
    }

    /// Returns the component-wise maximum of `self` and `other`.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Compares this vector with another to determine causal ordering.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for device in self.counters.keys().chain(other.counters.keys()) {
            let mine = self.get(device);
            let theirs = other.get(device);
            if mine > theirs {
                self_ahead = true;
            } else if theirs > mine {
                other_ahead = true;
            }
            if self_ahead && other_ahead {
                return CausalOrder::Concurrent;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Returns true if this vector is `>=` the other for every device.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }

    /// Returns true if neither vector dominates the other.
    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Drops zero counters so equal histories serialize identically.
    fn normalized(&self) -> BTreeMap<&DeviceId, u64> {
        self.counters
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(d, c)| (d, *c))
            .collect()
    }
}

impl PartialEq for VersionVector {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for VersionVector {}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (device, count)) in self.iter().filter(|(_, c)| *c > 0).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{device}:{count}")?;
        }
        f.write_str("}")
    }
}
