//! Causal-history primitives for LedgerSync.
//!
//! - [`VersionVector`]: per-entity causal history across devices
//! - [`CausalOrder`]: the four-way result of comparing two vectors
//!
//! `merge` on vectors satisfies:
//! - **Commutative**: merge(a, b) == merge(b, a)
//! - **Associative**: merge(merge(a, b), c) == merge(a, merge(b, c))
//! - **Idempotent**: merge(a, a) == a
//!
//! Replicas therefore converge no matter how often or in which order
//! updates are delivered.

mod version_vector;

pub use version_vector::{CausalOrder, VersionVector};
