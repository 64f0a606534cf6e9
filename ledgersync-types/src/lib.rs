//! Core type definitions for LedgerSync.
//!
//! This crate defines the primitive types every other LedgerSync crate
//! depends on:
//! - Entity identifiers (UUID v7) and device identifiers (opaque strings)
//! - Advisory wall-clock timestamps
//!
//! Ledger-specific record shapes (accounts, transactions, budgets) live in
//! the application, not here. The sync core treats them as opaque JSON.

mod ids;
mod timestamp;

pub use ids::{DeviceId, EntityId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),
}
