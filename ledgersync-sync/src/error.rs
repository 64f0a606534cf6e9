//! Error types for the sync layer.

use crate::rate_limit::OperationClass;
use ledgersync_crypto::CryptoError;
use ledgersync_model::ModelError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An inbound envelope failed authentication, or its decrypted snapshot
    /// does not match the envelope header.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Too many operations of this class in the current window.
    #[error("rate limited ({class}), retry after {retry_after:?}")]
    RateLimited {
        class: OperationClass,
        retry_after: Duration,
    },

    /// Send failed or timed out.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An outbound entry kept failing.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The mutation was rejected before it reached the queue.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// No sync key is loaded.
    #[error("key session is locked")]
    Locked,

    /// The engine was asked to stop.
    #[error("cancelled")]
    Cancelled,

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other crypto failure (key derivation, unsupported KDF version).
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; the same operation may succeed later.
    RetryLater,
    /// Retrying the same input will fail the same way.
    Permanent,
    /// The user has to change something first (input, passphrase).
    FixInput,
}

impl SyncError {
    /// Classifies the error for retry handling.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::RateLimited { .. }
            | Self::TransportFailure(_)
            | Self::RetriesExhausted { .. }
            | Self::Cancelled
            | Self::Storage(_) => Disposition::RetryLater,
            Self::ConstraintViolation(_) | Self::Locked => Disposition::FixInput,
            Self::DecryptionFailed
            | Self::Protocol(_)
            | Self::Serialization(_)
            | Self::Crypto(_) => Disposition::Permanent,
        }
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DecryptionFailed => "couldn't sync that change",
            Self::RateLimited { .. } => "too many attempts, try again shortly",
            Self::TransportFailure(_) | Self::RetriesExhausted { .. } => {
                "offline, changes will sync later"
            }
            Self::ConstraintViolation(_) => "that change isn't valid",
            Self::Locked => "unlock to sync",
            Self::Cancelled => "sync stopped",
            Self::Protocol(_) | Self::Serialization(_) => "couldn't read a sync message",
            Self::Storage(_) => "couldn't save sync state",
            Self::Crypto(_) => "couldn't unlock sync",
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed => Self::DecryptionFailed,
            CryptoError::Locked => Self::Locked,
            other => Self::Crypto(other),
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(e: ModelError) -> Self {
        Self::ConstraintViolation(e.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
