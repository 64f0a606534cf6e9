//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Tag mismatch: wrong key, or ciphertext/nonce/associated data altered.
    /// Carries no detail on purpose; nothing from the payload is trusted.
    #[error("decryption failed")]
    DecryptionFailed,

    /// No key is loaded (session locked or never unlocked).
    #[error("key session is locked")]
    Locked,

    /// The KDF header names a parameter set this build does not know.
    #[error("unsupported key derivation version: {0}")]
    UnsupportedKdfVersion(u16),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
