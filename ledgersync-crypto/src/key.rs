//! Key derivation and management.
//!
//! Uses Argon2id for deriving the sync key from the user's secret. The cost
//! parameters are pinned per [`KdfVersion`]: changing them means adding a new
//! version, so a replica that meets an unknown version fails loudly instead
//! of deriving a different key.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Creates a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(array))
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for key derivation.
///
/// Generated once per ledger and shared by all of the user's devices through
/// the [`KdfHeader`]; it is not secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Generates a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// Versioned key-derivation parameter sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum KdfVersion {
    /// Argon2id, 19 MiB, 2 passes, 1 lane (OWASP 2023 baseline).
    V1,
}

impl KdfVersion {
    /// The version new ledgers are created with.
    pub const CURRENT: Self = Self::V1;

    /// Numeric tag stored in the header.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::V1 => 1,
        }
    }

    /// The fixed parameters for this version.
    pub fn params(self) -> KdfParams {
        match self {
            Self::V1 => KdfParams {
                memory_cost: 19 * 1024,
                time_cost: 2,
                parallelism: 1,
            },
        }
    }
}

impl TryFrom<u16> for KdfVersion {
    type Error = CryptoError;

    fn try_from(v: u16) -> CryptoResult<Self> {
        match v {
            1 => Ok(Self::V1),
            other => Err(CryptoError::UnsupportedKdfVersion(other)),
        }
    }
}

impl From<KdfVersion> for u16 {
    fn from(v: KdfVersion) -> Self {
        v.as_u16()
    }
}

/// Key derivation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfVersion::CURRENT.params()
    }
}

/// Everything besides the secret needed to re-derive the sync key.
///
/// Travels alongside the ledger (it is not confidential). Deserializing a
/// header with an unknown version fails, which is how a parameter change
/// is detected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfHeader {
    pub version: KdfVersion,
    pub salt: Salt,
}

impl KdfHeader {
    /// Creates a header for a new ledger with the current version and a
    /// fresh salt.
    pub fn generate() -> Self {
        Self {
            version: KdfVersion::CURRENT,
            salt: Salt::random(),
        }
    }

    /// Returns true if the header predates the current parameter set.
    pub fn needs_migration(&self) -> bool {
        self.version != KdfVersion::CURRENT
    }

    /// Derives the key this header describes.
    pub fn derive(&self, secret: &str) -> CryptoResult<DerivedKey> {
        derive_key(secret, &self.salt, &self.version.params())
    }
}

/// Derives an encryption key from a secret using Argon2id.
///
/// # Arguments
/// * `secret` - The user's passphrase
/// * `salt` - The ledger salt
/// * `params` - Key derivation parameters
///
/// # Returns
/// A derived key suitable for use with ChaCha20-Poly1305.
pub fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    let derived = argon2
        .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()));
    if let Err(e) = derived {
        key_bytes.zeroize();
        return Err(e);
    }

    let key = DerivedKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Generates a random key. Used by tests and for ledgers provisioned
/// without a passphrase.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let key = DerivedKey::from_bytes(bytes);
    bytes.zeroize();
    key
}
