//! Payload encryption using ChaCha20-Poly1305.
//!
//! Authenticated encryption with associated data (AEAD). The tag is kept
//! detached from the ciphertext so the wire envelope can carry it as its own
//! field.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of [`seal`]: everything except the key and associated data that
/// [`open`] needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Random per-message nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// Poly1305 authentication tag over ciphertext and associated data.
    pub tag: [u8; TAG_SIZE],
}

impl SealedPayload {
    /// Returns the total encoded size.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len() + TAG_SIZE
    }

    /// Returns true if the ciphertext is empty.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// Encrypts `plaintext` and authenticates it together with `aad`.
///
/// A fresh 96-bit nonce is drawn from the OS RNG on every call.
pub fn seal(key: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<SealedPayload> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedPayload {
        nonce,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Verifies and decrypts a sealed payload.
///
/// The tag is checked before any plaintext is released. Any mismatch in key,
/// nonce, ciphertext, tag or associated data yields
/// [`CryptoError::DecryptionFailed`] and no data.
pub fn open(key: &DerivedKey, sealed: &SealedPayload, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.nonce),
            aad,
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(buffer)
}
