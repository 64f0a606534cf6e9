//! End-to-end encryption for LedgerSync payloads.
//!
//! - [`derive_key`] turns the user's secret into a 256-bit key with Argon2id,
//!   under parameters pinned by a [`KdfVersion`]
//! - [`seal`] / [`open`] provide ChaCha20-Poly1305 AEAD with a detached tag
//!   and caller-supplied associated data
//! - [`KeySession`] holds the key for the lifetime of an unlocked session and
//!   zeroizes it on lock
//!
//! The relay only ever sees [`SealedPayload`]s. Nonces are generated inside
//! [`seal`]; there is no API that accepts one for encryption.

mod cipher;
mod error;
mod key;
mod session;

pub use cipher::{open, seal, SealedPayload, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_key, DerivedKey, KdfHeader, KdfParams, KdfVersion, Salt,
    KEY_SIZE, SALT_SIZE,
};
pub use session::KeySession;
