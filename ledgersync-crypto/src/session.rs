//! Process-scoped key holder.
//!
//! The sync key exists only between [`KeySession::unlock_with`] (or
//! [`KeySession::install`]) and [`KeySession::lock`]. It is never written to
//! disk; locking drops it, and [`DerivedKey`] zeroizes on drop. Callers pass
//! a `&KeySession` into crypto operations instead of reading a global.

use crate::cipher::{self, SealedPayload};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfHeader, KdfParams, Salt};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct Unlocked {
    key: DerivedKey,
    last_used: Instant,
}

/// Holds the sync key for an unlocked session.
#[derive(Default)]
pub struct KeySession {
    inner: RwLock<Option<Unlocked>>,
}

impl KeySession {
    /// Creates a locked session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the key described by `header` and unlocks the session.
    ///
    /// This runs Argon2 on the calling thread; async callers should go
    /// through `spawn_blocking` and [`install`](Self::install).
    ///
    /// No attempt limit is applied here. Callers exposed to user input must
    /// count each call against their own key-derivation limit (the sync
    /// engine's `unlock` does).
    pub fn unlock(&self, secret: &str, header: &KdfHeader) -> CryptoResult<()> {
        let key = header.derive(secret)?;
        self.install(key);
        Ok(())
    }

    /// Derives a key with explicit parameters and unlocks the session.
    ///
    /// Not rate limited; see [`unlock`](Self::unlock).
    pub fn unlock_with(&self, secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<()> {
        let key = derive_key(secret, salt, params)?;
        self.install(key);
        Ok(())
    }

    /// Unlocks the session with an already derived key, replacing any
    /// previous one.
    pub fn install(&self, key: DerivedKey) {
        *self.write() = Some(Unlocked {
            key,
            last_used: Instant::now(),
        });
        info!("key session unlocked");
    }

    /// Drops the key. Safe to call when already locked.
    pub fn lock(&self) {
        if self.write().take().is_some() {
            info!("key session locked");
        }
    }

    /// Returns true while a key is loaded.
    pub fn is_unlocked(&self) -> bool {
        self.read().is_some()
    }

    /// Marks the session as in use without performing a crypto operation.
    pub fn touch(&self) {
        if let Some(unlocked) = self.write().as_mut() {
            unlocked.last_used = Instant::now();
        }
    }

    /// Locks the session if it has not been used for `max_idle`.
    /// Returns true if this call locked it.
    pub fn lock_if_idle(&self, max_idle: Duration) -> bool {
        let mut guard = self.write();
        let idle = guard
            .as_ref()
            .is_some_and(|u| u.last_used.elapsed() >= max_idle);
        if idle {
            guard.take();
            debug!("key session locked after {:?} idle", max_idle);
        }
        idle
    }

    /// Encrypts with the session key.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<SealedPayload> {
        let mut guard = self.write();
        let unlocked = guard.as_mut().ok_or(CryptoError::Locked)?;
        unlocked.last_used = Instant::now();
        cipher::seal(&unlocked.key, plaintext, aad)
    }

    /// Decrypts with the session key.
    pub fn open(&self, sealed: &SealedPayload, aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut guard = self.write();
        let unlocked = guard.as_mut().ok_or(CryptoError::Locked)?;
        unlocked.last_used = Instant::now();
        cipher::open(&unlocked.key, sealed, aad)
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Unlocked>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Unlocked>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for KeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySession")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
