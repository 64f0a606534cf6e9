//! Wire format.
//!
//! One [`WireEnvelope`] carries one sealed entity snapshot. The header
//! fields travel in the clear (the relay needs nothing else) and are bound
//! to the ciphertext as associated data, so a relay that rewrites them
//! causes [`SyncError::DecryptionFailed`] on the receiver. The version
//! vector is inside the snapshot and is authenticated with it.
//!
//! Encoded as JSON with base64 binary fields:
//!
//! ```json
//! { "schema_version": 1, "entity_id": "...", "entity_type": "transaction",
//!   "nonce": "...", "ciphertext": "...", "auth_tag": "...",
//!   "sender_device_id": "..." }
//! ```

use crate::error::{SyncError, SyncResult};
use ledgersync_crypto::{KeySession, SealedPayload, NONCE_SIZE, TAG_SIZE};
use ledgersync_model::Entity;
use ledgersync_types::{DeviceId, EntityId};
use serde::{Deserialize, Serialize};

/// Envelope schema this build reads and writes.
pub const SCHEMA_VERSION: u16 = 1;

/// Domain separator at the start of the associated data.
const AAD_CONTEXT: &[u8] = b"ledgersync/envelope";

/// A sealed entity snapshot as it travels through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub schema_version: u16,
    pub entity_id: EntityId,
    pub entity_type: String,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub auth_tag: Vec<u8>,
    pub sender_device_id: DeviceId,
}

impl WireEnvelope {
    /// Serializes to JSON bytes.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses JSON bytes, rejecting any schema version but [`SCHEMA_VERSION`].
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::Protocol(format!("malformed envelope: {e}")))?;
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(SyncError::Protocol(format!(
                "unsupported schema version {} (expected {})",
                envelope.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(envelope)
    }

    /// Associated data for this envelope's header.
    pub fn aad(&self) -> Vec<u8> {
        aad(
            self.schema_version,
            &self.entity_id,
            &self.entity_type,
            &self.sender_device_id,
        )
    }

    fn sealed(&self) -> SyncResult<SealedPayload> {
        let nonce: [u8; NONCE_SIZE] = self
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| SyncError::Protocol(format!("nonce must be {NONCE_SIZE} bytes")))?;
        let tag: [u8; TAG_SIZE] = self
            .auth_tag
            .as_slice()
            .try_into()
            .map_err(|_| SyncError::Protocol(format!("auth tag must be {TAG_SIZE} bytes")))?;
        Ok(SealedPayload {
            nonce,
            ciphertext: self.ciphertext.clone(),
            tag,
        })
    }
}

/// Builds the associated data binding an envelope header.
///
/// Variable-length fields are length-prefixed so no two headers share an
/// encoding.
pub fn aad(
    schema_version: u16,
    entity_id: &EntityId,
    entity_type: &str,
    sender: &DeviceId,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(AAD_CONTEXT.len() + 2 + 16 + 8 + entity_type.len() + 64);
    out.extend_from_slice(AAD_CONTEXT);
    out.extend_from_slice(&schema_version.to_be_bytes());
    out.extend_from_slice(entity_id.as_uuid().as_bytes());
    for field in [entity_type.as_bytes(), sender.as_str().as_bytes()] {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Encrypts an entity snapshot for the relay.
pub fn seal_entity(
    session: &KeySession,
    entity: &Entity,
    sender: &DeviceId,
) -> SyncResult<WireEnvelope> {
    let plaintext = serde_json::to_vec(entity)?;
    let header_aad = aad(SCHEMA_VERSION, &entity.id, &entity.entity_type, sender);
    let sealed = session.seal(&plaintext, &header_aad)?;

    Ok(WireEnvelope {
        schema_version: SCHEMA_VERSION,
        entity_id: entity.id,
        entity_type: entity.entity_type.clone(),
        nonce: sealed.nonce.to_vec(),
        ciphertext: sealed.ciphertext,
        auth_tag: sealed.tag.to_vec(),
        sender_device_id: sender.clone(),
    })
}

/// Verifies and decrypts an envelope back into the entity snapshot.
///
/// Fails with [`SyncError::DecryptionFailed`] on any authentication failure
/// and when the snapshot inside does not describe the entity named in the
/// header.
pub fn open_entity(session: &KeySession, envelope: &WireEnvelope) -> SyncResult<Entity> {
    let sealed = envelope.sealed()?;
    let plaintext = session.open(&sealed, &envelope.aad())?;
    let entity: Entity = serde_json::from_slice(&plaintext)
        .map_err(|e| SyncError::Protocol(format!("undecodable snapshot: {e}")))?;

    if entity.id != envelope.entity_id || entity.entity_type != envelope.entity_type {
        return Err(SyncError::DecryptionFailed);
    }
    Ok(entity)
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
