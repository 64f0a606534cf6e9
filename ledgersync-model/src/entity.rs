use ledgersync_crdt::VersionVector;
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Who wrote a field last, and when.
///
/// Ordered by `(at, by)`. Used as the per-field register stamp when two
/// concurrent versions of an entity are merged.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FieldStamp {
    pub at: Timestamp,
    pub by: DeviceId,
}

impl FieldStamp {
    pub fn new(at: Timestamp, by: DeviceId) -> Self {
        Self { at, by }
    }
}

/// A synchronizable ledger record.
///
/// `data` holds the domain fields as a JSON object; the sync core never
/// interprets them beyond top-level keys. `field_stamps` records the last
/// writer of each top-level key so concurrent edits merge field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub field_stamps: BTreeMap<String, FieldStamp>,
    pub version_vector: VersionVector,
    pub last_modified_by: DeviceId,
    pub last_modified_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Entity {
    /// Returns true if this entity is a soft-delete tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Stamp identifying the most recent writer of the whole entity.
    pub fn stamp(&self) -> FieldStamp {
        FieldStamp::new(self.last_modified_at, self.last_modified_by.clone())
    }

    /// Stamp for a single top-level field. Unstamped fields sort lowest.
    pub fn field_stamp(&self, field: &str) -> FieldStamp {
        self.field_stamps.get(field).cloned().unwrap_or_default()
    }

    /// Returns a top-level field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.as_object().and_then(|o| o.get(name))
    }

    /// Extract a string value from `data` using a JSON pointer (e.g., "/payee").
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.data.pointer(pointer).and_then(|v| v.as_str())
    }

    /// Extract a numeric value from `data` using a JSON pointer.
    pub fn get_number(&self, pointer: &str) -> Option<f64> {
        self.data.pointer(pointer).and_then(|v| v.as_f64())
    }

    /// Canonical serialized form. Map keys are sorted, so two equal entities
    /// always produce the same bytes.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Total order used when nothing causal distinguishes two versions:
    /// entity stamp first, then the canonical JSON of the fields.
    pub(crate) fn rank_cmp(&self, other: &Self) -> Ordering {
        self.stamp()
            .cmp(&other.stamp())
            .then_with(|| self.data.to_string().cmp(&other.data.to_string()))
            .then_with(|| self.entity_type.cmp(&other.entity_type))
    }
}
