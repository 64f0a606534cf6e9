//! Local mutations.
//!
//! A mutation is what the application asks for ("set amount to 42 on this
//! transaction"). It is validated, then applied to the current stored copy to
//! produce the next version of the entity with a bumped version vector.

use crate::entity::{Entity, FieldStamp};
use crate::error::{ModelError, ModelResult};
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of change a mutation makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Restore,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
        };
        f.write_str(s)
    }
}

/// A requested change to a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMutation {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub kind: MutationKind,
    /// Top-level fields to set. Ignored for delete and restore.
    pub fields: Map<String, Value>,
}

impl EntityMutation {
    /// Creates a new entity with a freshly generated id.
    pub fn create(entity_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            entity_id: EntityId::new(),
            entity_type: entity_type.into(),
            kind: MutationKind::Create,
            fields,
        }
    }

    /// Sets the given top-level fields on an existing entity.
    pub fn update(
        entity_id: EntityId,
        entity_type: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.into(),
            kind: MutationKind::Update,
            fields,
        }
    }

    /// Soft-deletes an entity.
    pub fn delete(entity_id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.into(),
            kind: MutationKind::Delete,
            fields: Map::new(),
        }
    }

    /// Clears the tombstone on a soft-deleted entity.
    pub fn restore(entity_id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.into(),
            kind: MutationKind::Restore,
            fields: Map::new(),
        }
    }

    /// Applies this mutation to the current stored copy (if any) and returns
    /// the next version, written by `device` at `now`.
    ///
    /// The returned entity's version vector is `current.increment(device)`;
    /// `current` itself is not modified.
    pub fn apply(
        &self,
        current: Option<&Entity>,
        device: &DeviceId,
        now: Timestamp,
    ) -> ModelResult<Entity> {
        if let Some(existing) = current {
            if existing.entity_type != self.entity_type {
                return Err(ModelError::InvalidOperation(format!(
                    "entity {} is a {}, not a {}",
                    self.entity_id, existing.entity_type, self.entity_type
                )));
            }
        }

        let now = match current {
            Some(existing) => now.after(existing.last_modified_at),
            None => now,
        };
        let stamp = FieldStamp::new(now, device.clone());

        match (self.kind, current) {
            (MutationKind::Create, None) => {
                let field_stamps: BTreeMap<String, FieldStamp> = self
                    .fields
                    .keys()
                    .map(|k| (k.clone(), stamp.clone()))
                    .collect();
                Ok(Entity {
                    id: self.entity_id,
                    entity_type: self.entity_type.clone(),
                    data: Value::Object(self.fields.clone()),
                    field_stamps,
                    version_vector: Default::default(),
                    last_modified_by: device.clone(),
                    last_modified_at: now,
                    deleted_at: None,
                }
                .bumped(device))
            }
            (MutationKind::Create, Some(_)) => Err(ModelError::AlreadyExists(self.entity_id)),
            (_, None) => Err(ModelError::NotFound(self.entity_id)),
            (MutationKind::Update, Some(existing)) => {
                if existing.is_deleted() {
                    return Err(ModelError::InvalidOperation(format!(
                        "cannot update deleted entity {}",
                        self.entity_id
                    )));
                }
                let mut next = existing.clone();
                let obj = next.data.as_object_mut().ok_or(ModelError::NotAnObject)?;
                for (key, value) in &self.fields {
                    obj.insert(key.clone(), value.clone());
                    next.field_stamps.insert(key.clone(), stamp.clone());
                }
                Ok(next.touched(device, now))
            }
            (MutationKind::Delete, Some(existing)) => {
                if existing.is_deleted() {
                    return Err(ModelError::InvalidOperation(format!(
                        "entity {} is already deleted",
                        self.entity_id
                    )));
                }
                let mut next = existing.clone();
                next.deleted_at = Some(now);
                Ok(next.touched(device, now))
            }
            (MutationKind::Restore, Some(existing)) => {
                if !existing.is_deleted() {
                    return Err(ModelError::InvalidOperation(format!(
                        "entity {} is not deleted",
                        self.entity_id
                    )));
                }
                let mut next = existing.clone();
                next.deleted_at = None;
                Ok(next.touched(device, now))
            }
        }
    }
}

impl Entity {
    fn bumped(mut self, device: &DeviceId) -> Self {
        self.version_vector = self.version_vector.increment(device);
        self
    }

    fn touched(mut self, device: &DeviceId, now: Timestamp) -> Self {
        self.last_modified_by = device.clone();
        self.last_modified_at = now;
        self.bumped(device)
    }
}
