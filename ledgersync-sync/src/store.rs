//! Entity storage adapter.
//!
//! The sync core does not own a storage engine. It reads and writes entities
//! through [`EntityStore`]; the application plugs in its database.

use crate::error::SyncResult;
use ledgersync_model::Entity;
use ledgersync_types::EntityId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Durable entity state, keyed by id.
///
/// Implementations must keep tombstones: `put` of a deleted entity stores
/// it, it never removes the row.
pub trait EntityStore: Send + Sync {
    /// Returns the stored copy, tombstoned or not.
    fn get(&self, id: &EntityId) -> SyncResult<Option<Entity>>;

    /// Inserts or replaces an entity.
    fn put(&self, entity: &Entity) -> SyncResult<()>;

    /// Returns entities whose top-level `field` equals `value`.
    /// Tombstones are excluded unless `include_deleted` is set.
    fn query_by_index(
        &self,
        field: &str,
        value: &Value,
        include_deleted: bool,
    ) -> SyncResult<Vec<Entity>>;

    /// Returns every stored entity, including tombstones, ordered by id.
    fn list(&self) -> SyncResult<Vec<Entity>>;
}

/// In-memory [`EntityStore`] for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: RwLock<BTreeMap<EntityId, Entity>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EntityId, Entity>> {
        self.entities.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EntityId, Entity>> {
        self.entities.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl EntityStore for MemoryEntityStore {
    fn get(&self, id: &EntityId) -> SyncResult<Option<Entity>> {
        Ok(self.read().get(id).cloned())
    }

    fn put(&self, entity: &Entity) -> SyncResult<()> {
        self.write().insert(entity.id, entity.clone());
        Ok(())
    }

    fn query_by_index(
        &self,
        field: &str,
        value: &Value,
        include_deleted: bool,
    ) -> SyncResult<Vec<Entity>> {
        Ok(self
            .read()
            .values()
            .filter(|e| include_deleted || !e.is_deleted())
            .filter(|e| e.field(field) == Some(value))
            .cloned()
            .collect())
    }

    fn list(&self) -> SyncResult<Vec<Entity>> {
        Ok(self.read().values().cloned().collect())
    }
}
