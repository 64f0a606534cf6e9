//! Per-entity write serialization.
//!
//! Every read-resolve-write of an entity (local commit, inbound apply)
//! holds that entity's lock. Writes to different entities do not contend.
//! Guards must not be held across network I/O.

use ledgersync_types::EntityId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle locks are dropped once the table grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct EntityLocks {
    table: Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: EntityId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            if table.len() > PRUNE_THRESHOLD {
                table.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            table.entry(id).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
