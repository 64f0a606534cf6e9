//! Local sync state on disk.
//!
//! The outbox and the audit log share one SQLite file so a restart picks up
//! exactly where the device left off.

use crate::error::{SyncError, SyncResult};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Handle to the sync database. Cheap to clone.
#[derive(Clone)]
pub struct SyncDb {
    conn: Arc<Mutex<Connection>>,
}

impl SyncDb {
    /// Opens (or creates) the sync database at `path`.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| SyncError::Storage(format!("failed to open sync db: {e}")))?;
        debug!("opened sync db at {}", path.display());
        Self::init(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Storage(format!("failed to open in-memory sync db: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> SyncResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL UNIQUE,
                entity_type TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                enqueued_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                version_vector TEXT NOT NULL,
                actor TEXT NOT NULL,
                origin TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS audit_log_entity ON audit_log (entity_id, seq);
            ",
        )
        .map_err(|e| SyncError::Storage(format!("failed to init sync schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` inside one SQLite transaction. Nothing `f` wrote is kept
    /// unless it returns `Ok` and the commit succeeds.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> SyncResult<T>,
    ) -> SyncResult<T> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}
