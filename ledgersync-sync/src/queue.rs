//! Durable outbound backlog.
//!
//! One row per entity with unsent changes, ordered by the sequence number it
//! was first enqueued with. Enqueuing an entity that already has a pending
//! row replaces the snapshot in place: the row keeps its position and its
//! `revision` goes up. An ack only removes the row if the revision it was
//! sent with is still current, so a change coalesced in while a send was in
//! flight is never dropped.

use crate::db::SyncDb;
use crate::error::{SyncError, SyncResult};
use ledgersync_model::Entity;
use ledgersync_types::{EntityId, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

/// A pending outbound change.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEntry {
    pub seq: i64,
    pub entity: Entity,
    pub revision: i64,
    /// Failed sends so far, across restarts.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: Timestamp,
}

impl OutboundEntry {
    pub fn entity_id(&self) -> EntityId {
        self.entity.id
    }
}

#[derive(Clone)]
pub struct OutboundQueue {
    db: SyncDb,
}

const SELECT_COLUMNS: &str =
    "SELECT seq, snapshot, revision, attempts, last_error, enqueued_at FROM outbox";

impl OutboundQueue {
    pub fn new(db: SyncDb) -> Self {
        Self { db }
    }

    /// Queues `entity` for sending, coalescing with any pending row for the
    /// same id. Returns the row's sequence number.
    pub fn enqueue(&self, entity: &Entity) -> SyncResult<i64> {
        enqueue_in(&self.db.conn(), entity)
    }

    /// Up to `limit` pending entries in sequence order.
    pub fn pending(&self, limit: usize) -> SyncResult<Vec<OutboundEntry>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY seq ASC LIMIT ?1"))
            .map_err(|e| SyncError::Storage(format!("failed to prepare outbox query: {e}")))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], read_row)
            .map_err(|e| SyncError::Storage(format!("failed to query outbox: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| SyncError::Storage(format!("failed to read outbox row: {e}")))?;
            entries.push(row.into_entry()?);
        }
        Ok(entries)
    }

    /// The pending entry for `id`, if any.
    pub fn get(&self, id: &EntityId) -> SyncResult<Option<OutboundEntry>> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE entity_id = ?1"),
                params![id.to_string()],
                read_row,
            )
            .optional()
            .map_err(|e| SyncError::Storage(format!("failed to read outbox row: {e}")))?;
        row.map(RawEntry::into_entry).transpose()
    }

    /// Removes `entry` after the relay acknowledged it. Returns false if the
    /// row was coalesced or replaced since it was read; it then stays queued.
    pub fn ack(&self, entry: &OutboundEntry) -> SyncResult<bool> {
        let removed = self
            .db
            .conn()
            .execute(
                "DELETE FROM outbox WHERE seq = ?1 AND revision = ?2",
                params![entry.seq, entry.revision],
            )
            .map_err(|e| SyncError::Storage(format!("failed to ack seq {}: {e}", entry.seq)))?;
        Ok(removed > 0)
    }

    /// Records a failed send and returns the new attempt count.
    pub fn record_attempt(&self, entry: &OutboundEntry, error: &str) -> SyncResult<u32> {
        let attempts: Option<u32> = self
            .db
            .conn()
            .query_row(
                "UPDATE outbox SET attempts = attempts + 1, last_error = ?2
                 WHERE seq = ?1 RETURNING attempts",
                params![entry.seq, error],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Storage(format!("failed to record attempt: {e}")))?;
        Ok(attempts.unwrap_or(entry.attempts + 1))
    }

    /// Rebuilds a pending row from a newer snapshot, keeping its position.
    pub fn replace(&self, entry: &OutboundEntry, entity: &Entity) -> SyncResult<bool> {
        replace_in(&self.db.conn(), entry, entity)
    }

    pub fn len(&self) -> SyncResult<usize> {
        let count: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
            .map_err(|e| SyncError::Storage(format!("failed to count outbox: {e}")))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }
}

pub(crate) fn enqueue_in(conn: &Connection, entity: &Entity) -> SyncResult<i64> {
    let snapshot = serde_json::to_string(entity)?;
    let seq: i64 = conn
        .query_row(
            "INSERT INTO outbox (entity_id, entity_type, snapshot, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_id) DO UPDATE SET
                entity_type = excluded.entity_type,
                snapshot = excluded.snapshot,
                revision = outbox.revision + 1
             RETURNING seq",
            params![
                entity.id.to_string(),
                entity.entity_type,
                snapshot,
                Timestamp::now().as_millis(),
            ],
            |row| row.get(0),
        )
        .map_err(|e| SyncError::Storage(format!("failed to enqueue {}: {e}", entity.id)))?;
    debug!("queued {} at seq {}", entity.id, seq);
    Ok(seq)
}

pub(crate) fn replace_in(
    conn: &Connection,
    entry: &OutboundEntry,
    entity: &Entity,
) -> SyncResult<bool> {
    let snapshot = serde_json::to_string(entity)?;
    let updated = conn
        .execute(
            "UPDATE outbox SET snapshot = ?2, entity_type = ?3, revision = revision + 1
             WHERE seq = ?1",
            params![entry.seq, snapshot, entity.entity_type],
        )
        .map_err(|e| SyncError::Storage(format!("failed to replace seq {}: {e}", entry.seq)))?;
    Ok(updated > 0)
}

struct RawEntry {
    seq: i64,
    snapshot: String,
    revision: i64,
    attempts: u32,
    last_error: Option<String>,
    enqueued_at: i64,
}

impl RawEntry {
    fn into_entry(self) -> SyncResult<OutboundEntry> {
        let entity: Entity = serde_json::from_str(&self.snapshot).map_err(|e| {
            SyncError::Storage(format!("corrupt outbox snapshot at seq {}: {e}", self.seq))
        })?;
        Ok(OutboundEntry {
            seq: self.seq,
            entity,
            revision: self.revision,
            attempts: self.attempts,
            last_error: self.last_error,
            enqueued_at: Timestamp::from_millis(self.enqueued_at),
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        seq: row.get(0)?,
        snapshot: row.get(1)?,
        revision: row.get(2)?,
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        enqueued_at: row.get(5)?,
    })
}
