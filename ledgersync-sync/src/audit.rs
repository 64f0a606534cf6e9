//! Append-only audit trail of every accepted change.
//!
//! Each row stores the full resulting snapshot, so the trail doubles as a
//! recovery log: [`AuditLog::replay`] feeds the snapshots back through the
//! resolver in `seq` order and rebuilds the same store state the device had
//! live. Rows are never updated or deleted.

use crate::db::SyncDb;
use crate::error::{SyncError, SyncResult};
use crate::store::EntityStore;
use ledgersync_crdt::VersionVector;
use ledgersync_model::{resolve, Entity, MutationKind};
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// What a logged change did to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Create,
    Update,
    Delete,
    Restore,
    /// Result of merging two concurrent versions.
    Merge,
}

impl AuditKind {
    /// Describes a whole-snapshot replacement of `previous` by `next`.
    pub fn infer(previous: Option<&Entity>, next: &Entity) -> Self {
        match previous {
            None => Self::Create,
            Some(prev) => match (prev.is_deleted(), next.is_deleted()) {
                (false, true) => Self::Delete,
                (true, false) => Self::Restore,
                _ => Self::Update,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Merge => "merge",
        }
    }
}

impl From<MutationKind> for AuditKind {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Create => Self::Create,
            MutationKind::Update => Self::Update,
            MutationKind::Delete => Self::Delete,
            MutationKind::Restore => Self::Restore,
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "restore" => Ok(Self::Restore),
            "merge" => Ok(Self::Merge),
            other => Err(SyncError::Storage(format!("unknown audit kind {other:?}"))),
        }
    }
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOrigin {
    Local,
    Remote,
}

impl AuditOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for AuditOrigin {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(SyncError::Storage(format!("unknown audit origin {other:?}"))),
        }
    }
}

/// One accepted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub entity_id: EntityId,
    pub kind: AuditKind,
    /// Version vector of the resulting entity.
    pub version_vector: VersionVector,
    /// Device that performed the change (the local device for merges).
    pub actor: DeviceId,
    pub origin: AuditOrigin,
    /// The entity as stored after the change.
    pub entity: Entity,
    pub recorded_at: Timestamp,
}

#[derive(Clone)]
pub struct AuditLog {
    db: SyncDb,
}

const SELECT_COLUMNS: &str = "SELECT seq, entity_id, kind, version_vector, actor, origin, \
                              snapshot, recorded_at FROM audit_log";

impl AuditLog {
    pub fn new(db: SyncDb) -> Self {
        Self { db }
    }

    /// Appends a row for a change.
    pub fn append(
        &self,
        kind: AuditKind,
        origin: AuditOrigin,
        actor: &DeviceId,
        entity: &Entity,
    ) -> SyncResult<AuditEntry> {
        append_in(&self.db.conn(), kind, origin, actor, entity)
    }

    /// All entries in `seq` order.
    pub fn entries(&self) -> SyncResult<Vec<AuditEntry>> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"), None)
    }

    /// Entries for one entity in `seq` order.
    pub fn entries_for(&self, id: &EntityId) -> SyncResult<Vec<AuditEntry>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE entity_id = ?1 ORDER BY seq ASC"),
            Some(id),
        )
    }

    pub fn len(&self) -> SyncResult<usize> {
        let count: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(|e| SyncError::Storage(format!("failed to count audit log: {e}")))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Re-applies every logged snapshot to `store` through the resolver.
    ///
    /// Against an empty store this reproduces the live state. Against a
    /// partially populated one it is still safe: stale snapshots resolve to
    /// `Discard` or `Unchanged`. Returns the number of writes made.
    pub fn replay(&self, store: &dyn EntityStore) -> SyncResult<usize> {
        let entries = self.entries()?;
        let mut written = 0;
        for entry in &entries {
            let local = store.get(&entry.entity_id)?;
            if let Some(next) = resolve(local.as_ref(), &entry.entity).into_entity() {
                store.put(&next)?;
                written += 1;
            }
        }
        info!("replayed {} audit entries ({} writes)", entries.len(), written);
        Ok(written)
    }

    fn query(&self, sql: &str, id: Option<&EntityId>) -> SyncResult<Vec<AuditEntry>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SyncError::Storage(format!("failed to prepare audit query: {e}")))?;
        let rows = match id {
            Some(id) => stmt.query_map(params![id.to_string()], read_row),
            None => stmt.query_map([], read_row),
        }
        .map_err(|e| SyncError::Storage(format!("failed to query audit log: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| SyncError::Storage(format!("failed to read audit row: {e}")))?;
            entries.push(raw.into_entry()?);
        }
        Ok(entries)
    }
}

pub(crate) fn append_in(
    conn: &Connection,
    kind: AuditKind,
    origin: AuditOrigin,
    actor: &DeviceId,
    entity: &Entity,
) -> SyncResult<AuditEntry> {
    let snapshot = serde_json::to_string(entity)?;
    let vector = serde_json::to_string(&entity.version_vector)?;
    let recorded_at = Timestamp::now();

    conn.execute(
        "INSERT INTO audit_log
            (entity_id, kind, version_vector, actor, origin, snapshot, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entity.id.to_string(),
            kind.as_str(),
            vector,
            actor.as_str(),
            origin.as_str(),
            snapshot,
            recorded_at.as_millis(),
        ],
    )
    .map_err(|e| SyncError::Storage(format!("failed to append audit entry: {e}")))?;
    let seq = conn.last_insert_rowid();
    debug!("audit #{} {} {} by {}", seq, kind, entity.id, actor);

    Ok(AuditEntry {
        seq,
        entity_id: entity.id,
        kind,
        version_vector: entity.version_vector.clone(),
        actor: actor.clone(),
        origin,
        entity: entity.clone(),
        recorded_at,
    })
}

/// Like [`append_in`], but a version of an entity is only ever logged once.
/// Returns `None` if a row for this exact version vector already exists.
pub(crate) fn record_in(
    conn: &Connection,
    kind: AuditKind,
    origin: AuditOrigin,
    actor: &DeviceId,
    entity: &Entity,
) -> SyncResult<Option<AuditEntry>> {
    let vector = serde_json::to_string(&entity.version_vector)?;
    let existing: Option<i64> = conn
        .query_row(
            "SELECT seq FROM audit_log WHERE entity_id = ?1 AND version_vector = ?2",
            params![entity.id.to_string(), vector],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| SyncError::Storage(format!("failed to query audit log: {e}")))?;
    if let Some(seq) = existing {
        debug!("{} at {} already logged as #{}", entity.id, entity.version_vector, seq);
        return Ok(None);
    }
    append_in(conn, kind, origin, actor, entity).map(Some)
}

struct RawEntry {
    seq: i64,
    entity_id: String,
    kind: String,
    version_vector: String,
    actor: String,
    origin: String,
    snapshot: String,
    recorded_at: i64,
}

impl RawEntry {
    fn into_entry(self) -> SyncResult<AuditEntry> {
        let corrupt = |what: &str, e: &dyn fmt::Display| {
            SyncError::Storage(format!("corrupt audit row {} ({what}): {e}", self.seq))
        };
        let entity_id =
            EntityId::parse(&self.entity_id).map_err(|e| corrupt("entity_id", &e))?;
        let version_vector: VersionVector =
            serde_json::from_str(&self.version_vector).map_err(|e| corrupt("version_vector", &e))?;
        let entity: Entity =
            serde_json::from_str(&self.snapshot).map_err(|e| corrupt("snapshot", &e))?;

        Ok(AuditEntry {
            seq: self.seq,
            entity_id,
            kind: self.kind.parse()?,
            version_vector,
            actor: DeviceId::from(self.actor.as_str()),
            origin: self.origin.parse()?,
            entity,
            recorded_at: Timestamp::from_millis(self.recorded_at),
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        seq: row.get(0)?,
        entity_id: row.get(1)?,
        kind: row.get(2)?,
        version_vector: row.get(3)?,
        actor: row.get(4)?,
        origin: row.get(5)?,
        snapshot: row.get(6)?,
        recorded_at: row.get(7)?,
    })
}
