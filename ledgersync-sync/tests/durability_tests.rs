mod common;

use common::{create, device, device_with, fields, get, init_tracing, test_config};
use ledgersync_crypto::{generate_random_key, DerivedKey, KeySession};
use ledgersync_model::{Entity, EntityMutation};
use ledgersync_sync::transport::memory::MemoryRelay;
use ledgersync_sync::{
    AuditOrigin, EntityStore, MemoryEntityStore, SyncDb, SyncEngine, SyncError, SyncResult,
};
use ledgersync_types::{DeviceId, EntityId};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryEntityStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn fail_writes(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

impl EntityStore for FlakyStore {
    fn get(&self, id: &EntityId) -> SyncResult<Option<Entity>> {
        self.inner.get(id)
    }

    fn put(&self, entity: &Entity) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".into()));
        }
        self.inner.put(entity)
    }

    fn query_by_index(
        &self,
        field: &str,
        value: &Value,
        include_deleted: bool,
    ) -> SyncResult<Vec<Entity>> {
        self.inner.query_by_index(field, value, include_deleted)
    }

    fn list(&self) -> SyncResult<Vec<Entity>> {
        self.inner.list()
    }
}

fn flaky_engine(
    relay: &MemoryRelay,
    name: &str,
    key: &DerivedKey,
    store: Arc<FlakyStore>,
) -> SyncEngine {
    init_tracing();
    let id = DeviceId::from(name);
    let session = Arc::new(KeySession::new());
    session.install(key.clone());
    SyncEngine::new(
        id.clone(),
        test_config(),
        SyncDb::open_in_memory().unwrap(),
        store,
        session,
        relay.connect(id),
    )
}

/// Makes every insert into `table` fail until the trigger is dropped.
fn block_inserts(path: &Path, table: &str) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TRIGGER block_{table} BEFORE INSERT ON {table}
         BEGIN SELECT RAISE(ABORT, 'no space left'); END;"
    ))
    .unwrap();
    conn
}

fn unblock_inserts(conn: &rusqlite::Connection, table: &str) {
    conn.execute_batch(&format!("DROP TRIGGER block_{table};")).unwrap();
}

// ── Local commits ────────────────────────────────────────────────

#[tokio::test]
async fn failed_outbox_write_rolls_back_the_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let relay = MemoryRelay::new();
    let a = device_with(
        &relay,
        "alpha",
        &generate_random_key(),
        test_config(),
        SyncDb::open(&path).unwrap(),
    );
    let outside = block_inserts(&path, "outbox");

    let mutation = create("account", json!({"name": "Savings"}));
    let err = a.engine.commit_local(mutation.clone()).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)), "got {err:?}");
    assert_eq!(get(&a, &mutation.entity_id), None);
    assert!(a.engine.audit().is_empty().unwrap());
    assert!(a.engine.queue().is_empty().unwrap());

    // The same create goes through once the disk recovers.
    unblock_inserts(&outside, "outbox");
    let entity = a.engine.commit_local(mutation).await.unwrap();
    assert_eq!(get(&a, &entity.id), Some(entity.clone()));
    assert_eq!(a.engine.audit().len().unwrap(), 1);

    let report = a.engine.sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(relay.sent_count(), 1);
}

#[tokio::test]
async fn failed_store_write_is_restored_from_the_outbox() {
    let relay = MemoryRelay::new();
    let store = Arc::new(FlakyStore::default());
    let engine = flaky_engine(&relay, "alpha", &generate_random_key(), store.clone());

    store.fail_writes(true);
    let mutation = create("account", json!({"name": "Savings"}));
    let err = engine.commit_local(mutation.clone()).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(store.get(&mutation.entity_id).unwrap(), None);
    assert_eq!(engine.queue().len().unwrap(), 1);

    store.fail_writes(false);
    let report = engine.sync_cycle().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(relay.sent_count(), 1);

    let stored = store.get(&mutation.entity_id).unwrap().unwrap();
    assert_eq!(stored.field("name"), Some(&json!("Savings")));
    assert_eq!(engine.audit().len().unwrap(), 1);

    let replayed = MemoryEntityStore::new();
    engine.replay(&replayed).unwrap();
    assert_eq!(replayed.list().unwrap(), store.list().unwrap());
}

#[tokio::test]
async fn next_commit_builds_on_the_unstored_change() {
    let relay = MemoryRelay::new();
    let store = Arc::new(FlakyStore::default());
    let engine = flaky_engine(&relay, "alpha", &generate_random_key(), store.clone());

    store.fail_writes(true);
    let mutation = create("account", json!({"name": "Savings", "balance": 1}));
    let id = mutation.entity_id;
    engine.commit_local(mutation).await.unwrap_err();
    store.fail_writes(false);

    let updated = engine
        .commit_local(EntityMutation::update(id, "account", fields(json!({"balance": 2}))))
        .await
        .unwrap();
    assert_eq!(updated.version_vector.get(engine.device()), 2);
    assert_eq!(updated.field("name"), Some(&json!("Savings")));
    assert_eq!(store.get(&id).unwrap(), Some(updated.clone()));
    assert_eq!(engine.queue().get(&id).unwrap().unwrap().entity, updated);
}

// ── Inbound changes ──────────────────────────────────────────────

#[tokio::test]
async fn failed_audit_write_keeps_inbound_change_pending() {
    let key = generate_random_key();
    let relay = MemoryRelay::new();
    let a = device(&relay, "alpha", &key);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bravo.db");
    let b = device_with(&relay, "bravo", &key, test_config(), SyncDb::open(&path).unwrap());

    let entity = a
        .engine
        .commit_local(create("account", json!({"name": "Checking"})))
        .await
        .unwrap();
    a.engine.push().await.unwrap();

    let outside = block_inserts(&path, "audit_log");
    let err = b.engine.pull().await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)), "got {err:?}");
    assert_eq!(get(&b, &entity.id), None);

    unblock_inserts(&outside, "audit_log");
    assert_eq!(b.engine.pull().await.unwrap(), 1);
    assert_eq!(get(&b, &entity.id), Some(entity.clone()));

    let audit = b.engine.audit().entries().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].origin, AuditOrigin::Remote);
    assert_eq!(audit[0].actor, a.id);

    let replayed = MemoryEntityStore::new();
    b.engine.replay(&replayed).unwrap();
    assert_eq!(replayed.list().unwrap(), b.store.list().unwrap());
}

#[tokio::test]
async fn failed_store_write_on_pull_logs_the_version_once() {
    let key = generate_random_key();
    let relay = MemoryRelay::new();
    let a = device(&relay, "alpha", &key);
    let store = Arc::new(FlakyStore::default());
    let b = flaky_engine(&relay, "bravo", &key, store.clone());

    let entity = a
        .engine
        .commit_local(create("account", json!({"name": "Checking"})))
        .await
        .unwrap();
    a.engine.push().await.unwrap();

    store.fail_writes(true);
    assert!(matches!(b.pull().await, Err(SyncError::Storage(_))));
    assert_eq!(store.get(&entity.id).unwrap(), None);

    store.fail_writes(false);
    assert_eq!(b.pull().await.unwrap(), 1);
    assert_eq!(store.get(&entity.id).unwrap(), Some(entity.clone()));
    assert_eq!(b.audit().len().unwrap(), 1);

    let replayed = MemoryEntityStore::new();
    b.replay(&replayed).unwrap();
    assert_eq!(replayed.list().unwrap(), store.list().unwrap());
}
