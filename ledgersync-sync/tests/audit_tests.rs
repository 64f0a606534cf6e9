mod common;

use common::{device, fields, make_entity};
use ledgersync_crypto::generate_random_key;
use ledgersync_model::{EntityMutation, MutationKind};
use ledgersync_sync::transport::memory::MemoryRelay;
use ledgersync_sync::{
    AuditKind, AuditLog, AuditOrigin, EntityStore, MemoryEntityStore, SyncDb,
};
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;

fn log() -> AuditLog {
    AuditLog::new(SyncDb::open_in_memory().unwrap())
}

#[test]
fn append_assigns_increasing_seq() {
    let log = log();
    let actor = DeviceId::from("alpha");
    let first = make_entity("alpha", json!({"n": 1}));
    let second = make_entity("alpha", json!({"n": 2}));

    let e1 = log
        .append(AuditKind::Create, AuditOrigin::Local, &actor, &first)
        .unwrap();
    let e2 = log
        .append(AuditKind::Create, AuditOrigin::Remote, &actor, &second)
        .unwrap();

    assert!(e2.seq > e1.seq);
    assert_eq!(e1.version_vector, first.version_vector);
    assert_eq!(log.len().unwrap(), 2);
    assert_eq!(log.entries().unwrap(), vec![e1.clone(), e2]);
    assert_eq!(log.entries_for(&first.id).unwrap(), vec![e1]);
}

#[test]
fn kind_is_inferred_from_snapshots() {
    let device = DeviceId::from("alpha");
    let live = make_entity("alpha", json!({}));
    let deleted = EntityMutation::delete(live.id, "account")
        .apply(Some(&live), &device, Timestamp::now())
        .unwrap();
    let restored = EntityMutation::restore(live.id, "account")
        .apply(Some(&deleted), &device, Timestamp::now())
        .unwrap();

    assert_eq!(AuditKind::infer(None, &live), AuditKind::Create);
    assert_eq!(AuditKind::infer(Some(&live), &deleted), AuditKind::Delete);
    assert_eq!(AuditKind::infer(Some(&deleted), &restored), AuditKind::Restore);
    assert_eq!(AuditKind::infer(Some(&live), &live), AuditKind::Update);
    assert_eq!(AuditKind::from(MutationKind::Restore), AuditKind::Restore);
}

#[test]
fn replay_skips_stale_snapshots() {
    let log = log();
    let device = DeviceId::from("alpha");
    let v1 = make_entity("alpha", json!({"n": 1}));
    let v2 = EntityMutation::update(v1.id, "account", fields(json!({"n": 2})))
        .apply(Some(&v1), &device, Timestamp::now())
        .unwrap();

    log.append(AuditKind::Update, AuditOrigin::Local, &device, &v2)
        .unwrap();
    log.append(AuditKind::Create, AuditOrigin::Remote, &device, &v1)
        .unwrap();

    let store = MemoryEntityStore::new();
    assert_eq!(log.replay(&store).unwrap(), 1);
    assert_eq!(store.get(&v1.id).unwrap(), Some(v2));
}

/// Picks the next valid mutation for `id` given the device's current copy.
fn next_mutation(store: &MemoryEntityStore, id: EntityId, step: usize) -> EntityMutation {
    match store.get(&id).unwrap() {
        None => EntityMutation {
            entity_id: id,
            entity_type: "account".into(),
            kind: MutationKind::Create,
            fields: fields(json!({"step": step})),
        },
        Some(e) if e.is_deleted() => EntityMutation::restore(id, "account"),
        Some(_) if step % 7 == 0 => EntityMutation::delete(id, "account"),
        Some(_) => {
            let mut changes = fields(json!({"step": step}));
            changes.insert(format!("f{}", step % 3), json!(step));
            EntityMutation::update(id, "account", changes)
        }
    }
}

#[tokio::test]
async fn replaying_interleaved_history_reproduces_live_state() {
    let relay = MemoryRelay::new();
    let key = generate_random_key();
    let a = device(&relay, "alpha", &key);
    let b = device(&relay, "bravo", &key);
    let ids: Vec<EntityId> = (0..5).map(|_| EntityId::new()).collect();

    for step in 0..100 {
        let (actor, other) = if step % 3 == 0 { (&b, &a) } else { (&a, &b) };
        let id = ids[(step * 7 + step / 5) % ids.len()];
        let mutation = next_mutation(&actor.store, id, step);
        actor.engine.commit_local(mutation).await.unwrap();

        if step % 4 == 0 {
            actor.engine.sync_cycle().await.unwrap();
        }
        if step % 5 == 0 {
            other.engine.sync_cycle().await.unwrap();
        }
    }
    a.engine.sync_cycle().await.unwrap();
    b.engine.sync_cycle().await.unwrap();

    for d in [&a, &b] {
        let entries = d.engine.audit().entries().unwrap();
        assert!(entries.iter().any(|e| e.origin == AuditOrigin::Local));
        assert!(entries.iter().any(|e| e.origin == AuditOrigin::Remote));

        let rebuilt = MemoryEntityStore::new();
        d.engine.replay(&rebuilt).unwrap();
        assert_eq!(rebuilt.list().unwrap(), d.store.list().unwrap());
    }
}
