//! Property-based tests for conflict resolution.
//!
//! Every replica must converge to identical bytes regardless of the order in
//! which concurrent versions arrive, and deletion must stay sticky.

use ledgersync_crdt::VersionVector;
use ledgersync_model::{resolve, Entity, FieldStamp, Resolution};
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const DEVICES: [&str; 3] = ["A", "B", "C"];
const FIELDS: [&str; 4] = ["amount", "memo", "payee", "category"];
const ENTITY: &str = "0190a6f4-1c2b-7d3e-8f40-5a6b7c8d9e0f";

/// A version written by the private device `dot` on top of some shared
/// history from A, B and C. Distinct dots make versions pairwise concurrent.
fn version_strategy(dot: &'static str) -> impl Strategy<Value = Entity> {
    (
        prop::collection::btree_map(prop::sample::select(DEVICES.to_vec()), 0u64..4, 0..3),
        prop::collection::btree_map(
            prop::sample::select(FIELDS.to_vec()),
            (0i64..5, 0usize..3, 0i64..4),
            0..4,
        ),
        prop::option::of(0i64..5),
    )
        .prop_map(move |(counters, fields, deleted)| {
            let mut data = Map::new();
            let mut stamps = BTreeMap::new();
            for (name, (ms, by, value)) in fields {
                data.insert(name.to_string(), Value::from(value));
                stamps.insert(
                    name.to_string(),
                    FieldStamp::new(Timestamp::from_millis(ms), DeviceId::from(DEVICES[by])),
                );
            }
            let last = stamps.values().max().cloned().unwrap_or_default();
            Entity {
                id: EntityId::parse(ENTITY).unwrap(),
                entity_type: "transaction".into(),
                data: Value::Object(data),
                field_stamps: stamps,
                version_vector: VersionVector::from_entries(
                    counters.into_iter().chain([(dot, 1)]),
                ),
                last_modified_by: last.by,
                last_modified_at: last.at,
                deleted_at: deleted.map(Timestamp::from_millis),
            }
        })
}

/// Merges `incoming` into `local` the way a replica's store would.
fn apply(local: &Entity, incoming: &Entity) -> Entity {
    match resolve(Some(local), incoming) {
        Resolution::Accept(e) | Resolution::Merged(e) => e,
        Resolution::Discard | Resolution::Unchanged => local.clone(),
    }
}

proptest! {
    #[test]
    fn concurrent_merge_is_byte_identical_in_both_orders(
        l in version_strategy("X"),
        r in version_strategy("Y"),
    ) {
        let lr = resolve(Some(&l), &r).into_entity().unwrap();
        let rl = resolve(Some(&r), &l).into_entity().unwrap();
        prop_assert_eq!(lr.canonical_bytes().unwrap(), rl.canonical_bytes().unwrap());
    }

    #[test]
    fn tombstone_survives_concurrent_edit(
        l in version_strategy("X"),
        r in version_strategy("Y"),
    ) {
        prop_assume!(l.is_deleted() || r.is_deleted());
        let merged = resolve(Some(&l), &r).into_entity().unwrap();
        prop_assert!(merged.is_deleted());
    }

    #[test]
    fn redelivery_is_idempotent(l in version_strategy("X"), r in version_strategy("X")) {
        let once = apply(&l, &r);
        let twice = apply(&once, &r);
        prop_assert_eq!(once.canonical_bytes().unwrap(), twice.canonical_bytes().unwrap());
    }

    #[test]
    fn three_replicas_converge_in_any_delivery_order(
        a in version_strategy("X"),
        b in version_strategy("Y"),
        c in version_strategy("Z"),
    ) {
        let abc = apply(&apply(&a, &b), &c);
        let acb = apply(&apply(&a, &c), &b);
        let bca = apply(&apply(&b, &c), &a);
        let cab = apply(&apply(&c, &a), &b);
        prop_assert_eq!(abc.canonical_bytes().unwrap(), acb.canonical_bytes().unwrap());
        prop_assert_eq!(abc.canonical_bytes().unwrap(), bca.canonical_bytes().unwrap());
        prop_assert_eq!(abc.canonical_bytes().unwrap(), cab.canonical_bytes().unwrap());
    }
}
