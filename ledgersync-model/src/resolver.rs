//! Deterministic conflict resolution between two copies of one entity.
//!
//! The version vectors decide first. Only when they are concurrent do the
//! contents get merged, and then:
//!
//! - a tombstone beats any live edit (deletion is sticky);
//! - otherwise each top-level field is a last-writer-wins register keyed by
//!   its [`FieldStamp`](crate::FieldStamp) `(at, by)`, with the canonical
//!   JSON of the value as the final tie-break;
//! - two tombstones merge their fields the same way and keep the later
//!   `deleted_at`.
//!
//! The merge is a join: commutative, associative and idempotent, so every
//! replica reaches the same bytes whatever order versions arrive in.

use crate::entity::{Entity, FieldStamp};
use ledgersync_crdt::CausalOrder;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Outcome of resolving an incoming remote copy against the local one.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Remote is strictly newer (or there is no local copy). Store it as-is.
    Accept(Entity),
    /// Versions were concurrent; store this merged entity.
    Merged(Entity),
    /// Remote is strictly older. Keep the local copy.
    Discard,
    /// Remote is identical history (re-delivery). Nothing to do.
    Unchanged,
}

impl Resolution {
    /// The entity to write back, if any.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Accept(e) | Self::Merged(e) => Some(e),
            Self::Discard | Self::Unchanged => None,
        }
    }

    /// Consumes the resolution, yielding the entity to write back.
    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Self::Accept(e) | Self::Merged(e) => Some(e),
            Self::Discard | Self::Unchanged => None,
        }
    }

    /// Returns true if the store must be updated.
    pub fn is_change(&self) -> bool {
        self.entity().is_some()
    }
}

/// Resolves `remote` against the locally stored copy of the same entity.
///
/// Pure: no I/O and no clock reads, so the same inputs always produce the
/// same output on every replica.
pub fn resolve(local: Option<&Entity>, remote: &Entity) -> Resolution {
    let Some(local) = local else {
        return Resolution::Accept(remote.clone());
    };
    debug_assert_eq!(local.id, remote.id, "resolving different entities");

    match local.version_vector.compare(&remote.version_vector) {
        CausalOrder::Before => Resolution::Accept(remote.clone()),
        CausalOrder::After => Resolution::Discard,
        CausalOrder::Equal => Resolution::Unchanged,
        CausalOrder::Concurrent => Resolution::Merged(merge_concurrent(local, remote)),
    }
}

fn merge_concurrent(a: &Entity, b: &Entity) -> Entity {
    let version_vector = a.version_vector.merged(&b.version_vector);

    match (a.is_deleted(), b.is_deleted()) {
        (true, false) => Entity {
            version_vector,
            ..a.clone()
        },
        (false, true) => Entity {
            version_vector,
            ..b.clone()
        },
        _ => {
            let (hi, lo) = if a.rank_cmp(b) == Ordering::Less {
                (b, a)
            } else {
                (a, b)
            };
            let (data, field_stamps) = merge_fields(hi, lo);
            Entity {
                id: hi.id,
                entity_type: hi.entity_type.clone(),
                data,
                field_stamps,
                version_vector,
                last_modified_by: hi.last_modified_by.clone(),
                last_modified_at: hi.last_modified_at,
                deleted_at: a.deleted_at.max(b.deleted_at),
            }
        }
    }
}

/// Per-field last-writer-wins over the union of keys.
///
/// `hi` outranks `lo` as a whole; it is only consulted for non-object data.
fn merge_fields(hi: &Entity, lo: &Entity) -> (Value, BTreeMap<String, FieldStamp>) {
    let (Some(hi_obj), Some(lo_obj)) = (hi.data.as_object(), lo.data.as_object()) else {
        return (hi.data.clone(), hi.field_stamps.clone());
    };

    let mut data = Map::new();
    let mut stamps = BTreeMap::new();

    for key in hi_obj.keys().chain(lo_obj.keys()) {
        if data.contains_key(key) {
            continue;
        }
        let winner = match (hi_obj.get(key), lo_obj.get(key)) {
            (Some(_), None) => hi,
            (None, Some(_)) => lo,
            (Some(hv), Some(lv)) => {
                let order = hi
                    .field_stamp(key)
                    .cmp(&lo.field_stamp(key))
                    .then_with(|| hv.to_string().cmp(&lv.to_string()));
                if order == Ordering::Less { lo } else { hi }
            }
            (None, None) => continue,
        };
        if let Some(value) = winner.field(key) {
            data.insert(key.clone(), value.clone());
        }
        if let Some(stamp) = winner.field_stamps.get(key) {
            stamps.insert(key.clone(), stamp.clone());
        }
    }

    (Value::Object(data), stamps)
}
