//! Entity model for LedgerSync.
//!
//! Defines the types every sync-core subsystem depends on:
//! - [`Entity`]: a synchronizable record (id, type, JSON fields, causal history)
//! - [`EntityMutation`]: a local change request, checked by the validator
//!   before it is committed
//! - [`resolve`]: the pure, deterministic merge of a local and a remote copy
//!
//! Resolution is deliberately free of I/O so that live sync, audit replay and
//! tests all run exactly the same code.

mod entity;
mod error;
mod mutation;
mod resolver;

pub use entity::{Entity, FieldStamp};
pub use error::{ModelError, ModelResult};
pub use mutation::{EntityMutation, MutationKind};
pub use resolver::{resolve, Resolution};
