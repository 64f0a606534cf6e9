//! Error types for the entity model.

use ledgersync_types::EntityId;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while applying a mutation to an entity.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The mutation targets an entity that does not exist.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// A create targeted an id that already exists.
    #[error("entity already exists: {0}")]
    AlreadyExists(EntityId),

    /// The mutation does not make sense for the entity's current state
    /// (e.g. updating a tombstone, restoring a live entity).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Entity fields must be a JSON object.
    #[error("entity data must be a JSON object")]
    NotAnObject,
}
