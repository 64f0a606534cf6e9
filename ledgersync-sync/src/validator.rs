//! Pre-commit validation hook.
//!
//! Domain rules (double-entry balance, required fields) belong to the
//! application. The engine only asks a [`MutationValidator`] for a verdict
//! before a local mutation touches the store or the outbox.

use crate::error::SyncResult;
use ledgersync_model::EntityMutation;

/// Pass/fail check run on every local mutation before it is committed.
///
/// Return [`SyncError::ConstraintViolation`](crate::SyncError::ConstraintViolation)
/// to reject.
pub trait MutationValidator: Send + Sync {
    fn validate(&self, mutation: &EntityMutation) -> SyncResult<()>;
}

/// Validator that accepts every mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl MutationValidator for AcceptAll {
    fn validate(&self, _mutation: &EntityMutation) -> SyncResult<()> {
        Ok(())
    }
}

impl<F> MutationValidator for F
where
    F: Fn(&EntityMutation) -> SyncResult<()> + Send + Sync,
{
    fn validate(&self, mutation: &EntityMutation) -> SyncResult<()> {
        self(mutation)
    }
}
