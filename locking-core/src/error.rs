//! Errors surfaced by the lock manager

use crate::hierarchy::HierarchyError;
use crate::infrastructure::StoreError;
use crate::types::{EntityId, Lock, LockId, LockType};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("no holder identity could be resolved")]
    Unauthenticated,
    #[error(
        "timed out after {waited:?} waiting for {lock_type} lock on entity {entity_id} ({} blocking)",
        .blocking.len()
    )]
    Timeout {
        entity_id: EntityId,
        lock_type: LockType,
        waited: Duration,
        /// Locks that blocked the last attempt
        blocking: Vec<Lock>,
    },
    #[error("acquisition of {lock_type} lock on entity {entity_id} was cancelled")]
    Cancelled {
        entity_id: EntityId,
        lock_type: LockType,
    },
    #[error("failed to read-lock ancestor {failed_entity} of entity {entity_id}: {source}")]
    ParentSequence {
        entity_id: EntityId,
        failed_entity: EntityId,
        /// Locks still held after the failure (empty under all-or-nothing)
        acquired: Vec<LockId>,
        #[source]
        source: Box<LockError>,
    },
    #[error("hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    /// Timeout-class failures: the lock was not obtained but nothing is broken.
    /// A missing identity counts, matching how acquisition reports it.
    pub fn is_timeout(&self) -> bool {
        match self {
            LockError::Unauthenticated | LockError::Timeout { .. } => true,
            LockError::ParentSequence { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
