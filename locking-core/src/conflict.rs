use crate::types::{EntityId, HolderId, Lock, LockType};

/// Represents the outcome of a conflict check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResult {
    /// No conflict found
    Ok,
    /// Active locks that block the request
    Conflict { blocking: Vec<Lock> },
}

impl ConflictResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictResult::Conflict { .. })
    }
}

/// A pure engine for read/write conflict detection.
///
/// The rule is asymmetric: a read is blocked by any write, while a write is
/// blocked by any write and by reads of *other* holders. A holder may therefore
/// upgrade its own read locks to a write lock.
pub struct ConflictEngine;

impl ConflictEngine {
    /// Compatibility matrix for locks of *different* holders.
    /// Rows: held type, cols: requested type. True = compatible.
    ///
    /// Order: Read(0), Write(1)
    #[rustfmt::skip]
    const MATRIX: [[bool; 2]; 2] = [
        //          Read   Write
        /* Read  */ [true,  false],
        /* Write */ [false, false],
    ];

    fn index(lock_type: LockType) -> usize {
        match lock_type {
            LockType::Read => 0,
            LockType::Write => 1,
        }
    }

    /// Check whether a held lock blocks a request.
    pub fn check_pair(held: LockType, requesting: LockType, same_holder: bool) -> bool {
        // The holder's own read locks never block it; its own write lock
        // still blocks, so two writes never coexist.
        if same_holder && held == LockType::Read {
            return false;
        }
        !Self::MATRIX[Self::index(held)][Self::index(requesting)]
    }

    /// Checks a request against a snapshot of locks. Locks on other
    /// entities or with an expired lease are skipped.
    pub fn check(
        requesting_holder: &HolderId,
        entity_id: EntityId,
        requesting: LockType,
        locks: &[Lock],
        now: u64,
    ) -> ConflictResult {
        let blocking: Vec<Lock> = locks
            .iter()
            .filter(|lock| lock.entity_id == entity_id && lock.is_active(now))
            .filter(|lock| {
                Self::check_pair(
                    lock.lock_type,
                    requesting,
                    lock.holder_id == *requesting_holder,
                )
            })
            .cloned()
            .collect();

        if blocking.is_empty() {
            ConflictResult::Ok
        } else {
            ConflictResult::Conflict { blocking }
        }
    }
}
