use crate::conflict::{ConflictEngine, ConflictResult};
use crate::infrastructure::{LockStore, StoreError};
use crate::types::{Acquisition, Lock, LockDraft, LockFilter, LockId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Process-local lock table. Check-and-create runs under one mutex guard,
/// so concurrent acquirers sharing the store cannot both pass the check.
#[derive(Default)]
pub struct InMemoryLockStore {
    // Map of Lock ID -> Lock
    locks: Mutex<HashMap<LockId, Lock>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing the conflict check.
    /// Used to seed fixtures such as already-expired rows.
    pub fn insert_raw(&self, lock: Lock) {
        self.table().insert(lock.id.clone(), lock);
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, HashMap<LockId, Lock>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LockStore for InMemoryLockStore {
    fn create(&self, draft: LockDraft, now: u64) -> Result<Acquisition, StoreError> {
        let mut locks = self.table();

        let existing: Vec<Lock> = locks
            .values()
            .filter(|l| l.entity_id == draft.entity_id)
            .cloned()
            .collect();

        match ConflictEngine::check(
            &draft.holder_id,
            draft.entity_id,
            draft.lock_type,
            &existing,
            now,
        ) {
            ConflictResult::Conflict { blocking } => Ok(Acquisition::Conflict(blocking)),
            ConflictResult::Ok => {
                let lock = Lock::from_draft(LockId::generate(), draft);
                locks.insert(lock.id.clone(), lock.clone());
                Ok(Acquisition::Created(lock))
            }
        }
    }

    fn query(&self, filter: &LockFilter, now: u64) -> Result<Vec<Lock>, StoreError> {
        Ok(self
            .table()
            .values()
            .filter(|l| filter.matches(l, now))
            .cloned()
            .collect())
    }

    fn delete(&self, filter: &LockFilter, now: u64) -> Result<usize, StoreError> {
        let mut locks = self.table();
        let before = locks.len();
        locks.retain(|_, l| !filter.matches(l, now));
        Ok(before - locks.len())
    }

    fn update_expiry(
        &self,
        filter: &LockFilter,
        expires_at: u64,
        now: u64,
    ) -> Result<usize, StoreError> {
        let mut touched = 0;
        for lock in self.table().values_mut() {
            if filter.matches(lock, now) {
                lock.expires_at = expires_at;
                touched += 1;
            }
        }
        Ok(touched)
    }
}
