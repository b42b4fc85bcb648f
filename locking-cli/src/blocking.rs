//! Store adapter for backends whose calls may block, such as SQLite waiting
//! out another process's write transaction.

use tokio::runtime::{Handle, RuntimeFlavor};

use locking_core::infrastructure::{LockStore, StoreError};
use locking_core::types::{Acquisition, Lock, LockDraft, LockFilter};

/// Runs every call of the wrapped store through `block_in_place` when on a
/// multi-threaded runtime, so other tasks move off the stalled worker.
/// Elsewhere calls run inline.
pub struct BlockingStore<S> {
    inner: S,
}

impl<S: LockStore> BlockingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    fn run<T>(&self, call: impl FnOnce(&S) -> T) -> T {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| call(&self.inner))
            }
            _ => call(&self.inner),
        }
    }
}

impl<S: LockStore> LockStore for BlockingStore<S> {
    fn create(&self, draft: LockDraft, now: u64) -> Result<Acquisition, StoreError> {
        self.run(|store| store.create(draft, now))
    }

    fn query(&self, filter: &LockFilter, now: u64) -> Result<Vec<Lock>, StoreError> {
        self.run(|store| store.query(filter, now))
    }

    fn delete(&self, filter: &LockFilter, now: u64) -> Result<usize, StoreError> {
        self.run(|store| store.delete(filter, now))
    }

    fn update_expiry(
        &self,
        filter: &LockFilter,
        expires_at: u64,
        now: u64,
    ) -> Result<usize, StoreError> {
        self.run(|store| store.update_expiry(filter, expires_at, now))
    }

    fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        self.run(|store| store.purge_expired(now))
    }
}
