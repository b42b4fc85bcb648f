use thiserror::Error;

use crate::types::{Acquisition, LockDraft, LockFilter, Lock};

/// Failures of the backing store. The manager never retries these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt lock record {id}: {message}")]
    Corrupt { id: String, message: String },
}

/// Defines the contract for lock storage backends.
///
/// Stores are shared between managers of different holders (and, for
/// persistent backends, between processes), so every method takes `&self`.
pub trait LockStore: Send + Sync {
    /// Atomically checks the draft against the entity's active locks and
    /// stores it only if nothing conflicts. No other `create` on the same
    /// store may interleave between the check and the insert.
    fn create(&self, draft: LockDraft, now: u64) -> Result<Acquisition, StoreError>;

    /// Snapshot of the locks matching the filter
    fn query(&self, filter: &LockFilter, now: u64) -> Result<Vec<Lock>, StoreError>;

    /// Delete matching locks, returning how many were removed
    fn delete(&self, filter: &LockFilter, now: u64) -> Result<usize, StoreError>;

    /// Set `expires_at` on matching locks, returning how many were touched
    fn update_expiry(
        &self,
        filter: &LockFilter,
        expires_at: u64,
        now: u64,
    ) -> Result<usize, StoreError>;

    /// Reap rows whose lease ran out
    fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        self.delete(&LockFilter::expired(), now)
    }
}
