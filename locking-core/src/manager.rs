//! The lock manager: conflict-checked polling acquisition, holder-scoped
//! release and refresh, and ancestor read-locking on top of a shared store.
//!
//! All coordination goes through the [`LockStore`]; the manager keeps no
//! lock state of its own, so any number of managers (threads, processes)
//! may work against the same store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::{LockConfig, ParentLockPolicy, POLL_INTERVAL};
use crate::error::LockError;
use crate::hierarchy::{EntityHierarchy, ParentMap};
use crate::identity::IdentityProvider;
use crate::infrastructure::LockStore;
use crate::types::*;

/// Stand-in deadline for retry timeouts too large to add to an `Instant`
const UNBOUNDED_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + lease`, saturating at `u64::MAX` instead of wrapping
fn lease_end(now: u64, lease: Duration) -> u64 {
    now.saturating_add(u64::try_from(lease.as_millis()).unwrap_or(u64::MAX))
}

/// Handle for acquiring and releasing locks on behalf of one holder.
///
/// Cloning is cheap; clones share the store, hierarchy and clock.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    identity: Arc<dyn IdentityProvider>,
    hierarchy: Arc<dyn EntityHierarchy>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl LockManager {
    /// Manager with default configuration, the system clock and an empty
    /// hierarchy.
    pub fn new(store: Arc<dyn LockStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            hierarchy: Arc::new(ParentMap::new()),
            clock: Arc::new(SystemClock),
            config: LockConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: Arc<dyn EntityHierarchy>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Same store, hierarchy, clock and config, acting for another holder.
    pub fn with_identity(&self, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            ..self.clone()
        }
    }

    fn holder(&self) -> Result<HolderId, LockError> {
        self.identity
            .current_holder()
            .ok_or(LockError::Unauthenticated)
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    /// True iff the entity has at least one active lock (of the given type).
    pub fn is_locked(
        &self,
        entity_id: EntityId,
        lock_type: Option<LockType>,
    ) -> Result<bool, LockError> {
        let filter = LockFilter::active().entity(entity_id).lock_type(lock_type);
        Ok(!self.store.query(&filter, self.clock.now_ms())?.is_empty())
    }

    pub fn is_read_locked(&self, entity_id: EntityId) -> Result<bool, LockError> {
        self.is_locked(entity_id, Some(LockType::Read))
    }

    pub fn is_write_locked(&self, entity_id: EntityId) -> Result<bool, LockError> {
        self.is_locked(entity_id, Some(LockType::Write))
    }

    /// Active locks matching every supplied filter. No ordering guarantee.
    pub fn get_locks(
        &self,
        entity_id: Option<EntityId>,
        holder_id: Option<HolderId>,
        lock_type: Option<LockType>,
    ) -> Result<Vec<Lock>, LockError> {
        let filter = LockFilter {
            entity_id,
            holder_id,
            lock_type,
            ..LockFilter::active()
        };
        Ok(self.store.query(&filter, self.clock.now_ms())?)
    }

    /// Rows whose lease ran out but that nobody released yet.
    pub fn get_expired_locks(&self, entity_id: Option<EntityId>) -> Result<Vec<Lock>, LockError> {
        let filter = LockFilter {
            entity_id,
            ..LockFilter::expired()
        };
        Ok(self.store.query(&filter, self.clock.now_ms())?)
    }

    // ─── Acquisition ────────────────────────────────────────────────────────

    /// Acquire a lock, polling every [`POLL_INTERVAL`] while it conflicts.
    ///
    /// `None` for either duration falls back to the configured default.
    /// Fails with [`LockError::Unauthenticated`] right away when there is no
    /// holder, and with [`LockError::Timeout`] once the retry timeout elapses.
    pub async fn acquire_lock(
        &self,
        entity_id: EntityId,
        lock_type: LockType,
        expiration_seconds: Option<u64>,
        retry_timeout_seconds: Option<u64>,
    ) -> Result<LockId, LockError> {
        let holder = self.holder()?;
        self.poll_until_acquired(
            &holder,
            entity_id,
            lock_type,
            self.expiration(expiration_seconds),
            self.retry_timeout(retry_timeout_seconds),
        )
        .await
    }

    /// [`LockManager::acquire_lock`] that gives up as soon as `cancel`
    /// completes, returning [`LockError::Cancelled`]. No lock is left behind.
    pub async fn acquire_lock_with_cancel<C>(
        &self,
        entity_id: EntityId,
        lock_type: LockType,
        expiration_seconds: Option<u64>,
        retry_timeout_seconds: Option<u64>,
        cancel: C,
    ) -> Result<LockId, LockError>
    where
        C: Future<Output = ()>,
    {
        let holder = self.holder()?;
        let acquire = self.poll_until_acquired(
            &holder,
            entity_id,
            lock_type,
            self.expiration(expiration_seconds),
            self.retry_timeout(retry_timeout_seconds),
        );

        tokio::select! {
            biased;
            _ = cancel => {
                tracing::debug!(holder_id = %holder, entity_id = %entity_id, %lock_type, "Lock acquisition cancelled");
                Err(LockError::Cancelled { entity_id, lock_type })
            }
            result = acquire => result,
        }
    }

    pub async fn acquire_read_lock(
        &self,
        entity_id: EntityId,
        expiration_seconds: Option<u64>,
        retry_timeout_seconds: Option<u64>,
    ) -> Result<LockId, LockError> {
        self.acquire_lock(entity_id, LockType::Read, expiration_seconds, retry_timeout_seconds)
            .await
    }

    pub async fn acquire_write_lock(
        &self,
        entity_id: EntityId,
        expiration_seconds: Option<u64>,
        retry_timeout_seconds: Option<u64>,
    ) -> Result<LockId, LockError> {
        self.acquire_lock(entity_id, LockType::Write, expiration_seconds, retry_timeout_seconds)
            .await
    }

    async fn poll_until_acquired(
        &self,
        holder: &HolderId,
        entity_id: EntityId,
        lock_type: LockType,
        expiration: Duration,
        retry_timeout: Duration,
    ) -> Result<LockId, LockError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(retry_timeout)
            .unwrap_or_else(|| started + UNBOUNDED_WAIT);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let now = self.clock.now_ms();
            let draft = LockDraft {
                holder_id: holder.clone(),
                entity_id,
                lock_type,
                expires_at: lease_end(now, expiration),
            };

            let blocking = match self.store.create(draft, now)? {
                Acquisition::Created(lock) => {
                    tracing::debug!(
                        holder_id = %holder,
                        entity_id = %entity_id,
                        lock_id = %lock.id,
                        %lock_type,
                        attempts,
                        "Lock acquired"
                    );
                    return Ok(lock.id);
                }
                Acquisition::Conflict(blocking) => blocking,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    holder_id = %holder,
                    entity_id = %entity_id,
                    %lock_type,
                    attempts,
                    blocking = blocking.len(),
                    "Lock acquisition timed out"
                );
                return Err(LockError::Timeout {
                    entity_id,
                    lock_type,
                    waited: started.elapsed(),
                    blocking,
                });
            }

            tracing::trace!(
                holder_id = %holder,
                entity_id = %entity_id,
                %lock_type,
                blocking = blocking.len(),
                "Lock busy, retrying"
            );
            // Never sleep past the deadline; the next pass is the last attempt.
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    fn expiration(&self, seconds: Option<u64>) -> Duration {
        seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.expiration())
    }

    fn retry_timeout(&self, seconds: Option<u64>) -> Duration {
        seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.retry_timeout())
    }

    // ─── Release & Refresh ──────────────────────────────────────────────────

    /// Delete the given locks. Ids held by other holders are ignored.
    /// Returns how many locks were deleted.
    pub fn release_locks(
        &self,
        lock_ids: impl IntoIterator<Item = LockId>,
    ) -> Result<usize, LockError> {
        let holder = self.holder()?;
        let filter = LockFilter::any().ids(lock_ids).holder(holder.clone());
        let released = self.store.delete(&filter, self.clock.now_ms())?;
        tracing::debug!(holder_id = %holder, released, "Locks released");
        Ok(released)
    }

    /// Delete the holder's active locks on one entity.
    pub fn release_locks_by_entity_id(
        &self,
        entity_id: EntityId,
        lock_type: Option<LockType>,
    ) -> Result<usize, LockError> {
        let holder = self.holder()?;
        let filter = LockFilter::active()
            .entity(entity_id)
            .holder(holder.clone())
            .lock_type(lock_type);
        let released = self.store.delete(&filter, self.clock.now_ms())?;
        tracing::debug!(holder_id = %holder, entity_id = %entity_id, released, "Entity locks released");
        Ok(released)
    }

    /// Delete every lock of the holder, expired rows included.
    pub fn release_all_locks(&self) -> Result<usize, LockError> {
        let holder = self.holder()?;
        let filter = LockFilter::any().holder(holder.clone());
        let released = self.store.delete(&filter, self.clock.now_ms())?;
        tracing::debug!(holder_id = %holder, released, "All locks released");
        Ok(released)
    }

    /// Lease heartbeat: push `expires_at` of all the holder's active locks to
    /// `now + expiration`. Expired locks stay expired.
    pub fn refresh_locks(&self, expiration_seconds: Option<u64>) -> Result<usize, LockError> {
        let holder = self.holder()?;
        let now = self.clock.now_ms();
        let expires_at = lease_end(now, self.expiration(expiration_seconds));
        let filter = LockFilter::active().holder(holder.clone());
        let refreshed = self.store.update_expiry(&filter, expires_at, now)?;
        tracing::debug!(holder_id = %holder, refreshed, expires_at, "Locks refreshed");
        Ok(refreshed)
    }

    // ─── Hierarchy ──────────────────────────────────────────────────────────

    /// Read-lock every ancestor of `entity_id`, nearest parent first, so no
    /// ancestor can be write-locked while the entity is being worked on.
    ///
    /// Returns the lock ids in ancestor order. On failure the configured
    /// [`ParentLockPolicy`] decides whether the locks taken so far are
    /// released or kept.
    pub async fn read_lock_parent_sequence(
        &self,
        entity_id: EntityId,
    ) -> Result<Vec<LockId>, LockError> {
        self.read_lock_parent_sequence_with_cancel(entity_id, std::future::pending())
            .await
    }

    /// [`LockManager::read_lock_parent_sequence`] that stops waiting as soon
    /// as `cancel` completes. The ancestor being waited on fails with
    /// [`LockError::Cancelled`] and the parent lock policy applies to the
    /// locks taken so far, exactly as on a timeout.
    pub async fn read_lock_parent_sequence_with_cancel<C>(
        &self,
        entity_id: EntityId,
        cancel: C,
    ) -> Result<Vec<LockId>, LockError>
    where
        C: Future<Output = ()>,
    {
        let holder = self.holder()?;
        let ancestors = self.hierarchy.ancestors_of(entity_id)?;
        let expiration = self.config.expiration();
        let retry_timeout = self.config.retry_timeout();
        let mut cancel = std::pin::pin!(cancel);

        let mut acquired = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors {
            let attempt =
                self.poll_until_acquired(&holder, ancestor, LockType::Read, expiration, retry_timeout);
            let result = tokio::select! {
                biased;
                _ = &mut cancel => {
                    tracing::debug!(holder_id = %holder, entity_id = %entity_id, ancestor = %ancestor, "Ancestor locking cancelled");
                    Err(LockError::Cancelled { entity_id: ancestor, lock_type: LockType::Read })
                }
                result = attempt => result,
            };

            match result {
                Ok(lock_id) => acquired.push(lock_id),
                Err(source) => {
                    let still_held = match self.config.parent_lock_policy {
                        ParentLockPolicy::KeepAcquired => acquired,
                        ParentLockPolicy::AllOrNothing => self.roll_back(&holder, acquired),
                    };
                    return Err(LockError::ParentSequence {
                        entity_id,
                        failed_entity: ancestor,
                        acquired: still_held,
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(acquired)
    }

    /// Best-effort release of locks taken earlier in a failed sequence.
    /// Returns whatever could not be released.
    fn roll_back(&self, holder: &HolderId, acquired: Vec<LockId>) -> Vec<LockId> {
        if acquired.is_empty() {
            return acquired;
        }
        let filter = LockFilter::any().ids(acquired.clone()).holder(holder.clone());
        match self.store.delete(&filter, self.clock.now_ms()) {
            Ok(released) => {
                tracing::debug!(holder_id = %holder, released, "Rolled back ancestor locks");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(holder_id = %holder, error = %e, "Failed to roll back ancestor locks");
                acquired
            }
        }
    }
}
