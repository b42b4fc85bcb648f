use serde::{Deserialize, Serialize};

use super::{EntityId, HolderId, LockId, LockType};

/// A time-bound lock on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Unique lock ID
    pub id: LockId,
    /// Holder that created the lock
    pub holder_id: HolderId,
    /// The protected entity
    pub entity_id: EntityId,
    /// Shared or exclusive
    pub lock_type: LockType,
    /// Lease end, epoch milliseconds
    pub expires_at: u64,
}

impl Lock {
    pub fn from_draft(id: LockId, draft: LockDraft) -> Self {
        Self {
            id,
            holder_id: draft.holder_id,
            entity_id: draft.entity_id,
            lock_type: draft.lock_type,
            expires_at: draft.expires_at,
        }
    }

    pub fn is_active(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// A lock the manager asks the store to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDraft {
    pub holder_id: HolderId,
    pub entity_id: EntityId,
    pub lock_type: LockType,
    pub expires_at: u64,
}

/// Outcome of an atomic check-and-create
#[derive(Debug, Clone)]
pub enum Acquisition {
    /// No active lock conflicted, the lock was stored
    Created(Lock),
    /// Active locks that blocked the request; nothing was stored
    Conflict(Vec<Lock>),
}

/// Which leases a filter matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activity {
    /// `expires_at > now`
    #[default]
    Active,
    /// `expires_at <= now`
    Expired,
    /// Both
    Any,
}

impl Activity {
    pub fn matches(self, lock: &Lock, now: u64) -> bool {
        match self {
            Activity::Active => lock.is_active(now),
            Activity::Expired => !lock.is_active(now),
            Activity::Any => true,
        }
    }
}

/// Conjunctive lock filter; `None` fields are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFilter {
    pub ids: Option<Vec<LockId>>,
    pub entity_id: Option<EntityId>,
    pub holder_id: Option<HolderId>,
    pub lock_type: Option<LockType>,
    pub activity: Activity,
}

impl LockFilter {
    /// Matches active locks only.
    pub fn active() -> Self {
        Self::default()
    }

    /// Matches locks regardless of their lease.
    pub fn any() -> Self {
        Self {
            activity: Activity::Any,
            ..Self::default()
        }
    }

    pub fn expired() -> Self {
        Self {
            activity: Activity::Expired,
            ..Self::default()
        }
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = LockId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn holder(mut self, holder_id: HolderId) -> Self {
        self.holder_id = Some(holder_id);
        self
    }

    pub fn lock_type(mut self, lock_type: Option<LockType>) -> Self {
        self.lock_type = lock_type;
        self
    }

    pub fn matches(&self, lock: &Lock, now: u64) -> bool {
        self.activity.matches(lock, now)
            && self.ids.as_ref().is_none_or(|ids| ids.contains(&lock.id))
            && self.entity_id.is_none_or(|e| e == lock.entity_id)
            && self.holder_id.as_ref().is_none_or(|h| *h == lock.holder_id)
            && self.lock_type.is_none_or(|t| t == lock.lock_type)
    }
}
