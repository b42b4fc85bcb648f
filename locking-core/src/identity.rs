//! Resolution of the current lock holder

use crate::types::HolderId;

/// Yields the holder on whose behalf the manager acts, or `None` for
/// unauthenticated callers.
pub trait IdentityProvider: Send + Sync {
    fn current_holder(&self) -> Option<HolderId>;
}

/// Always the same holder
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub HolderId);

impl FixedIdentity {
    pub fn new(holder_id: impl Into<String>) -> Self {
        Self(HolderId::new(holder_id))
    }
}

impl IdentityProvider for FixedIdentity {
    fn current_holder(&self) -> Option<HolderId> {
        Some(self.0.clone())
    }
}

/// No identity at all
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn current_holder(&self) -> Option<HolderId> {
        None
    }
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<HolderId> + Send + Sync,
{
    fn current_holder(&self) -> Option<HolderId> {
        self()
    }
}
