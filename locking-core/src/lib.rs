//! # locking-core
//!
//! Cooperative, lease-based read/write locking over a shared store.
//! Provides the read/write conflict rule, polling acquisition with a
//! deadline, holder-scoped release and refresh, and ancestor read-locking
//! for entity hierarchies.

pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod manager;
pub mod types;

pub use error::LockError;
pub use manager::LockManager;

#[cfg(test)]
#[path = "infrastructure_test.rs"]
mod infrastructure_test;
