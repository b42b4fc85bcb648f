//! Process-wide lock defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Interval between conflict re-checks while waiting for a lock
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_EXPIRATION_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_TIMEOUT_SECONDS: u64 = 10;

pub const ENV_EXPIRATION_SECONDS: &str = "LOCKING_EXPIRATION_SECONDS";
pub const ENV_RETRY_TIMEOUT_SECONDS: &str = "LOCKING_RETRY_TIMEOUT_SECONDS";
pub const ENV_PARENT_POLICY: &str = "LOCKING_PARENT_POLICY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("{key}: {message}")]
    Invalid { key: String, message: String },
}

/// What happens to the ancestors already locked when a later ancestor
/// cannot be locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentLockPolicy {
    /// Release what was acquired in the same call, then fail
    #[default]
    AllOrNothing,
    /// Leave acquired locks held and report them in the error
    KeepAcquired,
}

impl std::str::FromStr for ParentLockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" => Ok(ParentLockPolicy::AllOrNothing),
            "keep_acquired" => Ok(ParentLockPolicy::KeepAcquired),
            _ => Err(format!(
                "unknown parent lock policy '{}'. Must be one of: all_or_nothing, keep_acquired",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length for new and refreshed locks
    pub expiration_seconds: u64,
    /// How long an acquisition keeps polling before timing out
    pub retry_timeout_seconds: u64,
    pub parent_lock_policy: ParentLockPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            expiration_seconds: DEFAULT_EXPIRATION_SECONDS,
            retry_timeout_seconds: DEFAULT_RETRY_TIMEOUT_SECONDS,
            parent_lock_policy: ParentLockPolicy::default(),
        }
    }
}

impl LockConfig {
    /// Defaults overridden by `LOCKING_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`LockConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_EXPIRATION_SECONDS) {
            config.expiration_seconds = parse_seconds(ENV_EXPIRATION_SECONDS, &value)?;
        }
        if let Some(value) = lookup(ENV_RETRY_TIMEOUT_SECONDS) {
            config.retry_timeout_seconds = parse_seconds(ENV_RETRY_TIMEOUT_SECONDS, &value)?;
        }
        if let Some(value) = lookup(ENV_PARENT_POLICY) {
            config.parent_lock_policy =
                value.parse().map_err(|message| ConfigError::Invalid {
                    key: ENV_PARENT_POLICY.to_string(),
                    message,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiration_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "expiration_seconds".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_seconds)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_timeout_seconds)
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}
