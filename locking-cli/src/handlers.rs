use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use locking_core::types::{EntityId, HolderId, Lock, LockType};
use locking_core::LockError;

// ─── Validation Helpers ─────────────────────────────────────────────────────

pub fn parse_lock_type(lock_type: Option<&str>) -> Result<Option<LockType>, ApiError> {
    lock_type
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<LockType>().map_err(ApiError::BadRequest))
        .transpose()
}

/// Upper bound for any duration a request may ask for (ten years)
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Reject durations outside `min..=MAX_DURATION_SECONDS`. `None` means "use the default".
pub fn check_seconds(field: &str, value: Option<u64>, min: u64) -> Result<(), ApiError> {
    match value {
        Some(secs) if secs < min => Err(ApiError::BadRequest(format!(
            "{} must be at least {}",
            field, min
        ))),
        Some(secs) if secs > MAX_DURATION_SECONDS => Err(ApiError::BadRequest(format!(
            "{} must be at most {}",
            field, MAX_DURATION_SECONDS
        ))),
        _ => Ok(()),
    }
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AcquireLockRequest {
    pub entity_id: u64,
    pub lock_type: String,
    pub expiration_seconds: Option<u64>,
    pub retry_timeout_seconds: Option<u64>,
}

impl AcquireLockRequest {
    pub fn validate(&self) -> Result<LockType, ApiError> {
        check_seconds("expiration_seconds", self.expiration_seconds, 1)?;
        check_seconds("retry_timeout_seconds", self.retry_timeout_seconds, 0)?;
        self.lock_type.parse().map_err(ApiError::BadRequest)
    }
}

#[derive(Deserialize)]
pub struct ReleaseLocksRequest {
    pub lock_ids: Vec<String>,
}

#[derive(Deserialize, Default)]
pub struct RefreshLocksRequest {
    pub expiration_seconds: Option<u64>,
}

#[derive(Deserialize, Default)]
pub struct LockQuery {
    pub entity_id: Option<u64>,
    pub holder_id: Option<String>,
    pub lock_type: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct LockTypeQuery {
    pub lock_type: Option<String>,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Serialize)]
pub struct LockInfo {
    pub id: String,
    pub holder_id: String,
    pub entity_id: u64,
    pub lock_type: LockType,
    pub expires_at: u64,
}

impl From<Lock> for LockInfo {
    fn from(lock: Lock) -> Self {
        Self {
            id: lock.id.0,
            holder_id: lock.holder_id.0,
            entity_id: lock.entity_id.0,
            lock_type: lock.lock_type,
            expires_at: lock.expires_at,
        }
    }
}

#[derive(Serialize)]
pub struct AcquiredResponse {
    pub lock_id: String,
    pub entity_id: u64,
    pub lock_type: LockType,
}

#[derive(Serialize)]
pub struct LockIdsResponse {
    pub lock_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Serialize)]
pub struct LockedResponse {
    pub entity_id: u64,
    pub locked: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_locks: usize,
    pub version: String,
}

#[derive(Serialize)]
pub struct TimeoutDetails {
    pub entity_id: EntityId,
    pub lock_type: LockType,
    pub waited_ms: u64,
    pub blocking_holders: Vec<HolderId>,
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Lock(#[from] LockError),
}

fn lock_status(error: &LockError) -> StatusCode {
    match error {
        LockError::Unauthenticated => StatusCode::UNAUTHORIZED,
        LockError::Timeout { .. } => StatusCode::CONFLICT,
        LockError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LockError::ParentSequence { source, .. } => lock_status(source),
        LockError::Hierarchy(_) => StatusCode::NOT_FOUND,
        LockError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Lock(e) => lock_status(e),
        }
    }

    fn details(&self) -> Option<TimeoutDetails> {
        let mut error = match self {
            ApiError::Lock(e) => e,
            ApiError::BadRequest(_) => return None,
        };
        while let LockError::ParentSequence { source, .. } = error {
            error = &**source;
        }
        match error {
            LockError::Timeout {
                entity_id,
                lock_type,
                waited,
                blocking,
            } => Some(TimeoutDetails {
                entity_id: *entity_id,
                lock_type: *lock_type,
                waited_ms: waited.as_millis() as u64,
                blocking_holders: blocking.iter().map(|l| l.holder_id.clone()).collect(),
            }),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ApiResponse {
            success: false,
            data: self.details(),
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
