use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use locking_core::config::LockConfig;
use locking_core::hierarchy::ParentMap;
use locking_core::identity::{Anonymous, FixedIdentity};
use locking_core::infrastructure::{LockStore, StoreError};
use locking_core::infrastructure_in_memory::InMemoryLockStore;
use locking_core::types::{EntityId, HolderId, LockId, LockType};
use locking_core::LockManager;

use crate::handlers::*;

/// Header carrying the holder identity of a request
pub const HOLDER_HEADER: &str = "x-holder-id";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to open lock store: {0}")]
    Store(#[from] StoreError),
    #[error("unknown storage backend '{0}'. Use 'memory' or 'sqlite:<path>'")]
    UnknownStorage(String),
    #[cfg(not(feature = "sqlite"))]
    #[error("SQLite storage requested but the `sqlite` feature is not enabled")]
    SqliteDisabled,
    #[error("failed to read hierarchy file {path}: {source}")]
    HierarchyIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid hierarchy file {path}: {source}")]
    HierarchyJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub storage: String,
    pub hierarchy: Option<PathBuf>,
    pub api_key: Option<String>,
    pub config: LockConfig,
}

#[derive(Clone)]
pub struct AppState {
    /// Anonymous base manager; each request derives its holder's manager
    pub manager: LockManager,
    pub api_key: Option<String>,
    /// Flips to `true` on shutdown, aborting acquisitions still polling
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    fn manager_for(&self, headers: &HeaderMap) -> LockManager {
        let holder = headers
            .get(HOLDER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty());

        match holder {
            Some(holder) => self.manager.with_identity(Arc::new(FixedIdentity::new(holder))),
            None => self.manager.with_identity(Arc::new(Anonymous)),
        }
    }
}

pub async fn run(options: ServeOptions) -> Result<(), ServerError> {
    let store = create_store(&options.storage)?;
    let hierarchy = load_hierarchy(options.hierarchy.as_ref())?;
    let manager = LockManager::new(store, Arc::new(Anonymous))
        .with_config(options.config.clone())
        .with_hierarchy(Arc::new(hierarchy));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        manager,
        api_key: options.api_key.filter(|k| !k.is_empty()),
        shutdown: shutdown_rx,
    };

    if state.api_key.is_some() {
        tracing::info!("🔐 API key authentication enabled");
    } else {
        tracing::warn!("⚠️  No LOCKING_API_KEY set — server is open (dev mode)");
    }

    let app = router(state);
    let addr = format!("{}:{}", options.host, options.port);
    tracing::info!(
        expiration_seconds = options.config.expiration_seconds,
        retry_timeout_seconds = options.config.retry_timeout_seconds,
        "🔒 Lock server starting on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl+C, cancelling pending acquisitions");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        // Protected routes
        .route("/locks", get(list_locks).post(acquire_lock).delete(release_locks))
        .route("/locks/expired", get(list_expired_locks))
        .route("/locks/mine", delete(release_all_locks))
        .route("/locks/refresh", post(refresh_locks))
        .route("/entities/{id}/locked", get(is_locked))
        .route("/entities/{id}/locks", delete(release_entity_locks))
        .route("/entities/{id}/parent-locks", post(lock_parent_sequence))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key is configured, allow all requests (dev mode)
    let Some(expected_key) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    // Always allow health check without auth
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("🚫 Unauthorized request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T: serde::Serialize>(status: StatusCode, data: T) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::ok(data))))
}

async fn health(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    let active_locks = state.manager.get_locks(None, None, None)?.len();
    ok(
        StatusCode::OK,
        HealthResponse {
            status: "ok".to_string(),
            active_locks,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}

async fn list_locks(
    State(state): State<AppState>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Vec<LockInfo>> {
    let lock_type = parse_lock_type(query.lock_type.as_deref())?;
    let locks = state.manager.get_locks(
        query.entity_id.map(EntityId),
        query.holder_id.filter(|h| !h.is_empty()).map(HolderId),
        lock_type,
    )?;
    ok(StatusCode::OK, locks.into_iter().map(LockInfo::from).collect())
}

async fn list_expired_locks(
    State(state): State<AppState>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Vec<LockInfo>> {
    let locks = state
        .manager
        .get_expired_locks(query.entity_id.map(EntityId))?;
    ok(StatusCode::OK, locks.into_iter().map(LockInfo::from).collect())
}

async fn is_locked(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<LockTypeQuery>,
) -> ApiResult<LockedResponse> {
    let lock_type = parse_lock_type(query.lock_type.as_deref())?;
    let locked = state.manager.is_locked(EntityId(id), lock_type)?;
    ok(
        StatusCode::OK,
        LockedResponse {
            entity_id: id,
            locked,
        },
    )
}

async fn acquire_lock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AcquireLockRequest>,
) -> ApiResult<AcquiredResponse> {
    let lock_type: LockType = req.validate()?;
    let manager = state.manager_for(&headers);
    let entity_id = EntityId(req.entity_id);

    let lock_id = manager
        .acquire_lock_with_cancel(
            entity_id,
            lock_type,
            req.expiration_seconds,
            req.retry_timeout_seconds,
            shutdown_requested(state.shutdown.clone()),
        )
        .await?;

    tracing::info!(lock_id = %lock_id, entity_id = %entity_id, %lock_type, "Lock acquired");
    ok(
        StatusCode::CREATED,
        AcquiredResponse {
            lock_id: lock_id.0,
            entity_id: req.entity_id,
            lock_type,
        },
    )
}

async fn release_locks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReleaseLocksRequest>,
) -> ApiResult<CountResponse> {
    let ids = req.lock_ids.into_iter().map(LockId);
    let count = state.manager_for(&headers).release_locks(ids)?;
    tracing::info!(released = count, "Locks released");
    ok(StatusCode::OK, CountResponse { count })
}

async fn release_all_locks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<CountResponse> {
    let count = state.manager_for(&headers).release_all_locks()?;
    tracing::info!(released = count, "All holder locks released");
    ok(StatusCode::OK, CountResponse { count })
}

async fn release_entity_locks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Query(query): Query<LockTypeQuery>,
) -> ApiResult<CountResponse> {
    let lock_type = parse_lock_type(query.lock_type.as_deref())?;
    let count = state
        .manager_for(&headers)
        .release_locks_by_entity_id(EntityId(id), lock_type)?;
    tracing::info!(entity_id = id, released = count, "Entity locks released");
    ok(StatusCode::OK, CountResponse { count })
}

async fn refresh_locks(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshLocksRequest>>,
) -> ApiResult<CountResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    check_seconds("expiration_seconds", req.expiration_seconds, 1)?;
    let count = state
        .manager_for(&headers)
        .refresh_locks(req.expiration_seconds)?;
    ok(StatusCode::OK, CountResponse { count })
}

async fn lock_parent_sequence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<LockIdsResponse> {
    let lock_ids = state
        .manager_for(&headers)
        .read_lock_parent_sequence_with_cancel(
            EntityId(id),
            shutdown_requested(state.shutdown.clone()),
        )
        .await?;
    tracing::info!(entity_id = id, locks = lock_ids.len(), "Ancestors read-locked");
    ok(
        StatusCode::CREATED,
        LockIdsResponse {
            lock_ids: lock_ids.into_iter().map(|id| id.0).collect(),
        },
    )
}

/// Resolves once shutdown starts. A dropped sender never resolves.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ─── Storage & Hierarchy ────────────────────────────────────────────────────

pub fn create_store(storage: &str) -> Result<Arc<dyn LockStore>, ServerError> {
    if storage == "memory" {
        tracing::info!("💾 Storage backend: in-memory (locks are local to this process)");
        Ok(Arc::new(InMemoryLockStore::new()))
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!("💾 Storage backend: SQLite ({})", path);
            let store = locking_core::infrastructure_sqlite::SqliteLockStore::open(path)?;
            Ok(Arc::new(crate::blocking::BlockingStore::new(store)))
        }
        #[cfg(not(feature = "sqlite"))]
        {
            let _ = path;
            Err(ServerError::SqliteDisabled)
        }
    } else {
        Err(ServerError::UnknownStorage(storage.to_string()))
    }
}

fn load_hierarchy(path: Option<&PathBuf>) -> Result<ParentMap, ServerError> {
    let Some(path) = path else {
        tracing::info!("No hierarchy file given; ancestor locking will report unknown entities");
        return Ok(ParentMap::new());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ServerError::HierarchyIo {
        path: path.clone(),
        source,
    })?;
    let map: ParentMap = serde_json::from_str(&raw).map_err(|source| ServerError::HierarchyJson {
        path: path.clone(),
        source,
    })?;
    tracing::info!(entities = map.len(), "Loaded entity hierarchy from {}", path.display());
    Ok(map)
}
