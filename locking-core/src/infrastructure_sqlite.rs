//! SQLite-backed LockStore implementation.
//! Lets several processes coordinate through one database file.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! locking-core = { path = "../locking-core", features = ["sqlite"] }
//! ```

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::conflict::{ConflictEngine, ConflictResult};
use crate::infrastructure::{LockStore, StoreError};
use crate::types::*;

const SELECT_COLUMNS: &str = "SELECT id, holder_id, entity_id, lock_type, expires_at FROM locks";

/// A persistent lock store backed by SQLite.
///
/// Uses WAL mode for concurrent read performance. Acquisitions run in
/// `BEGIN IMMEDIATE` transactions: the write lock is taken before the
/// conflict check, so competing acquirers are serialized even when they
/// live in different processes.
pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

/// Row as stored, before type validation
struct RawLock {
    id: String,
    holder_id: String,
    entity_id: i64,
    lock_type: String,
    expires_at: i64,
}

impl SqliteLockStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Competing writers wait on each other instead of failing with SQLITE_BUSY
        conn.busy_timeout(Duration::from_secs(5))?;
        // Enable WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                id          TEXT PRIMARY KEY,
                holder_id   TEXT NOT NULL,
                entity_id   INTEGER NOT NULL,
                lock_type   TEXT NOT NULL,
                expires_at  INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_locks_entity ON locks(entity_id, expires_at);
            CREATE INDEX IF NOT EXISTS idx_locks_holder ON locks(holder_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Timestamps saturate at `i64::MAX`, which keeps their ordering.
    fn to_sql_int(value: u64) -> Value {
        Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }

    /// Entity ids are stored bit-for-bit, so every `u64` keeps its own row key.
    fn entity_to_sql(entity_id: EntityId) -> Value {
        Value::Integer(entity_id.0 as i64)
    }

    /// Translate a filter into a WHERE clause plus its positional parameters.
    fn where_clause(filter: &LockFilter, now: u64) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        match filter.activity {
            Activity::Active => {
                clauses.push("expires_at > ?".to_string());
                values.push(Self::to_sql_int(now));
            }
            Activity::Expired => {
                clauses.push("expires_at <= ?".to_string());
                values.push(Self::to_sql_int(now));
            }
            Activity::Any => {}
        }

        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                clauses.push("0".to_string());
            } else {
                let marks = vec!["?"; ids.len()].join(", ");
                clauses.push(format!("id IN ({})", marks));
                values.extend(ids.iter().map(|id| Value::Text(id.0.clone())));
            }
        }
        if let Some(entity_id) = filter.entity_id {
            clauses.push("entity_id = ?".to_string());
            values.push(Self::entity_to_sql(entity_id));
        }
        if let Some(holder_id) = &filter.holder_id {
            clauses.push("holder_id = ?".to_string());
            values.push(Value::Text(holder_id.0.clone()));
        }
        if let Some(lock_type) = filter.lock_type {
            clauses.push("lock_type = ?".to_string());
            values.push(Value::Text(lock_type.as_str().to_string()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }

    fn select(
        conn: &Connection,
        filter: &LockFilter,
        now: u64,
    ) -> Result<Vec<Lock>, StoreError> {
        let (clause, values) = Self::where_clause(filter, now);
        let mut stmt = conn.prepare(&format!("{}{}", SELECT_COLUMNS, clause))?;
        let raw = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(RawLock {
                    id: row.get(0)?,
                    holder_id: row.get(1)?,
                    entity_id: row.get(2)?,
                    lock_type: row.get(3)?,
                    expires_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter().map(Self::raw_to_lock).collect()
    }

    fn raw_to_lock(raw: RawLock) -> Result<Lock, StoreError> {
        let corrupt = |message: String| StoreError::Corrupt {
            id: raw.id.clone(),
            message,
        };
        let lock_type = raw.lock_type.parse::<LockType>().map_err(corrupt)?;
        let expires_at = u64::try_from(raw.expires_at)
            .map_err(|_| corrupt(format!("negative expires_at {}", raw.expires_at)))?;

        Ok(Lock {
            id: LockId(raw.id.clone()),
            holder_id: HolderId(raw.holder_id.clone()),
            entity_id: EntityId(raw.entity_id as u64),
            lock_type,
            expires_at,
        })
    }
}

impl LockStore for SqliteLockStore {
    fn create(&self, draft: LockDraft, now: u64) -> Result<Acquisition, StoreError> {
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::select(&tx, &LockFilter::active().entity(draft.entity_id), now)?;
        if let ConflictResult::Conflict { blocking } = ConflictEngine::check(
            &draft.holder_id,
            draft.entity_id,
            draft.lock_type,
            &existing,
            now,
        ) {
            // Dropping the transaction rolls it back
            return Ok(Acquisition::Conflict(blocking));
        }

        let lock = Lock::from_draft(LockId::generate(), draft);
        tx.execute(
            "INSERT INTO locks (id, holder_id, entity_id, lock_type, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                lock.id.0,
                lock.holder_id.0,
                Self::entity_to_sql(lock.entity_id),
                lock.lock_type.as_str(),
                Self::to_sql_int(lock.expires_at),
            ],
        )?;
        tx.commit()?;

        Ok(Acquisition::Created(lock))
    }

    fn query(&self, filter: &LockFilter, now: u64) -> Result<Vec<Lock>, StoreError> {
        Self::select(&self.connection(), filter, now)
    }

    fn delete(&self, filter: &LockFilter, now: u64) -> Result<usize, StoreError> {
        let (clause, values) = Self::where_clause(filter, now);
        let rows = self
            .connection()
            .execute(&format!("DELETE FROM locks{}", clause), params_from_iter(values))?;
        Ok(rows)
    }

    fn update_expiry(
        &self,
        filter: &LockFilter,
        expires_at: u64,
        now: u64,
    ) -> Result<usize, StoreError> {
        let (clause, filter_values) = Self::where_clause(filter, now);
        let mut values = vec![Self::to_sql_int(expires_at)];
        values.extend(filter_values);
        let rows = self.connection().execute(
            &format!("UPDATE locks SET expires_at = ?{}", clause),
            params_from_iter(values),
        )?;
        Ok(rows)
    }
}
