//! Shared-store admission backend
//!
//! Each admitted request leaves a timestamped marker row. A check prunes the
//! key's markers older than the window, counts what is left and, when there
//! is room, adds a marker and pushes the key's expiry out by one window. All
//! of that happens in one write transaction, so processes sharing the file
//! cannot both take the last slot.

use super::{AdmissionBackend, Decision};
use crate::error::{DatabaseError, Error, Result};
use async_trait::async_trait;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Sliding-window marker store shared between processes
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Prune, count and conditionally record one request for `key`
    ///
    /// Returns the number of markers in the window before this request. A
    /// marker is added only when that number is below `limit`.
    async fn record(&self, key: &str, limit: u32, window: Duration) -> Result<u32>;
}

/// [`AdmissionBackend`] over a [`CounterStore`]
pub struct StoreBackend {
    store: Arc<dyn CounterStore>,
    requests_max: u32,
    window: Duration,
}

impl StoreBackend {
    /// Wrap a store with the limit it should enforce
    pub fn new(store: Arc<dyn CounterStore>, requests_max: u32, window: Duration) -> Self {
        Self {
            store,
            requests_max,
            window,
        }
    }
}

#[async_trait]
impl AdmissionBackend for StoreBackend {
    async fn check(&self, key: &str) -> Result<Decision> {
        let store_key = format!("rate_limit:{key}");
        let count = self
            .store
            .record(&store_key, self.requests_max, self.window)
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        Ok(Decision {
            allowed: count < self.requests_max,
            count,
        })
    }

    fn name(&self) -> &'static str {
        "store"
    }
}

/// [`CounterStore`] backed by a SQLite file
#[derive(Clone, Debug)]
pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    /// Open (creating if needed) the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_markers (
                id INTEGER PRIMARY KEY,
                key TEXT NOT NULL,
                marked_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_rate_limit_markers_key ON rate_limit_markers(key, marked_at_ms)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create rate limit schema: {}",
                        e
                    )))
                })?;
        }
        Ok(())
    }

    /// Markers currently stored for `key`, expired ones included
    pub async fn marker_count(&self, key: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rate_limit_markers WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count markers: {}",
                    e
                )))
            })?;
        Ok(count)
    }

    async fn record_in(
        conn: &mut SqliteConnection,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<u32> {
        // Drop this key's markers outside the window and any idle key past its expiry
        sqlx::query(
            "DELETE FROM rate_limit_markers WHERE (key = ? AND marked_at_ms <= ?) OR expires_at_ms <= ?",
        )
        .bind(key)
        .bind(now_ms.saturating_sub(window_ms))
        .bind(now_ms)
        .execute(&mut *conn)
        .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rate_limit_markers WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        let count = u32::try_from(count).unwrap_or(u32::MAX);

        if count < limit {
            let expires_at_ms = now_ms.saturating_add(window_ms);
            sqlx::query(
                "INSERT INTO rate_limit_markers (key, marked_at_ms, expires_at_ms) VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(now_ms)
            .bind(expires_at_ms)
            .execute(&mut *conn)
            .await?;

            sqlx::query("UPDATE rate_limit_markers SET expires_at_ms = ? WHERE key = ?")
                .bind(expires_at_ms)
                .bind(key)
                .execute(&mut *conn)
                .await?;
        }

        Ok(count)
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn record(&self, key: &str, limit: u32, window: Duration) -> Result<u32> {
        let pool = self.pool.clone();
        let key = key.to_string();

        // The transaction runs on its own task so it always reaches COMMIT or
        // ROLLBACK, even when the caller is dropped mid-check.
        tokio::spawn(async move { Self::record_locked(&pool, &key, limit, window).await })
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Admission check task failed: {}",
                    e
                )))
            })?
    }
}

impl SqliteCounterStore {
    async fn record_locked(
        pool: &SqlitePool,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<u32> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let mut conn = pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        // IMMEDIATE takes the write lock before the count is read
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = Self::record_in(&mut *conn, key, limit, window_ms, now_ms).await;

        let finish = match &result {
            Ok(_) => "COMMIT",
            Err(_) => "ROLLBACK",
        };
        if let Err(e) = sqlx::query(finish).execute(&mut *conn).await {
            tracing::warn!(statement = finish, error = %e, "closing admission store connection");
            // never hand a connection with an open transaction back to the pool
            drop(conn.detach());
            return Err(Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to finish admission check: {}",
                e
            ))));
        }

        result
    }
}
