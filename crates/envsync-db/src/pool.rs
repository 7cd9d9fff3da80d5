//! # Operation Store
//!
//! Opens the SQLite file holding SyncOperation and Conflict records.
//!
//! ```text
//! envsync serve
//!     │
//!     ▼
//! Database::new(DbConfig::new(store.database))
//!     │   create parent dirs, WAL, foreign keys, embedded migrations
//!     ▼
//! SqlitePool ──┬── operation task A ──► writes op A
//!              ├── operation task B ──► writes op B
//!              └── control API      ──► reads any op
//! ```
//!
//! Each operation record has exactly one writer (its run task), so the pool
//! needs no locking beyond SQLite's own. WAL keeps status reads from
//! blocking behind those writes.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::conflict::ConflictRepository;
use crate::repository::operation::OperationRepository;

const IN_MEMORY: &str = ":memory:";

/// Where and how to open the store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    /// A file-backed store; the file and its directory are created on open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 8,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// A private in-memory store, used by tests.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to one connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        if self.is_in_memory() {
            return SqliteConnectOptions::from_str("sqlite::memory:")
                .map(|options| options.foreign_keys(true))
                .map_err(|e| DbError::ConnectionFailed(e.to_string()));
        }

        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::ConnectionFailed(format!("{}: {}", parent.display(), e))
                })?;
            }
        }

        Ok(SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true))
    }
}

/// Handle to the operation store. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the store and brings its schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening operation store");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            // An idle in-memory connection must never be reaped with its data.
            .idle_timeout(None)
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        migrations::run_migrations(&pool).await?;
        info!(max_connections = config.max_connections, "Operation store ready");

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn operations(&self) -> OperationRepository {
        OperationRepository::new(self.pool.clone())
    }

    pub fn conflicts(&self) -> ConflictRepository {
        ConflictRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// True if the store answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
        assert_eq!(db.operations().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_database_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert!(db.health_check().await);
        assert!(path.exists());
        db.close().await;
    }

    #[test]
    fn test_config() {
        assert!(DbConfig::in_memory().is_in_memory());
        assert!(!DbConfig::new("/tmp/store.db").is_in_memory());
        assert_eq!(DbConfig::new("x.db").max_connections(0).max_connections, 1);
    }
}
