//! Database connection and schema management.
//!
//! Thin wrapper around a `sqlx` SQLite pool: enables WAL mode, sets a busy
//! timeout so concurrent workers back off instead of failing immediately, and
//! runs migrations on startup.

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Maximum number of pooled connections. SQLite uses file-level locking, so a
/// large pool just adds contention.
const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// How long a connection waits for `SQLITE_BUSY` to clear before giving up.
const BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled SQLite connection shared by every `Store`/`Queue` operation.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`, enables WAL mode
    /// and runs pending migrations.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. Each call produces an independent catalog.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.0.to_lowercase() == "wal")
    }

    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn migrations_create_stage_tables() {
        let db = Database::new_in_memory().await.unwrap();
        for table in ["raw", "enriched", "downloaded", "failed_enrichment", "failed_download"] {
            let result = sqlx::query(&format!("SELECT id FROM {table} LIMIT 1"))
                .fetch_optional(db.pool())
                .await;
            assert!(result.is_ok(), "table {table} should exist after migration");
        }
    }

    #[tokio::test]
    async fn on_disk_database_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("catalog.db");
        let db = Database::new(&db_path).await.unwrap();
        assert!(db.is_wal_enabled().await.unwrap());
    }
}
