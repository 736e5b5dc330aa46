use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use super::StoreError;

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) a database file and runs migrations.
    ///
    /// Pass `":memory:"` for a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when the file cannot be created or
    /// opened (e.g. unwritable path) and [`StoreError::Migration`] when the
    /// schema cannot be brought up to date. Both are fatal to the run.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Open(e.to_string()))?;
                }
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path);
        // busy_timeout: wait out transient lock contention from a concurrent
        // cycle instead of surfacing SQLITE_BUSY. Set via connect options so
        // every pooled connection inherits it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Open(e.to_string()))?
            .pragma("busy_timeout", "5000")
            .pragma("foreign_keys", "ON");

        // An in-memory database exists per connection; cap the pool at one
        // so every query sees the same data.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(e.to_string()))?;

        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Runs schema migrations atomically. All statements are `IF NOT
    /// EXISTS`, so re-running on an existing database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                label TEXT,
                category TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                etag TEXT,
                last_modified TEXT,
                last_status TEXT,
                last_fetch_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                dedup_key TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT,
                link TEXT,
                published INTEGER,
                updated INTEGER,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                UNIQUE(source_id, dedup_key)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source ON items(source_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published DESC)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
