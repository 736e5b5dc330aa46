use super::schema::Database;
use super::types::{FetchStatus, Source, SourceRow};
use super::StoreError;
use crate::defaults::SeedSource;

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Adds a source, returning its identifier.
    ///
    /// If the URL is already registered, the existing row is kept and only
    /// the provided `category`/`label` are updated; validators and
    /// bookkeeping survive re-adding a known source.
    pub async fn add_source(
        &self,
        url: &str,
        category: Option<&str>,
        label: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO sources (url, category, label) VALUES (?, ?, ?)",
        )
        .bind(url)
        .bind(category)
        .bind(label)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 && (category.is_some() || label.is_some()) {
            sqlx::query(
                "UPDATE sources SET category = COALESCE(?, category), label = COALESCE(?, label)
                 WHERE url = ?",
            )
            .bind(category)
            .bind(label)
            .bind(url)
            .execute(&mut *tx)
            .await?;
        }

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM sources WHERE url = ?")
            .bind(url)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Inserts or fully replaces a source by identifier (explicit edit
    /// path; the fetch cycle never calls this).
    pub async fn upsert_source(&self, source: &Source) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, url, label, category, enabled, etag, last_modified, last_status, last_fetch_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                label = excluded.label,
                category = excluded.category,
                enabled = excluded.enabled,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                last_status = excluded.last_status,
                last_fetch_at = excluded.last_fetch_at
        "#,
        )
        .bind(source.id)
        .bind(&source.url)
        .bind(&source.label)
        .bind(&source.category)
        .bind(source.enabled)
        .bind(&source.etag)
        .bind(&source.last_modified)
        .bind(source.last_status.map(FetchStatus::as_str))
        .bind(source.last_fetch_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lists sources ordered by (category, url) for stable output.
    pub async fn list_sources(&self, enabled_only: bool) -> Result<Vec<Source>, StoreError> {
        let sql = if enabled_only {
            "SELECT id, url, label, category, enabled, etag, last_modified, last_status, last_fetch_at
             FROM sources WHERE enabled = 1
             ORDER BY COALESCE(category, '') ASC, url ASC"
        } else {
            "SELECT id, url, label, category, enabled, etag, last_modified, last_status, last_fetch_at
             FROM sources
             ORDER BY COALESCE(category, '') ASC, url ASC"
        };

        let rows: Vec<SourceRow> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(SourceRow::into_source).collect())
    }

    /// Removes a source and (by cascade) its items. Returns whether a row
    /// was deleted.
    pub async fn remove_source(&self, source_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enables or disables a source. Returns whether a row was touched.
    pub async fn set_source_enabled(
        &self,
        source_id: i64,
        enabled: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE sources SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Seeds the built-in source list, but only into an empty table:
    /// subsequent runs read solely from the store. Returns the number of
    /// sources inserted (zero when the table was already populated).
    pub async fn seed_default_sources(&self, seeds: &[SeedSource]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(&mut *tx)
            .await?;
        if count > 0 {
            return Ok(0);
        }

        let mut inserted = 0usize;
        for seed in seeds {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO sources (url, category, label) VALUES (?, ?, ?)",
            )
            .bind(&seed.url)
            .bind(&seed.category)
            .bind(&seed.label)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Records the status and timestamp of a fetch attempt that produced no
    /// new content (not-modified or failed). Validators are left untouched;
    /// the fresh path updates them inside
    /// [`Database::complete_source_refresh`].
    pub async fn record_fetch_outcome(
        &self,
        source_id: i64,
        status: FetchStatus,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE sources SET last_status = ?, last_fetch_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
