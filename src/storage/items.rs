use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::schema::Database;
use super::types::{FetchStatus, Item, UpsertStats};
use super::StoreError;
use crate::feed::ParsedItem;

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Upserts parsed candidates for a source in one transaction.
    ///
    /// A candidate whose `(source_id, dedup_key)` is absent becomes a new
    /// row; an existing one gets its mutable fields refreshed and its
    /// last-seen timestamp advanced. `first_seen` is never rewritten. An
    /// empty candidate set is a no-op.
    pub async fn upsert_items(
        &self,
        source_id: i64,
        items: &[ParsedItem],
    ) -> Result<UpsertStats, StoreError> {
        if items.is_empty() {
            return Ok(UpsertStats::default());
        }
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let stats = upsert_items_tx(&mut tx, source_id, items, now).await?;
        tx.commit().await?;
        Ok(stats)
    }

    /// Applies a fresh fetch atomically: item upsert, new cache validators,
    /// and fetch bookkeeping all land in the same transaction, so a crash
    /// can never record validators without their items or vice versa.
    pub async fn complete_source_refresh(
        &self,
        source_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
        items: &[ParsedItem],
    ) -> Result<UpsertStats, StoreError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let stats = upsert_items_tx(&mut tx, source_id, items, now).await?;

        sqlx::query(
            "UPDATE sources SET etag = ?, last_modified = ?, last_status = ?, last_fetch_at = ?
             WHERE id = ?",
        )
        .bind(etag)
        .bind(last_modified)
        .bind(FetchStatus::Fresh.as_str())
        .bind(now)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stats)
    }

    /// Time/category-filtered read over accumulated items, newest first.
    ///
    /// Both the filter and the ordering use the effective timestamp
    /// `COALESCE(published, first_seen)`; ties break on
    /// `(source_id, dedup_key)` so results are deterministic regardless of
    /// ingestion order.
    pub async fn query_items(
        &self,
        since: Option<DateTime<Utc>>,
        category: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Item>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT i.id, i.source_id, i.dedup_key, i.title, i.summary, i.link, \
             i.published, i.updated, i.first_seen, i.last_seen \
             FROM items i JOIN sources s ON s.id = i.source_id WHERE 1 = 1",
        );

        if let Some(cutoff) = since {
            builder.push(" AND COALESCE(i.published, i.first_seen) >= ");
            builder.push_bind(cutoff.timestamp());
        }
        if let Some(category) = category {
            builder.push(" AND s.category = ");
            builder.push_bind(category);
        }

        builder.push(
            " ORDER BY COALESCE(i.published, i.first_seen) DESC, i.source_id ASC, i.dedup_key ASC",
        );
        if let Some(limit) = limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }

        let items = builder
            .build_query_as::<Item>()
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }
}

/// Shared upsert body, run inside the caller's transaction.
///
/// Two-phase per candidate: INSERT OR IGNORE first (counts creations
/// exactly), then an UPDATE of mutable fields for candidates that already
/// existed. The UPDATE never touches `first_seen`.
async fn upsert_items_tx(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: i64,
    items: &[ParsedItem],
    now: i64,
) -> Result<UpsertStats, sqlx::Error> {
    let mut stats = UpsertStats::default();

    for item in items {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items
                (source_id, dedup_key, title, summary, link, published, updated, first_seen, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(source_id)
        .bind(&item.dedup_key)
        .bind(&item.title)
        .bind(&item.summary)
        .bind(&item.link)
        .bind(item.published)
        .bind(item.updated)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if inserted.rows_affected() > 0 {
            stats.created += 1;
        } else {
            sqlx::query(
                r#"
                UPDATE items SET
                    title = ?, summary = ?, link = ?, published = ?, updated = ?, last_seen = ?
                WHERE source_id = ? AND dedup_key = ?
            "#,
            )
            .bind(&item.title)
            .bind(&item.summary)
            .bind(&item.link)
            .bind(item.published)
            .bind(item.updated)
            .bind(now)
            .bind(source_id)
            .bind(&item.dedup_key)
            .execute(&mut **tx)
            .await?;
            stats.updated += 1;
        }
    }

    Ok(stats)
}
