//! The aggregation orchestrator: one fetch cycle over all enabled sources.
//!
//! Fetches fan out with bounded concurrency; each source's outcome is
//! reconciled against the store as soon as it completes, independently of
//! its siblings. A single source failing (network, parse, or store)
//! never aborts the cycle; it lands in the per-source report instead.
//!
//! The merged result ordering comes solely from the store's query, so
//! fetch completion order never leaks into what the caller sees.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::defaults::SeedSource;
use crate::feed::{fetch_source, parse_feed, FetchOutcome, Validators, DEFAULT_REQUEST_TIMEOUT};
use crate::storage::{Database, FetchStatus, Item, Source, StoreError};

/// Default bound on in-flight fetches.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Knobs for one store-backed fetch cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Keep only items whose effective timestamp is at or after this.
    pub since: Option<DateTime<Utc>>,
    /// Keep only items from sources in this category.
    pub category: Option<String>,
    /// Cap on returned items.
    pub limit: Option<u32>,
    /// Maximum concurrent fetches.
    pub concurrency: usize,
    /// Per-request timeout; exceeding it is a transient failure.
    pub request_timeout: Duration,
    /// Optional whole-cycle deadline. Sources still in flight when it
    /// expires are reported as transient failures; sources already
    /// committed stay committed.
    pub deadline: Option<Duration>,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            since: None,
            category: None,
            limit: None,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            deadline: None,
        }
    }
}

/// How one source fared during a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: i64,
    pub url: String,
    pub status: FetchStatus,
    /// Failure reason, when there is one.
    pub detail: Option<String>,
    pub created: usize,
    pub updated: usize,
}

/// Everything a cycle produces: the merged, filtered item view plus one
/// report entry per attempted source; never a silent partial success.
#[derive(Debug, Serialize)]
pub struct CycleOutcome {
    pub items: Vec<Item>,
    pub report: Vec<SourceReport>,
}

/// Runs one full fetch cycle: load enabled sources, fetch each under the
/// concurrency bound, reconcile outcomes through the store, then answer
/// the caller's query over the accumulated history.
///
/// # Errors
///
/// Only store-wide failures (listing sources, running the final query)
/// surface here; per-source trouble is reported, not raised.
pub async fn run_cycle(
    db: &Database,
    client: &reqwest::Client,
    opts: &CycleOptions,
) -> Result<CycleOutcome, StoreError> {
    let sources = db.list_sources(true).await?;
    if sources.is_empty() {
        tracing::info!("No enabled sources; nothing to fetch");
    }

    let deadline = opts.deadline.map(|d| tokio::time::Instant::now() + d);

    let report: Vec<SourceReport> = stream::iter(sources)
        .map(|source| {
            let db = db.clone();
            let client = client.clone();
            let request_timeout = opts.request_timeout;
            async move {
                let work = reconcile_source(&db, &client, &source, request_timeout);
                match deadline {
                    Some(at) => match tokio::time::timeout_at(at, work).await {
                        Ok(report) => report,
                        Err(_) => SourceReport {
                            source_id: source.id,
                            url: source.url.clone(),
                            status: FetchStatus::TransientError,
                            detail: Some("cycle deadline exceeded".into()),
                            created: 0,
                            updated: 0,
                        },
                    },
                    None => work.await,
                }
            }
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    let items = db
        .query_items(opts.since, opts.category.as_deref(), opts.limit)
        .await?;

    Ok(CycleOutcome { items, report })
}

/// Applies one source's fetch outcome to the store.
///
/// The fresh path parses and commits items together with the new
/// validators in a single transaction; every other path only records
/// bookkeeping.
async fn reconcile_source(
    db: &Database,
    client: &reqwest::Client,
    source: &Source,
    request_timeout: Duration,
) -> SourceReport {
    let validators = Validators {
        etag: source.etag.clone(),
        last_modified: source.last_modified.clone(),
    };

    let mut report = SourceReport {
        source_id: source.id,
        url: source.url.clone(),
        status: FetchStatus::TransientError,
        detail: None,
        created: 0,
        updated: 0,
    };

    match fetch_source(client, &source.url, &validators, request_timeout).await {
        FetchOutcome::Fresh {
            body,
            content_type,
            etag,
            last_modified,
        } => match parse_feed(&body, content_type.as_deref()) {
            Ok(items) => {
                match db
                    .complete_source_refresh(
                        source.id,
                        etag.as_deref(),
                        last_modified.as_deref(),
                        &items,
                    )
                    .await
                {
                    Ok(stats) => {
                        tracing::debug!(
                            source_id = source.id,
                            url = %source.url,
                            created = stats.created,
                            updated = stats.updated,
                            "Source refreshed"
                        );
                        report.status = FetchStatus::Fresh;
                        report.created = stats.created;
                        report.updated = stats.updated;
                    }
                    Err(e) => {
                        tracing::warn!(
                            source_id = source.id,
                            url = %source.url,
                            error = %e,
                            "Store rejected source refresh"
                        );
                        report.status = FetchStatus::StoreError;
                        report.detail = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    source_id = source.id,
                    url = %source.url,
                    error = %e,
                    "Feed unparseable, skipping for this cycle"
                );
                record_outcome(db, source.id, FetchStatus::ParseError, &mut report).await;
                report.detail = Some(e.to_string());
            }
        },
        FetchOutcome::NotModified => {
            record_outcome(db, source.id, FetchStatus::NotModified, &mut report).await;
        }
        FetchOutcome::TransientFailure(reason) => {
            tracing::warn!(source_id = source.id, url = %source.url, reason = %reason, "Fetch failed (transient)");
            record_outcome(db, source.id, FetchStatus::TransientError, &mut report).await;
            report.detail = Some(reason);
        }
        FetchOutcome::PermanentFailure(reason) => {
            tracing::warn!(source_id = source.id, url = %source.url, reason = %reason, "Fetch failed (permanent)");
            record_outcome(db, source.id, FetchStatus::PermanentError, &mut report).await;
            report.detail = Some(reason);
        }
    }

    report
}

/// Best-effort bookkeeping write for the non-fresh paths. A failure here
/// is logged and left out of the report: the fetch status is still the
/// more useful signal.
async fn record_outcome(
    db: &Database,
    source_id: i64,
    status: FetchStatus,
    report: &mut SourceReport,
) {
    report.status = status;
    if let Err(e) = db.record_fetch_outcome(source_id, status).await {
        tracing::warn!(source_id, error = %e, "Failed to record fetch outcome");
    }
}

// ============================================================================
// File-source mode
// ============================================================================

/// Knobs for the one-shot file-source pass.
#[derive(Debug, Clone)]
pub struct FileCycleOptions {
    pub since: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub concurrency: usize,
    pub request_timeout: Duration,
}

impl Default for FileCycleOptions {
    fn default() -> Self {
        Self {
            since: None,
            category: None,
            limit: None,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// An item produced by the file-source pass. Ephemeral: nothing here has
/// touched a store.
#[derive(Debug, Clone, Serialize)]
pub struct FileItem {
    /// Display name: the source's label, or its host when unlabeled.
    pub source: String,
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: Option<i64>,
}

/// One-shot aggregation over a declarative source list.
///
/// Deliberately a separate code path from [`run_cycle`]: no persistence,
/// no validators, no conditional requests. Every listed source gets one
/// unconditional fetch-and-parse, failures are logged and skipped, and
/// deduplication is an in-memory first-wins pass over this run only.
pub async fn run_file_cycle(
    client: &reqwest::Client,
    sources: &[SeedSource],
    opts: &FileCycleOptions,
) -> Vec<FileItem> {
    let selected: Vec<SeedSource> = sources
        .iter()
        .filter(|s| {
            opts.category
                .as_deref()
                .map_or(true, |category| s.category == category)
        })
        .cloned()
        .collect();

    let fetched: Vec<Option<(String, Vec<crate::feed::ParsedItem>)>> = stream::iter(selected)
        .map(|source| {
            let client = client.clone();
            let request_timeout = opts.request_timeout;
            async move {
                match fetch_source(&client, &source.url, &Validators::default(), request_timeout)
                    .await
                {
                    FetchOutcome::Fresh {
                        body, content_type, ..
                    } => match parse_feed(&body, content_type.as_deref()) {
                        Ok(items) => Some((source_name(&source), items)),
                        Err(e) => {
                            tracing::warn!(url = %source.url, error = %e, "Feed unparseable, skipping");
                            None
                        }
                    },
                    FetchOutcome::NotModified => None,
                    FetchOutcome::TransientFailure(reason)
                    | FetchOutcome::PermanentFailure(reason) => {
                        tracing::warn!(url = %source.url, reason = %reason, "Fetch failed, skipping");
                        None
                    }
                }
            }
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<FileItem> = Vec::new();
    for (name, items) in fetched.into_iter().flatten() {
        for item in items {
            if seen.insert(item.dedup_key) {
                out.push(FileItem {
                    source: name.clone(),
                    title: item.title,
                    link: item.link,
                    summary: item.summary,
                    published: item.published,
                });
            }
        }
    }

    // Undated items pass the window filter: better to over-show than to
    // silently drop entries whose feed carried no dates.
    if let Some(cutoff) = opts.since {
        let cutoff = cutoff.timestamp();
        out.retain(|item| item.published.map_or(true, |ts| ts >= cutoff));
    }

    // Dated items newest-first, undated ones after all dated ones.
    out.sort_by_key(|item| match item.published {
        Some(ts) => (0, -ts),
        None => (1, 0),
    });

    if let Some(limit) = opts.limit {
        out.truncate(limit);
    }

    out
}

fn source_name(source: &SeedSource) -> String {
    if let Some(label) = &source.label {
        return label.clone();
    }
    Url::parse(&source.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| source.url.clone())
}
