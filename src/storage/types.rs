use serde::Serialize;
use sqlx::FromRow;
use std::fmt;

/// A configured feed origin.
///
/// The identifier is unique and immutable once assigned. The fetch cycle
/// only ever touches the validator and bookkeeping fields (`etag`,
/// `last_modified`, `last_status`, `last_fetch_at`); everything else
/// changes by explicit edit alone.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub label: Option<String>,
    pub category: Option<String>,
    pub enabled: bool,
    /// Last-known ETag, replayed as `If-None-Match`.
    pub etag: Option<String>,
    /// Last-known Last-Modified, replayed as `If-Modified-Since`.
    pub last_modified: Option<String>,
    pub last_status: Option<FetchStatus>,
    /// Unix seconds of the last fetch attempt, successful or not.
    pub last_fetch_at: Option<i64>,
}

/// A single entry discovered in a source's feed.
///
/// `(source_id, dedup_key)` is unique; `first_seen` never changes after
/// insertion, `last_seen` advances on every re-appearance.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Item {
    pub id: i64,
    pub source_id: i64,
    pub dedup_key: String,
    pub title: String,
    pub summary: Option<String>,
    pub link: Option<String>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// How a source's most recent reconciliation ended. Persisted as text in
/// `sources.last_status` and reported per source after every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// 2xx with a parseable body; items were reconciled.
    Fresh,
    /// 304: nothing fetched, nothing parsed, items untouched.
    NotModified,
    /// Network/timeout/5xx. Retried on the next cycle.
    TransientError,
    /// 4xx or malformed URL. Not retried automatically.
    PermanentError,
    /// Body fetched but unusable as RSS or Atom; skipped for this cycle.
    ParseError,
    /// The store refused this source's write; other sources unaffected.
    StoreError,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchStatus::Fresh => "fresh",
            FetchStatus::NotModified => "not_modified",
            FetchStatus::TransientError => "transient_error",
            FetchStatus::PermanentError => "permanent_error",
            FetchStatus::ParseError => "parse_error",
            FetchStatus::StoreError => "store_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(FetchStatus::Fresh),
            "not_modified" => Some(FetchStatus::NotModified),
            "transient_error" => Some(FetchStatus::TransientError),
            "permanent_error" => Some(FetchStatus::PermanentError),
            "parse_error" => Some(FetchStatus::ParseError),
            "store_error" => Some(FetchStatus::StoreError),
            _ => None,
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts returned by an item upsert: rows created vs rows refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertStats {
    pub created: usize,
    pub updated: usize,
}

/// Internal row type for source queries; `last_status` arrives as text.
#[derive(Debug, FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub url: String,
    pub label: Option<String>,
    pub category: Option<String>,
    pub enabled: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_status: Option<String>,
    pub last_fetch_at: Option<i64>,
}

impl SourceRow {
    pub(crate) fn into_source(self) -> Source {
        Source {
            id: self.id,
            url: self.url,
            label: self.label,
            category: self.category,
            enabled: self.enabled,
            etag: self.etag,
            last_modified: self.last_modified,
            last_status: self.last_status.as_deref().and_then(FetchStatus::parse),
            last_fetch_at: self.last_fetch_at,
        }
    }
}
