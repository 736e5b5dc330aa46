//! Embedded persistence: sources, items, and per-source cache validators.
//!
//! Built on async SQLite via `sqlx`. All mutations belonging to a single
//! source's fetch outcome are applied inside one transaction, so a crash
//! mid-cycle can never leave a source's validators updated without its
//! items or vice versa.

mod items;
mod schema;
mod sources;
mod types;

pub use schema::Database;
pub use types::{FetchStatus, Item, Source, UpsertStats};

use thiserror::Error;

/// Storage-layer failures.
///
/// `Open` and `Migration` are fatal to the whole run; `Query` aborts only
/// the reconciliation it occurred in.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("database migration failed: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),
}
