//! tributary: a personal feed-aggregation engine.
//!
//! Fetches RSS/Atom sources over HTTP with conditional caching
//! (ETag/Last-Modified), normalizes both dialects into one item model,
//! deduplicates into an embedded SQLite store, and answers time-windowed,
//! category-filtered queries over the accumulated history.
//!
//! The crate is organized around four pieces:
//!
//! - [`feed::parser`] - RSS 2.0 / Atom 1.0 payloads into normalized items
//! - [`feed::fetcher`] - conditional GET with outcome classification
//! - [`storage`] - sources, items, and cache validators in SQLite
//! - [`cycle`] - one bounded-concurrency fetch cycle over all enabled sources
//!
//! The `tributary` binary is thin glue over this surface: subcommand
//! dispatch and text/JSON rendering.

pub mod config;
pub mod cycle;
pub mod defaults;
pub mod feed;
pub mod storage;

pub use cycle::{
    run_cycle, run_file_cycle, CycleOptions, CycleOutcome, FileCycleOptions, FileItem,
    SourceReport,
};
pub use defaults::SeedSource;
pub use feed::{build_client, fetch_source, parse_feed, FetchOutcome, ParseError, ParsedItem, Validators};
pub use storage::{Database, FetchStatus, Item, Source, StoreError, UpsertStats};
