//! Feed handling: parsing RSS/Atom payloads and fetching them over HTTP.
//!
//! - [`parser`] - dialect detection and normalization into [`parser::ParsedItem`]
//! - [`fetcher`] - conditional GET requests and outcome classification
//!
//! Parsing is a pure transformation; the fetcher's only side effect is the
//! network call itself. Neither touches the store; reconciliation lives in
//! [`crate::cycle`].

pub mod fetcher;
pub mod parser;

pub use fetcher::{build_client, fetch_source, FetchOutcome, Validators, DEFAULT_REQUEST_TIMEOUT};
pub use parser::{parse_feed, ParseError, ParsedItem};
