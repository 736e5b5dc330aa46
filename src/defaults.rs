//! Built-in seed sources and the declarative sources-file format.
//!
//! The built-in list exists so a fresh install has something to fetch; it
//! is copied into the store once at initialization and never consulted
//! again. The same shape doubles as the file-source mode's input: a JSON
//! object mapping category names to URL lists.

use std::collections::BTreeMap;
use std::path::Path;

/// A source known before the store gets involved: seed data or a
/// file-source entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSource {
    pub url: String,
    pub category: String,
    pub label: Option<String>,
}

impl SeedSource {
    fn new(url: &str, category: &str, label: &str) -> Self {
        Self {
            url: url.to_string(),
            category: category.to_string(),
            label: Some(label.to_string()),
        }
    }
}

/// A starter set of well-known feeds, grouped the way the sources file is.
pub fn builtin_sources() -> Vec<SeedSource> {
    vec![
        SeedSource::new(
            "https://feeds.bbci.co.uk/news/world/rss.xml",
            "news",
            "BBC World News",
        ),
        SeedSource::new(
            "https://www.theguardian.com/world/rss",
            "news",
            "The Guardian World News",
        ),
        SeedSource::new("https://hnrss.org/frontpage", "tech", "Hacker News"),
        SeedSource::new(
            "https://feeds.arstechnica.com/arstechnica/index",
            "tech",
            "Ars Technica",
        ),
        SeedSource::new("https://lobste.rs/rss", "tech", "Lobsters"),
        SeedSource::new(
            "https://www.quantamagazine.org/feed/",
            "science",
            "Quanta Magazine",
        ),
        SeedSource::new("https://www.nasa.gov/feed/", "science", "NASA"),
    ]
}

/// Loads a `{category: [urls]}` JSON sources file.
///
/// A missing, unreadable, or malformed file falls back to the built-in
/// list with a log line rather than failing the run; file-source mode is
/// meant for quick one-shot use.
pub fn load_sources_file(path: &Path) -> Vec<SeedSource> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "Sources file not found, using built-in list");
            return builtin_sources();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read sources file, using built-in list");
            return builtin_sources();
        }
    };

    match parse_sources_json(&content) {
        Ok(sources) if !sources.is_empty() => sources,
        Ok(_) => {
            tracing::info!(path = %path.display(), "Sources file is empty, using built-in list");
            builtin_sources()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse sources file, using built-in list");
            builtin_sources()
        }
    }
}

fn parse_sources_json(content: &str) -> Result<Vec<SeedSource>, serde_json::Error> {
    // BTreeMap keeps category order stable across runs.
    let map: BTreeMap<String, Vec<String>> = serde_json::from_str(content)?;
    Ok(map
        .into_iter()
        .flat_map(|(category, urls)| {
            urls.into_iter().map(move |url| SeedSource {
                url,
                category: category.clone(),
                label: None,
            })
        })
        .collect())
}
