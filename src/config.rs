//! Configuration file parser for ~/.config/tributary/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are silently ignored by serde.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite database file.
    pub db_path: String,

    /// Maximum concurrent fetches per cycle.
    pub concurrency: usize,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Optional whole-cycle deadline in seconds. Unset = no deadline.
    pub cycle_deadline_secs: Option<u64>,

    /// User-Agent header sent with every fetch.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/feeds.db".to_string(),
            concurrency: 8,
            request_timeout_secs: 20,
            cycle_deadline_secs: None,
            user_agent: concat!("tributary/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with location info
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.db_path, "data/feeds.db");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.cycle_deadline_secs, None);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = 2\ndb_path = \"/tmp/test.db\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.request_timeout_secs, 20);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = [broken").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
