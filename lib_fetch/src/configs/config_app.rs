//! # Application Configuration
//!
//! The JSON document the daemon is started with. Every top-level field has a
//! default so a file that only lists `watchers` is valid; the server binary
//! merges command-line and environment overrides on top of what is loaded
//! here before calling [`AppConfig::validate`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::loggers::LogLevel;

/// Poll frequency (seconds) when neither the path nor the watcher sets one.
pub const DEFAULT_FREQUENCY_SECS: u64 = 60;

/// URL schemes a watcher can poll.
pub const SUPPORTED_SCHEMES: [&str; 3] = ["ftp", "http", "https"];

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid base URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Unknown file service type {0}. Must be one of [ftp,http,https].")]
    UnsupportedScheme(String),
    #[error("Path {path} has no files configured.")]
    NoFiles { path: String },
    #[error("Literal path {path} can only be used with one file, found {count}.")]
    LiteralNeedsOneFile { path: String, count: usize },
    #[error("Invalid file pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Unknown parser {key}. Must be one of [none,{}].", .known.join(","))]
    UnknownParser { key: String, known: Vec<String> },
    #[error("Frequency for {context} must be greater than zero.")]
    ZeroFrequency { context: String },
    #[error("Cannot build HTTP client for {target}: {source}")]
    HttpClient {
        target: String,
        #[source]
        source: reqwest::Error,
    },
}

/// # App Config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Starting level for every named logger.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Directory for the rolling log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// SQLite file path / `sqlite:` URL, or a `postgres://` connection string.
    #[serde(default = "default_database")]
    pub database: String,
    /// Root of the archive tree.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Filesystem path of the control socket.
    #[serde(default = "default_ipc_path")]
    pub ipc_path: PathBuf,
    /// Upper bound for any single network operation.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

/// Alert delivery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsConfig {
    pub discord: Option<DiscordConfig>,
}

/// Discord webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Log messages instead of posting them.
    #[serde(default)]
    pub mock: bool,
    /// `<@name>` mentions are rewritten to `<@id>` with this map.
    #[serde(default)]
    pub users: HashMap<String, String>,
    #[serde(default)]
    pub webhooks: Vec<String>,
}

/// One remote host/root and the paths polled beneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    /// Scheme, host and root path, e.g. `ftp://ftp.nhc.noaa.gov/atcf`.
    pub base_url: String,
    /// Seconds between polls for every path that does not override it.
    #[serde(default)]
    pub freq: Option<u64>,
    pub paths: Vec<PathConfig>,
}

/// One directory beneath a watcher's base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathConfig {
    /// Directory relative to the base URL.
    pub path: String,
    /// Regular expressions matched against entry names (FTP), or literal
    /// file names (HTTP, or FTP with `literal`).
    #[serde(default)]
    pub files: Vec<String>,
    /// Parser registry key; `none` or absent disables parsing.
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub freq: Option<u64>,
    /// Treat the single entry of `files` as an exact file name.
    #[serde(default)]
    pub literal: bool,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_database() -> String {
    "data/wmofetch.db".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_ipc_path() -> PathBuf {
    PathBuf::from("/tmp/wmofetch/wmofetch.sock")
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            database: default_database(),
            data_path: default_data_path(),
            ipc_path: default_ipc_path(),
            request_timeout_secs: default_request_timeout_secs(),
            notifications: NotificationsConfig::default(),
            watchers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Reads and deserializes a JSON config file. Does not validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })
    }

    /// Checks the invariants that do not depend on runtime registries:
    /// parseable base URLs with a supported scheme, non-empty file lists,
    /// the literal-path rule and positive frequencies.
    ///
    /// Parser keys and file patterns are checked when each watcher is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroFrequency {
                context: "requestTimeoutSecs".to_string(),
            });
        }

        for watcher in &self.watchers {
            let url = Url::parse(&watcher.base_url).map_err(|e| ConfigError::InvalidUrl {
                url: watcher.base_url.clone(),
                reason: e.to_string(),
            })?;
            if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
                return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
            }
            if watcher.freq == Some(0) {
                return Err(ConfigError::ZeroFrequency {
                    context: watcher.base_url.clone(),
                });
            }
            for path in &watcher.paths {
                path.validate()?;
            }
        }
        Ok(())
    }
}

impl PathConfig {
    /// Checks the rules that apply to a single path entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::NoFiles { path: self.path.clone() });
        }
        if self.literal && self.files.len() != 1 {
            return Err(ConfigError::LiteralNeedsOneFile {
                path: self.path.clone(),
                count: self.files.len(),
            });
        }
        if self.freq == Some(0) {
            return Err(ConfigError::ZeroFrequency { context: self.path.clone() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn path(files: &[&str], literal: bool) -> PathConfig {
        PathConfig {
            path: "atcf/btk".to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            parser: None,
            freq: None,
            literal,
        }
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "watchers": [ {{ "baseUrl": "ftp://ftp.nhc.noaa.gov/atcf", "paths": [ {{ "path": "btk", "files": ["^b.*\\.dat$"], "parser": "atcf" }} ] }} ] }}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.watchers[0].paths[0].parser.as_deref(), Some("atcf"));
        assert!(!config.watchers[0].paths[0].literal);
        config.validate().unwrap();
    }

    #[test]
    fn literal_requires_exactly_one_file() {
        assert!(path(&["a.txt"], true).validate().is_ok());
        assert!(matches!(
            path(&["a.txt", "b.txt"], true).validate(),
            Err(ConfigError::LiteralNeedsOneFile { count: 2, .. })
        ));
        assert!(path(&["a.txt", "b.txt"], false).validate().is_ok());
        assert!(matches!(path(&[], false).validate(), Err(ConfigError::NoFiles { .. })));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let config = AppConfig {
            watchers: vec![WatcherConfig {
                base_url: "gopher://example.com/".to_string(),
                freq: None,
                paths: vec![path(&["a"], false)],
            }],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnsupportedScheme(s)) if s == "gopher"));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let config = AppConfig {
            watchers: vec![WatcherConfig {
                base_url: "https://www.nhc.noaa.gov/".to_string(),
                freq: Some(0),
                paths: vec![path(&["a"], false)],
            }],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroFrequency { .. })));
    }
}
