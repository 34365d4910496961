//! # Watch Target
//!
//! One configured (base URL, path) pair, resolved once at startup into the
//! absolute directory URL that transports list and download against.

use std::time::Duration;

use url::Url;

use crate::configs::{ConfigError, PathConfig, WatcherConfig, DEFAULT_FREQUENCY_SECS};

/// Parser key that explicitly disables parsing.
pub const NO_PARSER: &str = "none";

/// # Watch Target
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// The watcher's base URL as configured.
    pub base_url: Url,
    /// `base_url` joined with `path`, always ending in `/`.
    pub directory: Url,
    /// Directory relative to the base URL, as configured.
    pub path: String,
    /// File name patterns (or literal names).
    pub files: Vec<String>,
    /// Parser key, `None` when parsing is disabled.
    pub parser: Option<String>,
    /// Treat `files[0]` as an exact name.
    pub literal: bool,
    path_freq: Option<u64>,
    target_freq: Option<u64>,
}

impl WatchTarget {
    /// Builds a target from one watcher entry and one of its paths.
    pub fn new(watcher: &WatcherConfig, path: &PathConfig) -> Result<Self, ConfigError> {
        path.validate()?;
        let base_url = Url::parse(&watcher.base_url).map_err(|e| ConfigError::InvalidUrl {
            url: watcher.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                url: watcher.base_url.clone(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        Ok(Self {
            directory: directory_url(&base_url, &path.path),
            base_url,
            path: path.path.clone(),
            files: path.files.clone(),
            parser: path
                .parser
                .clone()
                .filter(|key| !key.trim().is_empty() && !key.eq_ignore_ascii_case(NO_PARSER)),
            literal: path.literal,
            path_freq: path.freq,
            target_freq: watcher.freq,
        })
    }

    /// Time between polls: the path's frequency, else the watcher's, else 60 s.
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(
            self.path_freq
                .or(self.target_freq)
                .unwrap_or(DEFAULT_FREQUENCY_SECS),
        )
    }

    /// URL scheme of the target (`ftp`, `http`, `https`, ...).
    pub fn scheme(&self) -> &str {
        self.base_url.scheme()
    }

    /// Label used for this target's logger: `watcher:<host><directory>`.
    pub fn label(&self) -> String {
        let host = self.directory.host_str().unwrap_or_default();
        match self.directory.port() {
            Some(port) => format!("watcher:{}:{}{}", host, port, self.directory.path()),
            None => format!("watcher:{}{}", host, self.directory.path()),
        }
    }
}

/// Joins `path` below `base`, collapsing empty segments and keeping a
/// trailing slash so that `Url::join` resolves file names inside it.
fn directory_url(base: &Url, path: &str) -> Url {
    let segments: String = base
        .path()
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .map(|s| format!("{}/", s))
        .collect();
    let mut directory = base.clone();
    directory.set_path(&format!("/{}", segments));
    directory.set_query(None);
    directory.set_fragment(None);
    directory
}
