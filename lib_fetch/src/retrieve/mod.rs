//! # Data Retrieval Module
//!
//! Remote transports for the fetcher. A watch target's URL scheme selects one
//! [`FileService`] implementation when the watcher is built; from then on the
//! watcher only sees the two capabilities every transport offers: list the
//! configured directory and download one file.
//!
//! ## Contained Modules:
//!
//! - **`target`**: the resolved (base URL, path) pair a transport works on.
//! - **`ftp`**: FTP listing and download over `suppaftp`.
//! - **`ftp_listing`**: `LIST` line parsing and timestamp normalization.
//! - **`http`**: HTTP/HTTPS probing (`HEAD`) and download over `reqwest`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use url::Url;

use crate::configs::ConfigError;
use crate::loggers::Logger;

/// FTP transport.
pub mod ftp;
/// FTP `LIST` parsing and date normalization.
pub mod ftp_listing;
/// HTTP/HTTPS transport.
pub mod http;
/// Resolved watch targets.
pub mod target;

pub use ftp::FtpFileService;
pub use http::HttpFileService;
pub use target::WatchTarget;

/// Errors raised while listing or downloading remote files.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("FTP {operation} on {host} failed: {source}")]
    Ftp {
        operation: &'static str,
        host: String,
        #[source]
        source: suppaftp::FtpError,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {method} {url} returned status {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },
    #[error("{operation} on {target} timed out after {secs}s")]
    Timeout {
        operation: &'static str,
        target: String,
        secs: u64,
    },
    #[error("Cannot resolve {path} against {base}: {source}")]
    Url {
        path: String,
        base: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Path of {0} is not valid UTF-8 once decoded")]
    Encoding(String),
    #[error("Cannot resolve address of {0}")]
    Address(String),
    #[error("Socket setup failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// # Remote File Record
///
/// One file as seen in a listing. Produced fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileRecord {
    /// Absolute URL of the file.
    pub href: String,
    /// Modification time reported by the server, `None` when unknown.
    #[serde(serialize_with = "serialize_modified")]
    pub modified: Option<DateTime<Utc>>,
    /// Size in bytes, `0` when unknown.
    pub size: u64,
}

fn serialize_modified<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => serializer.serialize_none(),
    }
}

impl RemoteFileRecord {
    /// Modification time as epoch milliseconds, the form persisted in the database.
    pub fn modified_millis(&self) -> Option<i64> {
        self.modified.map(|dt| dt.timestamp_millis())
    }

    /// Last path segment of the href.
    pub fn file_name(&self) -> &str {
        let trimmed = self.href.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

impl fmt::Display for RemoteFileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modified {
            Some(dt) => write!(f, "{} ({}, {} bytes)", self.href, dt.to_rfc3339(), self.size),
            None => write!(f, "{} (no timestamp, {} bytes)", self.href, self.size),
        }
    }
}

/// # File Service
///
/// The capability a watcher polls through.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Lists the files of the target directory that match the configured names.
    async fn list_files(&self) -> Result<Vec<RemoteFileRecord>, TransportError>;

    /// Downloads one file. `path` is either a name relative to the target
    /// directory or an absolute href returned by [`FileService::list_files`].
    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransportError>;
}

/// Picks the transport for `target` by URL scheme.
pub fn file_service_for(
    target: &WatchTarget,
    timeout: Duration,
    logger: Arc<Logger>,
) -> Result<Arc<dyn FileService>, ConfigError> {
    match target.scheme() {
        "ftp" => Ok(Arc::new(FtpFileService::new(target.clone(), timeout, logger)?)),
        "http" | "https" => Ok(Arc::new(HttpFileService::new(target.clone(), timeout, logger)?)),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

/// Resolves a download argument against the target directory.
///
/// An absolute URL is taken as is. Anything else is a file name (or a
/// `/`-separated relative path) appended segment by segment, so `#`, `?`,
/// `%` and spaces in remote names are escaped instead of being read as URL
/// syntax.
pub(crate) fn resolve_href(directory: &Url, path: &str) -> Result<Url, TransportError> {
    if let Ok(absolute) = Url::parse(path) {
        if !absolute.cannot_be_a_base() {
            return Ok(absolute);
        }
    }

    let mut url = directory.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Url {
            path: path.to_string(),
            base: directory.to_string(),
            source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
        })?
        .pop_if_empty()
        .extend(path.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// The URL's path with percent-escapes undone: the name the remote server knows.
pub(crate) fn decoded_path(url: &Url) -> Result<String, TransportError> {
    urlencoding::decode(url.path())
        .map(|path| path.into_owned())
        .map_err(|_| TransportError::Encoding(url.to_string()))
}
