//! # HTTP Transport
//!
//! HTTP has no directory listing, so every configured file name is resolved
//! against the directory URL and probed with `HEAD`. Size comes from
//! `Content-Length` and the modification time from `Last-Modified`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, LAST_MODIFIED};
use reqwest::{Client, Method, Url};

use super::{resolve_href, FileService, RemoteFileRecord, TransportError, WatchTarget};
use crate::configs::ConfigError;
use crate::loggers::Logger;

const USER_AGENT: &str = concat!("wmofetch/", env!("CARGO_PKG_VERSION"));

/// # HTTP File Service
pub struct HttpFileService {
    target: WatchTarget,
    client: Client,
    logger: Arc<Logger>,
}

impl HttpFileService {
    /// Creates the service with a client whose every request is bounded by `timeout`.
    pub fn new(target: WatchTarget, timeout: Duration, logger: Arc<Logger>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| ConfigError::HttpClient {
                target: target.directory.to_string(),
                source,
            })?;
        Ok(Self { target, client, logger })
    }

    async fn send(&self, method: Method, url: Url) -> Result<reqwest::Response, TransportError> {
        let label = if method == Method::HEAD { "HEAD" } else { "GET" };
        let response = self.client.request(method, url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                method: label,
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn probe(&self, name: &str) -> Result<RemoteFileRecord, TransportError> {
        let url = resolve_href(&self.target.directory, name)?;
        let response = self.send(Method::HEAD, url.clone()).await?;
        let headers = response.headers();

        let modified = last_modified(headers);
        if modified.is_none() {
            self.logger.warn(format!(
                "No usable Last-Modified header for {} ({:?}), treating as no timestamp",
                url,
                headers.get(LAST_MODIFIED)
            ));
        }

        Ok(RemoteFileRecord {
            href: url.to_string(),
            modified,
            size: content_length(headers),
        })
    }
}

#[async_trait]
impl FileService for HttpFileService {
    async fn list_files(&self) -> Result<Vec<RemoteFileRecord>, TransportError> {
        let mut records = Vec::with_capacity(self.target.files.len());
        for name in &self.target.files {
            let record = self.probe(name).await?;
            self.logger.silly(format!("Probed {}", record));
            records.push(record);
        }
        Ok(records)
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let url = resolve_href(&self.target.directory, path)?;
        self.logger.verbose(format!("Downloading {}", url));
        let response = self.send(Method::GET, url).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

/// Parses an HTTP date: IMF-fixdate / RFC 2822 first, then the obsolete
/// RFC 850 and asctime forms.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|n| Utc.from_utc_datetime(&n))
}
