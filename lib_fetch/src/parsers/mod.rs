//! # Parsers Module
//!
//! Format-specific converters from a downloaded file to a logical identity
//! (`code`) and a JSON document. The registry is filled once at startup;
//! watchers resolve their configured key against it when they are built, so
//! an unknown key stops the process before anything is scheduled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::configs::ConfigError;
use crate::loggers::LoggerRegistry;
use crate::retrieve::target::NO_PARSER;
use crate::retrieve::RemoteFileRecord;

/// ATCF best-track parser.
pub mod atcf;
/// JSON passthrough parser.
pub mod json;

pub use atcf::AtcfParser;
pub use json::JsonParser;

/// Errors raised while parsing one file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("File is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("File contains no records")]
    Empty,
    #[error("Cannot write {path}: {source}")]
    Sidecar {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a parser produced for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOutcome {
    /// Logical identity of the content, e.g. `ATCF.2024AL01`.
    pub code: String,
    pub json: serde_json::Value,
}

/// # Parser
#[async_trait]
pub trait Parser: Send + Sync {
    /// Converts `contents` (already archived at `save_path`) to a [`ParseOutcome`].
    async fn parse(
        &self,
        file: &RemoteFileRecord,
        save_path: &Path,
        contents: &[u8],
    ) -> Result<ParseOutcome, ParseError>;
}

/// `save_path` with its extension replaced by `.json`.
pub fn sidecar_path(save_path: &Path) -> PathBuf {
    save_path.with_extension("json")
}

/// Writes `json` next to the archived file and returns the sidecar's path.
pub async fn write_sidecar(save_path: &Path, json: &serde_json::Value) -> Result<PathBuf, ParseError> {
    let path = sidecar_path(save_path);
    let body = serde_json::to_vec(json)?;
    tokio::fs::write(&path, body).await.map_err(|source| ParseError::Sidecar {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

/// # Parser Registry
///
/// Flat map from configuration key to parser.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in parsers (`atcf`, `json`).
    pub fn with_defaults(loggers: &LoggerRegistry) -> Self {
        let mut registry = Self::new();
        registry.register("atcf", Arc::new(AtcfParser::new(loggers.logger("parser:atcf"))));
        registry.register("json", Arc::new(JsonParser::new(loggers.logger("parser:json"))));
        registry
    }

    /// Adds or replaces the parser under `key` (stored lowercase).
    pub fn register(&mut self, key: &str, parser: Arc<dyn Parser>) {
        self.parsers.insert(key.to_ascii_lowercase(), parser);
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.parsers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Looks up a configured key. `None` and `"none"` mean no parsing.
    pub fn resolve(&self, key: Option<&str>) -> Result<Option<Arc<dyn Parser>>, ConfigError> {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        if key.eq_ignore_ascii_case(NO_PARSER) {
            return Ok(None);
        }
        self.parsers
            .get(&key.to_ascii_lowercase())
            .cloned()
            .map(Some)
            .ok_or_else(|| ConfigError::UnknownParser {
                key: key.to_string(),
                known: self.keys(),
            })
    }
}
