//! # Connections Module
//!
//! The append-only history of every file version the fetcher has archived.
//! Watchers use it to decide whether a listed file is new: one batched
//! [`FileDatabase::get_all_latest`] per cycle, then one
//! [`FileDatabase::insert_file`] per archived file.
//!
//! Two backends implement [`FileDatabase`], each behind its cargo feature:
//! an embedded SQLite file (`sqlx`) and a pooled PostgreSQL server
//! (`deadpool-postgres`). [`open_database`] picks one from the configured
//! connection string.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::loggers::Logger;
use crate::retrieve::RemoteFileRecord;

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
pub mod db_postgres;
/// SQLite backend.
#[cfg(feature = "sqlite")]
pub mod db_sqlite;

#[cfg(feature = "postgres")]
pub use db_postgres::PostgresFileDatabase;
#[cfg(feature = "sqlite")]
pub use db_sqlite::SqliteFileDatabase;

/// Largest number of hrefs bound into one lookup statement.
pub const LOOKUP_CHUNK: usize = 500;

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database is not connected")]
    NotConnected,
    #[error("A row for {href} modified at {modified_on:?} already exists")]
    Duplicate {
        href: String,
        modified_on: Option<i64>,
    },
    #[error("No backend compiled in for {0}")]
    UnsupportedBackend(String),
    #[error("Cannot prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[cfg(feature = "postgres")]
    #[error("Failed to create PostgreSQL pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),
}

/// # Persisted File Entry
///
/// One stored row of `noaa_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedFileEntry {
    pub id: i64,
    pub href: String,
    /// Logical identity assigned by the parser, if one ran.
    pub code: Option<String>,
    /// Remote modification time in epoch milliseconds.
    pub modified_on: Option<i64>,
    pub save_path: String,
}

/// A row to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileEntry {
    pub href: String,
    pub code: Option<String>,
    pub modified_on: Option<i64>,
    pub save_path: String,
}

/// # File Database
#[async_trait]
pub trait FileDatabase: Send + Sync {
    /// Opens the connection (or pool) and creates the schema if absent.
    /// Calling it again while connected does nothing.
    async fn connect(&self) -> Result<(), PersistenceError>;

    /// Most recent row per href of `files` (greatest `modified_on`).
    /// Every requested href is present in the result; `None` when never seen.
    async fn get_all_latest(
        &self,
        files: &[RemoteFileRecord],
    ) -> Result<HashMap<String, Option<PersistedFileEntry>>, PersistenceError>;

    /// Appends one row and returns its id.
    async fn insert_file(&self, entry: &NewFileEntry) -> Result<i64, PersistenceError>;

    /// Closes the connection. Calling it again does nothing.
    async fn end(&self) -> Result<(), PersistenceError>;
}

/// Distinct hrefs of `files`, in listing order.
pub(crate) fn distinct_hrefs(files: &[RemoteFileRecord]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    files
        .iter()
        .map(|f| f.href.as_str())
        .filter(|href| seen.insert(*href))
        .collect()
}

/// True when `database` names a PostgreSQL server rather than a SQLite file.
pub fn is_postgres_url(database: &str) -> bool {
    let lower = database.trim().to_ascii_lowercase();
    lower.starts_with("postgres://") || lower.starts_with("postgresql://")
}

/// Builds the backend named by `database`. Does not connect.
pub fn open_database(database: &str, logger: Arc<Logger>) -> Result<Arc<dyn FileDatabase>, PersistenceError> {
    if is_postgres_url(database) {
        #[cfg(feature = "postgres")]
        return Ok(Arc::new(PostgresFileDatabase::new(database, logger)));
        #[cfg(not(feature = "postgres"))]
        return Err(PersistenceError::UnsupportedBackend("postgres".to_string()));
    }

    #[cfg(feature = "sqlite")]
    return Ok(Arc::new(SqliteFileDatabase::new(database, logger)));
    #[cfg(not(feature = "sqlite"))]
    return Err(PersistenceError::UnsupportedBackend("sqlite".to_string()));
}
