//! # SQLite File History
//!
//! Embedded backend on a `sqlx` SQLite pool. The database file (and its
//! parent directory) is created on first connect.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tokio::sync::Mutex;

use super::{distinct_hrefs, FileDatabase, NewFileEntry, PersistedFileEntry, PersistenceError, LOOKUP_CHUNK};
use crate::loggers::Logger;
use crate::retrieve::RemoteFileRecord;

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS noaa_file (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        href TEXT NOT NULL,
        code TEXT,
        modified_on INTEGER,
        save_path TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS noaa_file_href_idx ON noaa_file (href)",
    "CREATE INDEX IF NOT EXISTS noaa_file_code_idx ON noaa_file (code)",
    "CREATE INDEX IF NOT EXISTS noaa_file_modified_on_idx ON noaa_file (modified_on)",
    "CREATE UNIQUE INDEX IF NOT EXISTS noaa_file_href_modified_on_idx ON noaa_file (href, modified_on)",
];

const LATEST_PREFIX: &str = "SELECT id, href, code, modified_on, save_path FROM (
    SELECT id, href, code, modified_on, save_path,
        ROW_NUMBER() OVER (PARTITION BY href ORDER BY modified_on DESC NULLS LAST, id DESC) AS rn
    FROM noaa_file WHERE href IN (";

/// # SQLite File Database
pub struct SqliteFileDatabase {
    location: String,
    pool: Mutex<Option<SqlitePool>>,
    logger: Arc<Logger>,
}

impl SqliteFileDatabase {
    /// `location` is a file path or a `sqlite:` URL.
    pub fn new(location: &str, logger: Arc<Logger>) -> Self {
        Self {
            location: location.trim().to_string(),
            pool: Mutex::new(None),
            logger,
        }
    }

    async fn connect_options(&self) -> Result<SqliteConnectOptions, PersistenceError> {
        if self.location.starts_with("sqlite:") {
            return Ok(SqliteConnectOptions::from_str(&self.location)?.create_if_missing(true));
        }
        if let Some(parent) = Path::new(&self.location).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(SqliteConnectOptions::new()
            .filename(&self.location)
            .create_if_missing(true))
    }

    async fn pool(&self) -> Result<SqlitePool, PersistenceError> {
        self.pool.lock().await.clone().ok_or(PersistenceError::NotConnected)
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<PersistedFileEntry, sqlx::Error> {
    Ok(PersistedFileEntry {
        id: row.try_get("id")?,
        href: row.try_get("href")?,
        code: row.try_get("code")?,
        modified_on: row.try_get("modified_on")?,
        save_path: row.try_get("save_path")?,
    })
}

#[async_trait]
impl FileDatabase for SqliteFileDatabase {
    async fn connect(&self) -> Result<(), PersistenceError> {
        let mut slot = self.pool.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let options = self.connect_options().await?;
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .inspect_err(|e| self.logger.error(format!("Cannot open {}: {}", self.location, e)))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        self.logger.verbose(format!("Connected to {}, schema ready", self.location));
        *slot = Some(pool);
        Ok(())
    }

    async fn get_all_latest(
        &self,
        files: &[RemoteFileRecord],
    ) -> Result<HashMap<String, Option<PersistedFileEntry>>, PersistenceError> {
        let pool = self.pool().await?;
        let hrefs = distinct_hrefs(files);
        let mut latest: HashMap<String, Option<PersistedFileEntry>> =
            hrefs.iter().map(|h| (h.to_string(), None)).collect();

        for chunk in hrefs.chunks(LOOKUP_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(LATEST_PREFIX);
            let mut list = query.separated(", ");
            for href in chunk {
                list.push_bind(*href);
            }
            query.push(")) WHERE rn = 1");

            for row in query.build().fetch_all(&pool).await? {
                let entry = entry_from_row(&row)?;
                latest.insert(entry.href.clone(), Some(entry));
            }
        }

        self.logger.silly(format!("Looked up {} hrefs", latest.len()));
        Ok(latest)
    }

    async fn insert_file(&self, entry: &NewFileEntry) -> Result<i64, PersistenceError> {
        let pool = self.pool().await?;
        let result = sqlx::query("INSERT INTO noaa_file (href, code, modified_on, save_path) VALUES (?, ?, ?, ?)")
            .bind(&entry.href)
            .bind(&entry.code)
            .bind(entry.modified_on)
            .bind(&entry.save_path)
            .execute(&pool)
            .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(PersistenceError::Duplicate {
                href: entry.href.clone(),
                modified_on: entry.modified_on,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn end(&self) -> Result<(), PersistenceError> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
            self.logger.verbose(format!("Closed {}", self.location));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loggers::{LogLevel, LoggerRegistry};

    fn record(href: &str) -> RemoteFileRecord {
        RemoteFileRecord {
            href: href.to_string(),
            modified: None,
            size: 0,
        }
    }

    fn entry(href: &str, modified_on: Option<i64>, save_path: &str) -> NewFileEntry {
        NewFileEntry {
            href: href.to_string(),
            code: None,
            modified_on,
            save_path: save_path.to_string(),
        }
    }

    async fn open(dir: &tempfile::TempDir) -> SqliteFileDatabase {
        let registry = LoggerRegistry::new(LogLevel::Error);
        let location = dir.path().join("nested").join("history.db");
        let db = SqliteFileDatabase::new(location.to_str().unwrap(), registry.logger("database"));
        db.connect().await.unwrap();
        db
    }

    #[tokio::test]
    async fn latest_is_max_modified_per_href() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;

        db.insert_file(&entry("ftp://h/a", Some(100), "a1")).await.unwrap();
        db.insert_file(&entry("ftp://h/a", Some(300), "a3")).await.unwrap();
        db.insert_file(&entry("ftp://h/a", Some(200), "a2")).await.unwrap();
        db.insert_file(&entry("ftp://h/b", None, "b0")).await.unwrap();

        let latest = db
            .get_all_latest(&[record("ftp://h/a"), record("ftp://h/b"), record("ftp://h/c")])
            .await
            .unwrap();

        assert_eq!(latest.len(), 3);
        let a = latest["ftp://h/a"].as_ref().unwrap();
        assert_eq!((a.modified_on, a.save_path.as_str()), (Some(300), "a3"));
        assert_eq!(latest["ftp://h/b"].as_ref().unwrap().modified_on, None);
        assert!(latest["ftp://h/c"].is_none());
    }

    #[tokio::test]
    async fn duplicate_version_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;

        db.insert_file(&entry("ftp://h/a", Some(100), "a1")).await.unwrap();
        let err = db.insert_file(&entry("ftp://h/a", Some(100), "again")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate { modified_on: Some(100), .. }));
    }

    #[tokio::test]
    async fn connect_and_end_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;
        db.connect().await.unwrap();
        db.end().await.unwrap();
        db.end().await.unwrap();
        assert!(matches!(db.get_all_latest(&[]).await, Err(PersistenceError::NotConnected)));

        // Reconnecting keeps the rows already written.
        db.connect().await.unwrap();
        db.insert_file(&entry("ftp://h/a", Some(1), "a")).await.unwrap();
        db.end().await.unwrap();
        db.connect().await.unwrap();
        assert!(db.get_all_latest(&[record("ftp://h/a")]).await.unwrap()["ftp://h/a"].is_some());
    }
}
