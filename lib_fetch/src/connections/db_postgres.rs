//! # PostgreSQL File History
//!
//! Client/server backend on a `deadpool-postgres` pool. Connection failures
//! are logged and returned to the caller; the pool re-establishes
//! connections on the next checkout.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use super::{distinct_hrefs, FileDatabase, NewFileEntry, PersistedFileEntry, PersistenceError, LOOKUP_CHUNK};
use crate::loggers::Logger;
use crate::retrieve::RemoteFileRecord;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS noaa_file (
    id BIGSERIAL PRIMARY KEY,
    href TEXT NOT NULL,
    code TEXT,
    modified_on BIGINT,
    save_path TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS noaa_file_href_idx ON noaa_file (href);
CREATE INDEX IF NOT EXISTS noaa_file_code_idx ON noaa_file (code);
CREATE INDEX IF NOT EXISTS noaa_file_modified_on_idx ON noaa_file (modified_on);
CREATE UNIQUE INDEX IF NOT EXISTS noaa_file_href_modified_on_idx ON noaa_file (href, modified_on);
";

const LATEST: &str = "SELECT id, href, code, modified_on, save_path FROM (
    SELECT id, href, code, modified_on, save_path,
        ROW_NUMBER() OVER (PARTITION BY href ORDER BY modified_on DESC NULLS LAST, id DESC) AS rn
    FROM noaa_file WHERE href = ANY($1)
) latest WHERE rn = 1";

const INSERT: &str = "INSERT INTO noaa_file (href, code, modified_on, save_path) VALUES ($1, $2, $3, $4) RETURNING id";

/// # PostgreSQL File Database
pub struct PostgresFileDatabase {
    url: String,
    pool: Mutex<Option<Pool>>,
    logger: Arc<Logger>,
}

impl PostgresFileDatabase {
    /// `url` is a `postgres://` connection string.
    pub fn new(url: &str, logger: Arc<Logger>) -> Self {
        Self {
            url: url.trim().to_string(),
            pool: Mutex::new(None),
            logger,
        }
    }

    async fn pool(&self) -> Result<Pool, PersistenceError> {
        self.pool.lock().await.clone().ok_or(PersistenceError::NotConnected)
    }

    /// Checks out a client, logging the failure.
    async fn client(&self) -> Result<deadpool_postgres::Object, PersistenceError> {
        let pool = self.pool().await?;
        pool.get().await.map_err(|e| {
            self.logger.error(format!("Cannot get a PostgreSQL connection: {}", e));
            PersistenceError::Pool(e)
        })
    }
}

fn entry_from_row(row: &Row) -> Result<PersistedFileEntry, tokio_postgres::Error> {
    Ok(PersistedFileEntry {
        id: row.try_get("id")?,
        href: row.try_get("href")?,
        code: row.try_get("code")?,
        modified_on: row.try_get("modified_on")?,
        save_path: row.try_get("save_path")?,
    })
}

#[async_trait]
impl FileDatabase for PostgresFileDatabase {
    async fn connect(&self) -> Result<(), PersistenceError> {
        let mut slot = self.pool.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let mut config = DeadpoolConfig::new();
        config.url = Some(self.url.clone());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let client = pool.get().await.map_err(|e| {
            self.logger.error(format!("Cannot connect to PostgreSQL: {}", e));
            PersistenceError::Pool(e)
        })?;
        client.batch_execute(SCHEMA).await?;
        drop(client);

        self.logger.verbose("Connected to PostgreSQL, schema ready");
        *slot = Some(pool);
        Ok(())
    }

    async fn get_all_latest(
        &self,
        files: &[RemoteFileRecord],
    ) -> Result<HashMap<String, Option<PersistedFileEntry>>, PersistenceError> {
        let hrefs = distinct_hrefs(files);
        let client = self.client().await?;
        let mut latest: HashMap<String, Option<PersistedFileEntry>> =
            hrefs.iter().map(|h| (h.to_string(), None)).collect();

        let statement = client.prepare_cached(LATEST).await?;
        for chunk in hrefs.chunks(LOOKUP_CHUNK) {
            for row in client.query(&statement, &[&chunk]).await? {
                let entry = entry_from_row(&row)?;
                latest.insert(entry.href.clone(), Some(entry));
            }
        }

        self.logger.silly(format!("Looked up {} hrefs", latest.len()));
        Ok(latest)
    }

    async fn insert_file(&self, entry: &NewFileEntry) -> Result<i64, PersistenceError> {
        let client = self.client().await?;
        let result = client
            .query_one(INSERT, &[&entry.href, &entry.code, &entry.modified_on, &entry.save_path])
            .await;

        match result {
            Ok(row) => Ok(row.try_get("id")?),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(PersistenceError::Duplicate {
                href: entry.href.clone(),
                modified_on: entry.modified_on,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn end(&self) -> Result<(), PersistenceError> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close();
            self.logger.verbose("Closed PostgreSQL pool");
        }
        Ok(())
    }
}
