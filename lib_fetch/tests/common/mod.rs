//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use lib_fetch::configs::{PathConfig, WatcherConfig};
use lib_fetch::connections::SqliteFileDatabase;
use lib_fetch::{
    EventSink, FileDatabase, FileService, LogLevel, LoggerRegistry, Notifier, ParserRegistry, RemoteFileRecord,
    TransportError, WatchTarget, WatcherContext,
};

pub const BAL01: &str = "\
AL, 01, 2024061912,   , BEST,   0, 205N,  920W,  30, 1008, TD,   0,    ,    0,    0,    0,    0,
AL, 01, 2024061918,   , BEST,   0, 214N,  929W,  35, 1005, TS,  34, NEQ,  210,  130,    0,    0,
";

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn record(href: &str, modified: Option<&str>) -> RemoteFileRecord {
    RemoteFileRecord {
        href: href.to_string(),
        modified: modified.map(utc),
        size: 0,
    }
}

/// In-memory transport. Files without contents fail to download.
pub struct FakeService {
    pub listing: Mutex<Vec<RemoteFileRecord>>,
    pub contents: Mutex<HashMap<String, Vec<u8>>>,
    pub downloads: AtomicUsize,
    pub fail_listing: AtomicBool,
    gate: Semaphore,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_permits(Semaphore::MAX_PERMITS))
    }

    /// A service whose listing blocks until [`FakeService::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::with_permits(0))
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            listing: Mutex::new(Vec::new()),
            contents: Mutex::new(HashMap::new()),
            downloads: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
            gate: Semaphore::new(permits),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn publish(&self, file: RemoteFileRecord, contents: &[u8]) {
        self.contents.lock().unwrap().insert(file.href.clone(), contents.to_vec());
        let mut listing = self.listing.lock().unwrap();
        listing.retain(|f| f.href != file.href);
        listing.push(file);
    }

    pub fn list_without_contents(&self, file: RemoteFileRecord) {
        self.listing.lock().unwrap().push(file);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileService for FakeService {
    async fn list_files(&self) -> Result<Vec<RemoteFileRecord>, TransportError> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                method: "HEAD",
                url: "https://fake.invalid/".to_string(),
                status: 503,
            });
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.contents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                method: "GET",
                url: path.to_string(),
                status: 404,
            })
    }
}

/// Keeps every published event.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(String, Option<Value>)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, cmd: &str, data: Option<Value>) {
        self.events.lock().unwrap().push((cmd.to_string(), data));
    }
}

/// Keeps every alert.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &str, error: Option<&dyn fmt::Display>) {
        self.messages.lock().unwrap().push(lib_fetch::notifications::render(message, error));
    }
}

/// A SQLite history, archive root and recording collaborators in a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub database: Arc<dyn FileDatabase>,
    pub sink: Arc<RecordingSink>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: WatcherContext,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let loggers = Arc::new(LoggerRegistry::new(LogLevel::Error));
        let location = dir.path().join("db").join("history.db");
        let database: Arc<dyn FileDatabase> =
            Arc::new(SqliteFileDatabase::new(location.to_str().unwrap(), loggers.logger("database")));
        database.connect().await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = WatcherContext {
            database: Arc::clone(&database),
            parsers: Arc::new(ParserRegistry::with_defaults(&loggers)),
            events: sink.clone(),
            notifier: notifier.clone(),
            loggers,
            data_root: dir.path().join("data"),
            request_timeout: Duration::from_secs(5),
        };

        Self {
            dir,
            database,
            sink,
            notifier,
            ctx,
        }
    }
}

pub fn target(base: &str, path: &str, files: &[&str], parser: Option<&str>) -> WatchTarget {
    let watcher = WatcherConfig {
        base_url: base.to_string(),
        freq: Some(1),
        paths: Vec::new(),
    };
    let path = PathConfig {
        path: path.to_string(),
        files: files.iter().map(|f| f.to_string()).collect(),
        parser: parser.map(str::to_string),
        freq: None,
        literal: false,
    };
    WatchTarget::new(&watcher, &path).unwrap()
}

/// Polls `condition` every 10 ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
