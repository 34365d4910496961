//! # Watcher
//!
//! One watcher polls one (base URL, path) target on its own timer:
//!
//! 1. list the remote directory,
//! 2. look up the latest stored version of every listed href in one call,
//! 3. for each file whose modification time differs from the stored one
//!    (or that was never seen), download, archive, parse, record and
//!    publish a `new` event. A listed file without a modification time is
//!    only fetched when no version of it is stored yet.
//!
//! A file that fails to download, archive or parse is logged, alerted and
//! skipped without a row, so the next cycle retries it. A database failure
//! ends the cycle early. A tick that arrives while the previous cycle is
//! still running is skipped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::archive::archive_path;
use crate::configs::ConfigError;
use crate::connections::{FileDatabase, NewFileEntry, PersistenceError};
use crate::core::EventSink;
use crate::loggers::{Logger, LoggerRegistry};
use crate::notifications::Notifier;
use crate::parsers::{ParseError, ParseOutcome, Parser, ParserRegistry};
use crate::retrieve::{file_service_for, FileService, RemoteFileRecord, TransportError, WatchTarget};

/// Failures of a cycle or of a single file within it.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Cannot archive to {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot derive an archive path from {0}")]
    InvalidHref(String),
    #[error("A cycle is already running")]
    Busy,
}

/// Counts for one finished cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Everything a watcher shares with the rest of the process.
#[derive(Clone)]
pub struct WatcherContext {
    pub database: Arc<dyn FileDatabase>,
    pub parsers: Arc<ParserRegistry>,
    pub events: Arc<dyn EventSink>,
    pub notifier: Arc<dyn Notifier>,
    pub loggers: Arc<LoggerRegistry>,
    /// Root of the archive tree.
    pub data_root: PathBuf,
    /// Bound on each network call.
    pub request_timeout: Duration,
}

struct WatcherInner {
    target: WatchTarget,
    service: Arc<dyn FileService>,
    parser: Option<Arc<dyn Parser>>,
    database: Arc<dyn FileDatabase>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    logger: Arc<Logger>,
    data_root: PathBuf,
    running: AtomicBool,
    cancel: CancellationToken,
}

/// Holds the running flag; clears it when dropped.
struct RunningGuard(Arc<WatcherInner>);

impl RunningGuard {
    fn claim(inner: &Arc<WatcherInner>) -> Option<Self> {
        inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(inner)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// # Watcher
pub struct Watcher {
    inner: Arc<WatcherInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    /// Builds a watcher, choosing the transport from the target's scheme and
    /// resolving its parser key. Both failures are configuration errors.
    pub fn new(target: WatchTarget, ctx: &WatcherContext) -> Result<Self, ConfigError> {
        let logger = ctx.loggers.logger(&target.label());
        let service = file_service_for(&target, ctx.request_timeout, Arc::clone(&logger))?;
        Self::with_service(target, service, ctx)
    }

    /// Builds a watcher around an existing transport.
    pub fn with_service(
        target: WatchTarget,
        service: Arc<dyn FileService>,
        ctx: &WatcherContext,
    ) -> Result<Self, ConfigError> {
        let parser = ctx.parsers.resolve(target.parser.as_deref())?;
        let logger = ctx.loggers.logger(&target.label());
        logger.verbose(format!(
            "Watching {} every {}s (parser: {})",
            target.directory,
            target.frequency().as_secs(),
            target.parser.as_deref().unwrap_or("none")
        ));

        Ok(Self {
            inner: Arc::new(WatcherInner {
                target,
                service,
                parser,
                database: Arc::clone(&ctx.database),
                events: Arc::clone(&ctx.events),
                notifier: Arc::clone(&ctx.notifier),
                logger,
                data_root: ctx.data_root.clone(),
                running: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            timer: Mutex::new(None),
        })
    }

    /// The target this watcher polls.
    pub fn target(&self) -> &WatchTarget {
        &self.inner.target
    }

    /// True while a cycle is in progress.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Starts the timer: one cycle right away, then one per frequency period
    /// until [`Watcher::shutdown`]. Calling it again does nothing.
    pub fn schedule(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if timer.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.target.frequency();
        *timer = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        WatcherInner::trigger(&inner);
                    }
                }
            }
        }));
    }

    /// Starts one cycle in the background unless one is already running or
    /// the watcher was shut down. Returns whether a cycle was started.
    pub fn trigger(&self) -> bool {
        WatcherInner::trigger(&self.inner)
    }

    /// Runs one cycle to completion on the current task.
    pub async fn watch(&self) -> Result<CycleReport, WatchError> {
        let _guard = RunningGuard::claim(&self.inner).ok_or(WatchError::Busy)?;
        self.inner.cycle().await
    }

    /// Stops the timer, then waits for a running cycle to finish by polling
    /// every `interval`, at most `attempts` times. Returns whether the
    /// watcher is idle.
    pub async fn shutdown(&self, interval: Duration, attempts: u32) -> bool {
        let logger = &self.inner.logger;
        logger.debug("Received shutdown signal");
        self.inner.cancel.cancel();

        let timer = self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        let mut attempt = 0;
        while self.is_running() && attempt < attempts {
            attempt += 1;
            logger.debug(format!("Cycle still running, waiting {:?} ({}/{})", interval, attempt, attempts));
            tokio::time::sleep(interval).await;
        }

        let idle = !self.is_running();
        if !idle {
            logger.warn("Cycle did not finish before shutdown");
        }
        idle
    }
}

impl WatcherInner {
    fn trigger(inner: &Arc<Self>) -> bool {
        if inner.cancel.is_cancelled() {
            return false;
        }
        let Some(guard) = RunningGuard::claim(inner) else {
            inner.logger.warn("Previous cycle is still running, skipping this one");
            return false;
        };

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _guard = guard;
            // Errors are logged and alerted inside the cycle.
            let _ = inner.cycle().await;
        });
        true
    }

    fn alert(&self, message: &str, error: &dyn std::fmt::Display) {
        self.logger.error(format!("{}: {}", message, error));
        self.notifier
            .send(&format!("{} ({})", message, self.target.directory), Some(error));
    }

    async fn cycle(&self) -> Result<CycleReport, WatchError> {
        self.logger.debug("Starting cycle");

        let files = match self.service.list_files().await {
            Ok(files) => files,
            Err(e) => {
                self.alert("Failed to list files", &e);
                return Err(e.into());
            }
        };
        let latest = match self.database.get_all_latest(&files).await {
            Ok(latest) => latest,
            Err(e) => {
                self.alert("Failed to look up file history", &e);
                return Err(e.into());
            }
        };

        let mut report = CycleReport {
            listed: files.len(),
            ..CycleReport::default()
        };

        for file in &files {
            let stored = latest.get(&file.href).and_then(Option::as_ref);
            if let Some(stored) = stored {
                // Without a listed timestamp there is nothing to compare; the
                // recorded version stands until the server reports one.
                if file.modified.is_none() || stored.modified_on == file.modified_millis() {
                    self.logger.silly(format!("Unchanged: {}", file));
                    report.unchanged += 1;
                    continue;
                }
            }

            self.logger.info(format!("New or updated: {}", file));
            match self.process(file).await {
                Ok(()) => report.changed += 1,
                Err(WatchError::Persistence(PersistenceError::Duplicate { .. })) => {
                    self.logger.warn(format!("Already recorded, skipping: {}", file));
                    report.unchanged += 1;
                }
                Err(WatchError::Persistence(e)) => {
                    self.alert(&format!("Failed to record {}, ending cycle", file.href), &e);
                    return Err(e.into());
                }
                Err(e) => {
                    self.alert(&format!("Failed to process {}", file.href), &e);
                    report.failed += 1;
                }
            }
        }

        self.logger.verbose(format!(
            "Cycle done: {} listed, {} changed, {} unchanged, {} failed",
            report.listed, report.changed, report.unchanged, report.failed
        ));
        Ok(report)
    }

    async fn process(&self, file: &RemoteFileRecord) -> Result<(), WatchError> {
        let contents = self.service.download_file(&file.href).await?;

        let save_path = archive_path(&self.data_root, file, Utc::now())
            .ok_or_else(|| WatchError::InvalidHref(file.href.clone()))?;
        let archive_err = |source| WatchError::Archive {
            path: save_path.display().to_string(),
            source,
        };
        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(archive_err)?;
        }
        tokio::fs::write(&save_path, &contents).await.map_err(archive_err)?;
        self.logger.debug(format!("Saved {} bytes to {}", contents.len(), save_path.display()));

        let outcome: Option<ParseOutcome> = match &self.parser {
            Some(parser) => Some(parser.parse(file, &save_path, &contents).await?),
            None => None,
        };

        let save_path = save_path.display().to_string();
        let code = outcome.as_ref().map(|o| o.code.clone());
        self.database
            .insert_file(&NewFileEntry {
                href: file.href.clone(),
                code: code.clone(),
                modified_on: file.modified_millis(),
                save_path: save_path.clone(),
            })
            .await?;

        self.events
            .publish(
                "new",
                Some(json!({
                    "file": file,
                    "savePath": save_path,
                    "parser": self.target.parser,
                    "code": code,
                    "json": outcome.map(|o| o.json),
                })),
            )
            .await;
        Ok(())
    }
}
