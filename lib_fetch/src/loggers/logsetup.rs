//! # Log Transport Setup
//!
//! Installs the process-wide `tracing` subscriber: a console layer plus a
//! non-blocking, daily-rolling file layer. Filtering by operator level happens
//! in [`Logger`](super::Logger); the `EnvFilter` here only keeps third-party
//! crates quiet unless `RUST_LOG` says otherwise.

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::LOG_TARGET;

/// How many daily log files are kept in the log directory.
const MAX_LOG_FILES: usize = 14;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingSetupError {
    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to create rolling log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),
    #[error("A global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs console and file logging.
///
/// Files are written as `<log_dir>/<app_name>.<YYYY-MM-DD>.log`; the oldest
/// are removed once more than fourteen exist. The returned guard flushes the
/// file writer when dropped and must be held for the life of the process.
pub fn setup_logging(log_dir: &Path, app_name: &str) -> Result<WorkerGuard, LoggingSetupError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingSetupError::LogDir {
        path: log_dir.display().to_string(),
        source,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(app_name)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}=trace", LOG_TARGET)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_target(false).with_ansi(false).with_writer(file_writer))
        .try_init()?;

    Ok(guard)
}
