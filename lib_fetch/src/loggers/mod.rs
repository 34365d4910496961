//! # Loggers Module
//!
//! Logging for the whole workspace: the named, runtime-adjustable [`Logger`]
//! handles every component writes through, and the `tracing` subscriber that
//! finally renders them to the console and to rolling log files.

/// Named loggers and the registry the control plane mutates.
pub mod loggerlocal;
/// Installs the `tracing` subscriber (console + daily file).
pub mod logsetup;

pub use loggerlocal::{LevelChange, LogLevel, LogLevelError, Logger, LoggerRegistry, LOG_TARGET};
pub use logsetup::{setup_logging, LoggingSetupError};
