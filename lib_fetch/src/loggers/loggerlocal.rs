//! # Named Loggers
//!
//! Every long-lived component (each watcher, each persistence backend, the
//! control server, the parsers) logs through its own named [`Logger`]. The
//! handles live in a [`LoggerRegistry`] owned by the process root, and the
//! only way to change a level at runtime is [`LoggerRegistry::set_level`],
//! which the control-plane `loglevel` command calls.
//!
//! A `Logger` gates on its own level and then emits through `tracing` under
//! the fixed target [`LOG_TARGET`], carrying its label as the `logger` field.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The `tracing` target used for every event emitted by a [`Logger`].
pub const LOG_TARGET: &str = "wmofetch";

/// # Log Level
///
/// The six operator-facing levels, ordered from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Failures that need attention.
    Error = 0,
    /// Unusual but recoverable conditions.
    Warn = 1,
    /// Normal progress.
    Info = 2,
    /// Extra progress detail (connections, schema checks).
    Verbose = 3,
    /// Internal detail for debugging.
    Debug = 4,
    /// Everything, including payload dumps.
    Silly = 5,
}

impl LogLevel {
    /// Every level, in order.
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Verbose,
        LogLevel::Debug,
        LogLevel::Silly,
    ];

    /// The lowercase name used in configuration and on the control socket.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Silly => "silly",
        }
    }

    /// `error,warn,info,verbose,debug,silly`
    pub fn names_joined() -> String {
        Self::ALL.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(",")
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(LogLevel::Silly)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == wanted)
            .ok_or(LogLevelError::InvalidLevel(wanted))
    }
}

/// Errors returned when a level change request cannot be applied.
///
/// The `Display` text is sent verbatim to control-socket clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogLevelError {
    /// The requested level is not one of [`LogLevel::ALL`].
    #[error("Invalid log level {0}. Must be [{levels}].", levels = LogLevel::names_joined())]
    InvalidLevel(String),
    /// No logger is registered under the requested name.
    #[error("Unknown logger {name}. Must be one of [all,{}].", .known.join(","))]
    UnknownLogger {
        /// The name that was asked for.
        name: String,
        /// Every registered logger name.
        known: Vec<String>,
    },
    /// The registry is empty.
    #[error("No loggers are registered.")]
    NoLoggers,
}

/// # Logger
///
/// A labelled log handle with its own runtime-adjustable level.
#[derive(Debug)]
pub struct Logger {
    label: String,
    level: AtomicU8,
}

impl Logger {
    fn new(label: &str, level: LogLevel) -> Self {
        Self {
            label: label.to_string(),
            level: AtomicU8::new(level as u8),
        }
    }

    /// The label this logger was registered under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The current level.
    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Swaps in `level` and returns the previous one.
    fn swap_level(&self, level: LogLevel) -> LogLevel {
        LogLevel::from_u8(self.level.swap(level as u8, Ordering::Relaxed))
    }

    /// True when a message at `level` would be emitted.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level()
    }

    /// Emits `message` at `level` if this logger allows it.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if !self.enabled(level) {
            return;
        }
        let label = self.label.as_str();
        match level {
            LogLevel::Error => tracing::error!(target: LOG_TARGET, logger = %label, "{}", message),
            LogLevel::Warn => tracing::warn!(target: LOG_TARGET, logger = %label, "{}", message),
            LogLevel::Info => tracing::info!(target: LOG_TARGET, logger = %label, "{}", message),
            LogLevel::Verbose | LogLevel::Debug => {
                tracing::debug!(target: LOG_TARGET, logger = %label, verbosity = level.as_str(), "{}", message)
            }
            LogLevel::Silly => tracing::trace!(target: LOG_TARGET, logger = %label, "{}", message),
        }
    }

    /// Logs at `error`.
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    /// Logs at `warn`.
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    /// Logs at `info`.
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    /// Logs at `verbose`.
    pub fn verbose(&self, message: impl fmt::Display) {
        self.log(LogLevel::Verbose, message);
    }

    /// Logs at `debug`.
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    /// Logs at `silly`.
    pub fn silly(&self, message: impl fmt::Display) {
        self.log(LogLevel::Silly, message);
    }
}

/// The outcome of a successful level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    /// Level before the change (of the first logger when several changed).
    pub old: LogLevel,
    /// Level after the change.
    pub new: LogLevel,
}

impl fmt::Display for LevelChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.old, self.new)
    }
}

/// # Logger Registry
///
/// Owns every named [`Logger`] for the lifetime of the process, in
/// registration order. New loggers start at the registry's default level,
/// which follows the last `all` level change.
#[derive(Debug)]
pub struct LoggerRegistry {
    default_level: AtomicU8,
    loggers: Mutex<Vec<Arc<Logger>>>,
}

impl LoggerRegistry {
    /// Creates an empty registry whose loggers start at `default_level`.
    pub fn new(default_level: LogLevel) -> Self {
        Self {
            default_level: AtomicU8::new(default_level as u8),
            loggers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Logger>>> {
        // A panic while holding this lock cannot leave the Vec half-updated.
        self.loggers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the logger registered as `label`, creating it if needed.
    pub fn logger(&self, label: &str) -> Arc<Logger> {
        let mut loggers = self.lock();
        if let Some(existing) = loggers.iter().find(|l| l.label == label) {
            return Arc::clone(existing);
        }
        let level = LogLevel::from_u8(self.default_level.load(Ordering::Relaxed));
        let logger = Arc::new(Logger::new(label, level));
        loggers.push(Arc::clone(&logger));
        logger
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|l| l.label.clone()).collect()
    }

    /// Looks a logger up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<Logger>> {
        self.lock()
            .iter()
            .find(|l| l.label.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Applies `level` to the logger named `logger`, or to every logger when
    /// the name is omitted or `all`.
    ///
    /// Nothing is changed when an error is returned.
    pub fn set_level(&self, level: &str, logger: Option<&str>) -> Result<LevelChange, LogLevelError> {
        let new: LogLevel = level.parse()?;
        let loggers = self.lock();

        match logger.filter(|name| !name.eq_ignore_ascii_case("all")) {
            Some(name) => {
                let target = loggers
                    .iter()
                    .find(|l| l.label.eq_ignore_ascii_case(name))
                    .ok_or_else(|| LogLevelError::UnknownLogger {
                        name: name.to_string(),
                        known: loggers.iter().map(|l| l.label.clone()).collect(),
                    })?;
                let old = target.swap_level(new);
                Ok(LevelChange { old, new })
            }
            None => {
                let first = loggers.first().ok_or(LogLevelError::NoLoggers)?;
                let old = first.level();
                for l in loggers.iter() {
                    l.swap_level(new);
                }
                self.default_level.store(new as u8, Ordering::Relaxed);
                Ok(LevelChange { old, new })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LoggerRegistry {
        let registry = LoggerRegistry::new(LogLevel::Info);
        registry.logger("server");
        registry.logger("database");
        registry
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!("VERBOSE".parse::<LogLevel>(), Ok(LogLevel::Verbose));
        assert_eq!(" silly ".parse::<LogLevel>(), Ok(LogLevel::Silly));
        assert!("trace".parse::<LogLevel>().is_err());
    }

    #[test]
    fn set_all_reports_first_logger_and_updates_every_logger() {
        let registry = registry();
        registry.get("database").unwrap().swap_level(LogLevel::Warn);

        let change = registry.set_level("debug", None).unwrap();
        assert_eq!(change.to_string(), "info => debug");
        assert!(registry.names().iter().all(|n| registry.get(n).unwrap().level() == LogLevel::Debug));

        // Loggers created afterwards follow the new default.
        assert_eq!(registry.logger("late").level(), LogLevel::Debug);
    }

    #[test]
    fn invalid_level_lists_valid_levels_and_changes_nothing() {
        let registry = registry();
        let err = registry.set_level("bogus", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid log level bogus. Must be [error,warn,info,verbose,debug,silly]."
        );
        assert_eq!(registry.get("server").unwrap().level(), LogLevel::Info);
    }

    #[test]
    fn unknown_logger_lists_known_names_and_changes_nothing() {
        let registry = registry();
        let err = registry.set_level("debug", Some("nope")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown logger nope. Must be one of [all,server,database].");
        assert_eq!(registry.get("database").unwrap().level(), LogLevel::Info);
    }

    #[test]
    fn named_change_touches_one_logger() {
        let registry = registry();
        let change = registry.set_level("error", Some("DATABASE")).unwrap();
        assert_eq!(change, LevelChange { old: LogLevel::Info, new: LogLevel::Error });
        assert_eq!(registry.get("server").unwrap().level(), LogLevel::Info);
        assert!(!registry.get("database").unwrap().enabled(LogLevel::Warn));
    }
}
