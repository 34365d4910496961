//! # lib_fetch
//!
//! Engine of the wmofetch bulletin fetcher: watchers poll FTP and HTTP
//! sources, archive new or updated files, hand them to parsers, record each
//! version in a history database and publish change events on a local
//! control socket.

pub mod configs;
pub mod connections;
pub mod core;
pub mod ingestors;
pub mod loggers;
pub mod notifications;
pub mod parsers;
pub mod retrieve;

pub use configs::{AppConfig, ConfigError};
pub use connections::{open_database, FileDatabase, NewFileEntry, PersistedFileEntry, PersistenceError};
pub use crate::core::{ControlServer, ControlSocketError, EventSink};
pub use ingestors::{build_watchers, CycleReport, WatchError, Watcher, WatcherContext};
pub use loggers::{LogLevel, Logger, LoggerRegistry};
pub use notifications::{notifier_from_config, LogNotifier, Notifier};
pub use parsers::{ParseError, ParseOutcome, Parser, ParserRegistry};
pub use retrieve::{FileService, RemoteFileRecord, TransportError, WatchTarget};
