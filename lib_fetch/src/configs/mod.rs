//! # Configuration Modules
//!
//! This module holds the JSON configuration model of the fetcher and the
//! startup-time checks run against it.

/// The application config document, its defaults and validation.
pub mod config_app;

pub use config_app::{
    AppConfig, ConfigError, DiscordConfig, NotificationsConfig, PathConfig, WatcherConfig,
    DEFAULT_FREQUENCY_SECS,
};
