use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lib_fetch::{AppConfig, LogLevel};

/// Config file read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_PATH: &str = "wmofetch.json";

#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Polls NOAA/WMO servers, archives new bulletins and publishes them on a local socket.", version)]
pub struct Args {
    #[clap(long, env = "FETCH_CONFIG", help = "Path to the JSON configuration file.")]
    pub config: Option<PathBuf>,

    #[clap(long, env = "FETCH_LOG_LEVEL", help = "Logging level (error, warn, info, verbose, debug, silly).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FETCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FETCH_DATABASE", help = "SQLite file path or postgres:// connection URL.")]
    pub database: Option<String>,

    #[clap(long, env = "FETCH_DATA_PATH", help = "Root directory of the file archive.")]
    pub data_path: Option<PathBuf>,

    #[clap(long, env = "FETCH_IPC_PATH", help = "Path of the control socket.")]
    pub ipc_path: Option<PathBuf>,
}

impl Args {
    /// Applies every override that was given on top of `config`.
    pub fn merge(self, config: AppConfig) -> Result<AppConfig> {
        let log_level = match self.log_level {
            Some(level) => level.parse::<LogLevel>()?,
            None => config.log_level,
        };
        Ok(AppConfig {
            log_level,
            log_dir: self.log_dir.unwrap_or(config.log_dir),
            database: self.database.unwrap_or(config.database),
            data_path: self.data_path.unwrap_or(config.data_path),
            ipc_path: self.ipc_path.unwrap_or(config.ipc_path),
            ..config
        })
    }
}

/// Where the config came from, for the startup log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// Defaults, then the config file, then CLI/env overrides; validated.
///
/// An explicit `--config` must exist. The default path is optional.
pub fn load_config(args: Args) -> Result<(AppConfig, ConfigSource)> {
    let (base, source) = match &args.config {
        Some(path) => (read(path)?, ConfigSource::File(path.clone())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            (read(&path)?, ConfigSource::File(path))
        }
        None => (AppConfig::default(), ConfigSource::Defaults),
    };

    let config = args.merge(base)?;
    config.validate()?;
    Ok((config, source))
}

fn read(path: &Path) -> Result<AppConfig> {
    AppConfig::from_file(path).with_context(|| format!("Loading configuration from {}", path.display()))
}
