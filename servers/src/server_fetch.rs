//! # Bulletin Fetch Server
//!
//! The wmofetch daemon. It polls the configured FTP/HTTP directories,
//! archives every new or updated file, runs its parser, records it in the
//! history database and broadcasts a `new` event to every client of the
//! local control socket.
//!
//! ## Startup order
//! Every step up to scheduling is fatal on failure: configuration, logging,
//! database, control socket, then all watchers are built before any of them
//! is scheduled.
//!
//! ## Shutdown
//! On Ctrl-C or SIGTERM the watchers stop their timers and get a bounded
//! wait for a running cycle, then the control socket says `shutdown` to its
//! clients and closes, and the database is released.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;

use lib_fetch::ingestors::{route_checks, shutdown_all, SHUTDOWN_POLL_ATTEMPTS, SHUTDOWN_POLL_INTERVAL};
use lib_fetch::loggers::setup_logging;
use lib_fetch::{
    build_watchers, notifier_from_config, open_database, ControlServer, Logger, LoggerRegistry, ParserRegistry,
    WatcherContext,
};

mod fetch_logic;
use fetch_logic::config::{self, Args, ConfigSource};

const APP_NAME: &str = "server_fetch";

#[tokio::main]
async fn main() -> Result<()> {
    let (config, source) = config::load_config(Args::parse())?;
    let _log_guard = setup_logging(&config.log_dir, APP_NAME).context("Setting up logging")?;

    let loggers = Arc::new(LoggerRegistry::new(config.log_level));
    let logger = loggers.logger("server");
    match &source {
        ConfigSource::File(path) => logger.info(format!("Configuration loaded from {}", path.display())),
        ConfigSource::Defaults => logger.info("No configuration file, using defaults"),
    }

    let database = open_database(&config.database, loggers.logger("database"))?;
    database.connect().await.context("Connecting to the history database")?;

    let parsers = Arc::new(ParserRegistry::with_defaults(&loggers));
    logger.verbose(format!("Parsers available: {}", parsers.keys().join(",")));
    let notifier = notifier_from_config(&config.notifications, &loggers);

    let (check_tx, check_rx) = mpsc::channel(1);
    let control = ControlServer::start(&config.ipc_path, Arc::clone(&loggers), check_tx)
        .await
        .context("Starting the control socket")?;

    let ctx = WatcherContext {
        database: Arc::clone(&database),
        parsers,
        events: control.clone(),
        notifier,
        loggers: Arc::clone(&loggers),
        data_root: config.data_path.clone(),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    };

    let watchers = match build_watchers(&config, &ctx) {
        Ok(watchers) => watchers,
        Err(e) => {
            logger.error(format!("Invalid watcher configuration: {}", e));
            control.shutdown().await;
            database.end().await?;
            return Err(e.into());
        }
    };
    for watcher in &watchers {
        watcher.schedule();
    }
    let router = route_checks(watchers.clone(), check_rx);
    logger.info(format!("Started {} watchers", watchers.len()));

    wait_for_shutdown(&logger).await?;

    if !shutdown_all(&watchers, SHUTDOWN_POLL_INTERVAL, SHUTDOWN_POLL_ATTEMPTS).await {
        logger.warn("Some watchers were still running at shutdown");
    }
    router.abort();
    control.shutdown().await;
    database.end().await?;

    logger.info("Shutdown complete.");
    Ok(())
}

async fn wait_for_shutdown(logger: &Logger) -> Result<()> {
    #[cfg(unix)]
    {
        let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Installing the SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                logger.info("Ctrl-C received, initiating shutdown.");
            }
            _ = term_signal.recv() => {
                logger.info("SIGTERM received, initiating shutdown.");
            }
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        logger.info("Ctrl-C received, initiating shutdown.");
    }
    Ok(())
}
