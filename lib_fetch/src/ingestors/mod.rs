//! # Ingestors Module
//!
//! The polling side of the fetcher: one [`Watcher`] per configured
//! (base URL, path) pair, plus the helpers the process root uses to build
//! them all and to fan `check` requests out to them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::configs::{AppConfig, ConfigError};
use crate::retrieve::WatchTarget;

/// Archive path layout.
pub mod archive;
/// The per-target scheduler and cycle.
pub mod watcher;

pub use archive::archive_path;
pub use watcher::{CycleReport, WatchError, Watcher, WatcherContext};

/// Poll interval used while draining a running cycle at shutdown.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Number of polls before shutdown gives up on a running cycle.
pub const SHUTDOWN_POLL_ATTEMPTS: u32 = 5;

/// Builds one watcher per configured path. Fails on the first configuration
/// error, before anything is scheduled.
pub fn build_watchers(config: &AppConfig, ctx: &WatcherContext) -> Result<Vec<Arc<Watcher>>, ConfigError> {
    let mut watchers = Vec::new();
    for watcher in &config.watchers {
        for path in &watcher.paths {
            let target = WatchTarget::new(watcher, path)?;
            watchers.push(Arc::new(Watcher::new(target, ctx)?));
        }
    }
    Ok(watchers)
}

/// Triggers every watcher each time a `check` request arrives, until the
/// sending side is dropped.
pub fn route_checks(watchers: Vec<Arc<Watcher>>, mut checks: mpsc::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while checks.recv().await.is_some() {
            for watcher in &watchers {
                watcher.trigger();
            }
        }
    })
}

/// Shuts every watcher down concurrently. Returns whether all of them drained.
pub async fn shutdown_all(watchers: &[Arc<Watcher>], interval: Duration, attempts: u32) -> bool {
    futures_util::future::join_all(watchers.iter().map(|w| w.shutdown(interval, attempts)))
        .await
        .into_iter()
        .all(|drained| drained)
}
