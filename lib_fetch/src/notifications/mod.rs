//! # Notifications Module
//!
//! Operator alerts for failures the fetcher recovers from on its own (a bad
//! file, a lost listing, a database hiccup). Sending is fire-and-forget:
//! callers never wait on delivery and delivery failures are only logged.

use std::fmt;
use std::sync::Arc;

use crate::configs::NotificationsConfig;
use crate::loggers::{Logger, LoggerRegistry};

/// Discord webhook notifier.
pub mod discord;

pub use discord::DiscordNotifier;

/// # Notifier
pub trait Notifier: Send + Sync {
    /// Queues `message` (with `error` appended when given) for delivery.
    fn send(&self, message: &str, error: Option<&dyn fmt::Display>);
}

/// Renders the alert text the same way for every notifier.
pub fn render(message: &str, error: Option<&dyn fmt::Display>) -> String {
    match error {
        Some(e) => format!("{}\n```\n{}\n```", message, e),
        None => message.to_string(),
    }
}

/// Writes alerts to its logger at `error` level.
pub struct LogNotifier {
    logger: Arc<Logger>,
}

impl LogNotifier {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl Notifier for LogNotifier {
    fn send(&self, message: &str, error: Option<&dyn fmt::Display>) {
        self.logger.error(render(message, error));
    }
}

/// Builds the notifier described by the configuration: Discord when at
/// least one webhook is configured, otherwise log-only.
pub fn notifier_from_config(config: &NotificationsConfig, loggers: &LoggerRegistry) -> Arc<dyn Notifier> {
    match &config.discord {
        Some(discord) if !discord.webhooks.is_empty() => {
            Arc::new(DiscordNotifier::new(discord.clone(), loggers.logger("discord")))
        }
        _ => Arc::new(LogNotifier::new(loggers.logger("notifier"))),
    }
}
