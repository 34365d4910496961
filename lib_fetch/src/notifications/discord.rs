//! # Discord Notifier
//!
//! Posts `{"content": ...}` to every configured webhook from a spawned task.
//! `<@name>` mentions are rewritten to `<@id>` from the `users` map so config
//! files can use readable names. In `mock` mode messages are only logged.

use std::fmt;
use std::sync::Arc;

use reqwest::Client;
use serde_json::json;

use super::{render, Notifier};
use crate::configs::DiscordConfig;
use crate::loggers::Logger;

/// # Discord Notifier
pub struct DiscordNotifier {
    config: DiscordConfig,
    client: Client,
    logger: Arc<Logger>,
}

impl DiscordNotifier {
    pub fn new(config: DiscordConfig, logger: Arc<Logger>) -> Self {
        Self {
            config,
            client: Client::new(),
            logger,
        }
    }

    /// Replaces every `<@name>` with `<@id>` for the configured users.
    pub fn expand_mentions(&self, message: &str) -> String {
        self.config
            .users
            .iter()
            .fold(message.to_string(), |text, (name, id)| {
                text.replace(&format!("<@{}>", name), &format!("<@{}>", id))
            })
    }
}

impl Notifier for DiscordNotifier {
    fn send(&self, message: &str, error: Option<&dyn fmt::Display>) {
        let content = self.expand_mentions(&render(message, error));

        for hook in &self.config.webhooks {
            if self.config.mock {
                self.logger.info(format!("MOCK MESSAGE, NOT SENT ({}):\n{}", hook, content));
                continue;
            }
            self.logger.debug(format!("Discord message ({}):\n{}", hook, content));

            let request = self.client.post(hook).json(&json!({ "content": content }));
            let logger = Arc::clone(&self.logger);
            let hook = hook.clone();
            tokio::spawn(async move {
                match request.send().await.and_then(|r| r.error_for_status()) {
                    Ok(_) => logger.silly(format!("Delivered to {}", hook)),
                    Err(e) => logger.warn(format!("Discord delivery to {} failed: {}", hook, e)),
                }
            });
        }
    }
}
