//! # Control Commands
//!
//! Parsing and execution of the text commands control-socket clients send.
//! One read from the socket is one command: whitespace-separated tokens, the
//! command word matched without regard to case.

use tokio::sync::mpsc;

use crate::loggers::{Logger, LoggerRegistry};

/// Reply sent after a `check` request was queued.
pub const CHECK_REPLY: &str = "Triggered check on all watchers.";

/// An inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `loglevel <level> [loggerName|all]`
    LogLevel { level: String, logger: Option<String> },
    /// `check`
    Check,
    /// Anything else: older clients announce a display name this way.
    Label(String),
}

impl ControlCommand {
    /// Parses one received message.
    pub fn parse(input: &str) -> Self {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        match tokens.first().map(|t| t.to_ascii_lowercase()).as_deref() {
            Some("loglevel") => ControlCommand::LogLevel {
                level: tokens.get(1).map(|t| t.to_string()).unwrap_or_default(),
                logger: Some(tokens.get(2..).unwrap_or_default().join(" ")).filter(|n| !n.is_empty()),
            },
            Some("check") => ControlCommand::Check,
            _ => ControlCommand::Label(input.trim().to_string()),
        }
    }

    /// Runs the command. Returns the reply text for commands that get one
    /// (the connection is then closed), `None` for a label.
    pub fn execute(&self, loggers: &LoggerRegistry, checks: &mpsc::Sender<()>, logger: &Logger) -> Option<String> {
        match self {
            ControlCommand::LogLevel { level, logger: name } => {
                let reply = match loggers.set_level(level, name.as_deref()) {
                    Ok(change) => {
                        logger.info(format!(
                            "Log level of {} changed {}",
                            name.as_deref().unwrap_or("all"),
                            change
                        ));
                        change.to_string()
                    }
                    Err(e) => {
                        logger.warn(format!("Rejected log level request: {}", e));
                        e.to_string()
                    }
                };
                Some(reply)
            }
            ControlCommand::Check => {
                // A check already queued covers this one too.
                if let Err(mpsc::error::TrySendError::Closed(_)) = checks.try_send(()) {
                    logger.warn("Check requested but no watchers are listening");
                } else {
                    logger.info("Check requested on all watchers");
                }
                Some(CHECK_REPLY.to_string())
            }
            ControlCommand::Label(_) => None,
        }
    }
}
