//! # Core Engine Module
//!
//! The local control plane: a Unix-socket server that fans change events out
//! to every connected tool and accepts a small set of operator commands.
//!
//! - **`control_server`**: client registry, framed broadcast, shutdown.
//! - **`commands`**: inbound command parsing and execution.
//!
//! Watchers publish through the [`EventSink`] trait rather than the concrete
//! server.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use async_trait::async_trait;
use serde_json::Value;

/// Inbound control commands.
pub mod commands;
/// The Unix-socket control server.
pub mod control_server;

pub use commands::{ControlCommand, CHECK_REPLY};
pub use control_server::{encode_frame, ControlServer, ControlSocketError};

/// # Event Sink
///
/// Where watchers publish events (`new`, `shutdown`, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers `{cmd, data}` to every subscriber; resolves once handed off.
    async fn publish(&self, cmd: &str, data: Option<Value>);
}
