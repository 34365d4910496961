//! # `fetchctl`: Control Client for `server_fetch`
//!
//! Sends one command over the daemon's control socket and prints the reply.
//!
//! ## Usage
//!
//! ```bash
//! # Turn every logger up to debug
//! fetchctl loglevel debug
//!
//! # Only one watcher
//! fetchctl loglevel silly watcher:ftp.nhc.noaa.gov/atcf/btk/
//!
//! # Poll every watcher now
//! fetchctl check
//! ```
//!
//! The socket path comes from `--ipc-path` or `FETCH_IPC_PATH`.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[derive(Parser, Debug)]
#[command(name = "fetchctl", about = "Sends a control command to a running server_fetch", version)]
struct Cli {
    /// Path of the server's control socket.
    #[arg(long, env = "FETCH_IPC_PATH", default_value = "/tmp/wmofetch/wmofetch.sock")]
    ipc_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Change the level of every logger, or of one named logger.
    Loglevel {
        /// error, warn, info, verbose, debug or silly.
        level: String,
        /// Logger name; all loggers when omitted.
        logger: Option<String>,
    },
    /// Run a poll cycle on every watcher now.
    Check,
}

impl Command {
    /// The text sent over the socket.
    fn wire(&self) -> String {
        match self {
            Command::Loglevel { level, logger: Some(name) } => format!("loglevel {} {}", level, name),
            Command::Loglevel { level, logger: None } => format!("loglevel {}", level),
            Command::Check => "check".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut stream = UnixStream::connect(&cli.ipc_path)
        .await
        .with_context(|| format!("Cannot connect to {}", cli.ipc_path.display()))?;
    stream
        .write_all(cli.command.wire().as_bytes())
        .await
        .context("Sending command")?;

    // The server replies once and closes the connection.
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.context("Reading reply")?;
    println!("{}", String::from_utf8_lossy(&reply).trim_end());
    Ok(())
}
