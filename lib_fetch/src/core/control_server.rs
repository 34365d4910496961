//! # Control-Plane Server
//!
//! A Unix-domain socket that local tools connect to. Every connected client
//! receives each broadcast event as a frame: `0x02`, a UTF-8 JSON object
//! `{"cmd": ..., "data": ...}`, then `0x03`. Clients may also send one text
//! command (see [`ControlCommand`]); commands get a plain-text reply and the
//! connection is closed.
//!
//! Each connection owns a writer task fed through an unbounded channel, so
//! frames to one client are never interleaved and a slow client never
//! blocks a broadcast to the others beyond its own write. The registry lock
//! is only held for a single insert, remove or snapshot.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::commands::ControlCommand;
use super::EventSink;
use crate::loggers::{Logger, LoggerRegistry};

const FRAME_START: u8 = 0x02;
const FRAME_END: u8 = 0x03;
const READ_BUFFER: usize = 4096;

/// Errors raised while setting up or running the control socket.
#[derive(Debug, Error)]
pub enum ControlSocketError {
    #[error("Cannot create socket directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Socket path {path} already exists and could not be deleted: {source}")]
    StaleSocket {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Cannot listen on {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Encodes one broadcast frame.
pub fn encode_frame(cmd: &str, data: Option<Value>) -> Vec<u8> {
    let body = json!({ "cmd": cmd, "data": data }).to_string();
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.push(FRAME_START);
    frame.extend_from_slice(body.as_bytes());
    frame.push(FRAME_END);
    frame
}

/// Work for a client's writer task.
enum Outbound {
    Write {
        bytes: Arc<Vec<u8>>,
        ack: Option<oneshot::Sender<()>>,
    },
    Close {
        ack: Option<oneshot::Sender<()>>,
    },
}

/// # Client Handle
///
/// The registry's view of one connection: the sending half of its writer
/// task's queue.
#[derive(Clone)]
struct ClientHandle {
    sender: mpsc::UnboundedSender<Outbound>,
}

struct Shared {
    clients: Mutex<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
    loggers: Arc<LoggerRegistry>,
    checks: mpsc::Sender<()>,
    logger: Arc<Logger>,
    cancel: CancellationToken,
}

impl Shared {
    fn clients(&self) -> MutexGuard<'_, HashMap<u64, ClientHandle>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) -> Option<ClientHandle> {
        self.clients().remove(&id)
    }

    fn register(self: &Arc<Self>, stream: UnixStream) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients().insert(id, ClientHandle { sender: tx.clone() });
        self.logger.verbose(format!("Control client connected: {}", id));

        tokio::spawn(write_loop(Arc::clone(self), id, write, rx));
        tokio::spawn(read_loop(Arc::clone(self), id, read, tx));
    }
}

async fn write_loop(shared: Arc<Shared>, id: u64, mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Write { bytes, ack } => {
                if let Err(e) = writer.write_all(&bytes).await {
                    shared.logger.verbose(format!("Control client error: {} - {}", id, e));
                    shared.remove(id);
                    break;
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Outbound::Close { ack } => {
                let _ = writer.shutdown().await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                break;
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, id: u64, mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<Outbound>) {
    let mut name = id.to_string();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let read = tokio::select! {
            // Shutdown closes this client through its writer.
            _ = shared.cancel.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                shared.logger.verbose(format!("Control client disconnected: {}", name));
                break;
            }
            Err(e) => {
                shared.logger.verbose(format!("Control client error: {} - {}", name, e));
                break;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                let command = ControlCommand::parse(&text);
                shared.logger.debug(format!("Control client {} sent {:?}", name, command));

                if let Some(reply) = command.execute(&shared.loggers, &shared.checks, &shared.logger) {
                    let _ = tx.send(Outbound::Write {
                        bytes: Arc::new(reply.into_bytes()),
                        ack: None,
                    });
                    let _ = tx.send(Outbound::Close { ack: None });
                    break;
                }
                if let ControlCommand::Label(label) = command {
                    shared.logger.verbose(format!("Control client {} => {}", name, label));
                    name = label;
                }
            }
        }
    }
    shared.remove(id);
}

/// # Control Server
pub struct ControlServer {
    path: PathBuf,
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlServer {
    /// Prepares the socket path, binds and starts accepting.
    ///
    /// A file already at `path` is removed first; failing to remove it is
    /// fatal. `check` requests from clients are forwarded on `checks`.
    pub async fn start(
        path: &Path,
        loggers: Arc<LoggerRegistry>,
        checks: mpsc::Sender<()>,
    ) -> Result<Arc<Self>, ControlSocketError> {
        let logger = loggers.logger("control");
        let display = path.display().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ControlSocketError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
        if tokio::fs::symlink_metadata(path).await.is_ok() {
            tokio::fs::remove_file(path)
                .await
                .map_err(|source| ControlSocketError::StaleSocket {
                    path: display.clone(),
                    source,
                })?;
            logger.debug(format!("Removed stale socket {}", display));
        }

        let listener = UnixListener::bind(path).map_err(|source| ControlSocketError::Bind {
            path: display.clone(),
            source,
        })?;
        logger.info(format!("Control server listening on {}", display));

        let shared = Arc::new(Shared {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            loggers,
            checks,
            logger,
            cancel: CancellationToken::new(),
        });

        let accept_task = tokio::spawn(accept_loop(Arc::clone(&shared), listener));
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            shared,
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    /// Path the server listens on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.shared.clients().len()
    }

    /// Sends one frame to every connected client and waits until each write
    /// has been handed to the socket. Returns how many clients got it.
    pub async fn broadcast(&self, cmd: &str, data: Option<Value>) -> usize {
        let frame = Arc::new(encode_frame(cmd, data));
        self.shared
            .logger
            .debug(format!("Broadcasting {}", String::from_utf8_lossy(&frame[1..frame.len() - 1])));

        let handles: Vec<ClientHandle> = self.shared.clients().values().cloned().collect();
        let acks = handles.iter().filter_map(|client| {
            let (ack, done) = oneshot::channel();
            client
                .sender
                .send(Outbound::Write {
                    bytes: Arc::clone(&frame),
                    ack: Some(ack),
                })
                .ok()
                .map(|_| done)
        });

        join_all(acks).await.into_iter().filter(Result::is_ok).count()
    }

    /// Stops accepting, broadcasts `shutdown`, closes every client from the
    /// server side and removes the socket file.
    pub async fn shutdown(&self) {
        self.shared.logger.info("Control server shutting down");

        self.shared.cancel.cancel();
        let accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        self.broadcast("shutdown", None).await;

        let handles: Vec<ClientHandle> = self.shared.clients().drain().map(|(_, h)| h).collect();
        let closes = handles.iter().filter_map(|client| {
            let (ack, done) = oneshot::channel();
            client.sender.send(Outbound::Close { ack: Some(ack) }).ok().map(|_| done)
        });
        join_all(closes).await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self
                .shared
                .logger
                .warn(format!("Cannot remove socket {}: {}", self.path.display(), e)),
        }
        self.shared.logger.verbose("Control server stopped");
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: UnixListener) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => shared.register(stream),
                Err(e) => shared.logger.warn(format!("Control socket accept failed: {}", e)),
            },
        }
    }
}

#[async_trait]
impl EventSink for ControlServer {
    async fn publish(&self, cmd: &str, data: Option<Value>) {
        self.broadcast(cmd, data).await;
    }
}
