//! One running HLS subprocess.
//!
//! The client owns three tasks: a writer draining an outbound message
//! channel into the server's stdin, a reader decoding frames from its
//! stdout, and a forwarder logging its stderr. Requests are correlated by
//! numeric id through a pending map of oneshot channels; a request that the
//! server never answers rejects with [`Error::Timeout`], and a dead server
//! rejects everything pending with [`Error::ServerExited`] and clears the
//! diagnostics store.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::hls::diagnostics::DiagnosticsStore;
use crate::hls::protocol::{
    self, ConfigurationParams, Incoming, METHOD_NOT_FOUND, MessageParams,
    PublishDiagnosticsParams, WorkspaceFolder, methods,
};
use crate::hls::{codec, keys};
use crate::settings::SettingsAccessor;
use crate::{Error, Result};

/// Default client-to-server request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// How to launch the server subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Executable path.
    pub path: String,
    /// Arguments passed to it.
    pub args: Vec<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Read the server configuration; `None` while no executable path is
    /// configured (the client stays off then).
    pub fn load(accessor: &SettingsAccessor) -> Option<Self> {
        let path = accessor
            .read(keys::PATH, None)
            .and_then(|v| v.as_str().map(str::to_string))?;
        if path.trim().is_empty() {
            return None;
        }
        let args = accessor
            .read(keys::ARGS, None)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let request_timeout = accessor
            .read(keys::REQUEST_TIMEOUT_MS, None)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        Some(Self {
            path,
            args,
            request_timeout,
        })
    }
}

/// A live connection to one server subprocess.
pub struct HlsClient {
    child: Child,
    outbound: mpsc::UnboundedSender<Value>,
    pending: Pending,
    next_id: AtomicI64,
    diagnostics: Arc<DiagnosticsStore>,
    root_uri: Option<String>,
    folders: Vec<WorkspaceFolder>,
    request_timeout: Duration,
}

impl HlsClient {
    /// Spawn the server and wire up its streams. The `accessor` answers
    /// `workspace/configuration` requests from live configuration.
    pub fn spawn(
        config: &ServerConfig,
        accessor: SettingsAccessor,
        root_uri: Option<String>,
        folders: Vec<WorkspaceFolder>,
        diagnostics: Arc<DiagnosticsStore>,
    ) -> Result<Self> {
        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Other(format!("failed to spawn {}: {e}", config.path)))?;
        info!(path = %config.path, pid = child.id(), "language server started");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other("server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("server stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Other("server stderr unavailable".into()))?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(write_loop(stdin, outbound_rx));
        tokio::spawn(stderr_loop(stderr));
        tokio::spawn(read_loop(
            stdout,
            pending.clone(),
            diagnostics.clone(),
            accessor,
            folders.clone(),
            outbound.clone(),
        ));

        Ok(Self {
            child,
            outbound,
            pending,
            next_id: AtomicI64::new(1),
            diagnostics,
            root_uri,
            folders,
            request_timeout: config.request_timeout,
        })
    }

    /// Run the `initialize`/`initialized` handshake.
    pub async fn initialize(&self) -> Result<Value> {
        let params = protocol::initialize_params(self.root_uri.as_deref(), &self.folders);
        let result = self.request(methods::INITIALIZE, params).await?;
        self.notify(methods::INITIALIZED, json!({}))?;
        Ok(result)
    }

    /// Send a request and wait for its response or the timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if self
            .outbound
            .send(protocol::request(id, method, params))
            .is_err()
        {
            self.pending.lock().unwrap().remove(&id);
            return Err(Error::ServerExited("writer task gone".into()));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::ServerExited("server closed before responding".into())),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(Error::Timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.outbound
            .send(protocol::notification(method, params))
            .map_err(|_| Error::ServerExited("writer task gone".into()))
    }

    /// Forward `textDocument/didOpen`.
    pub fn did_open(&self, uri: &str, language_id: &str, version: i64, text: &str) -> Result<()> {
        self.notify(
            methods::DID_OPEN,
            protocol::did_open_params(uri, language_id, version, text),
        )
    }

    /// Forward `textDocument/didChange` (full-text sync).
    pub fn did_change(&self, uri: &str, version: i64, text: &str) -> Result<()> {
        self.notify(
            methods::DID_CHANGE,
            protocol::did_change_params(uri, version, text),
        )
    }

    /// Forward `textDocument/didSave`.
    pub fn did_save(&self, uri: &str) -> Result<()> {
        self.notify(methods::DID_SAVE, protocol::did_save_params(uri))
    }

    /// Forward `textDocument/didClose` and drop the document's diagnostics.
    pub fn did_close(&self, uri: &str) -> Result<()> {
        self.diagnostics.clear(uri);
        self.notify(methods::DID_CLOSE, protocol::did_close_params(uri))
    }

    /// True while the subprocess is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Polite teardown: `shutdown` request, `exit` notification, then wait
    /// for the process (killing it if it lingers).
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = timeout(
            Duration::from_secs(2),
            self.request(methods::SHUTDOWN, Value::Null),
        )
        .await;
        let _ = self.notify(methods::EXIT, Value::Null);
        match timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "language server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!("language server did not exit, killing it");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

async fn write_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = codec::write_frame(&mut stdin, &message).await {
            error!(error = %e, "failed to write to language server");
            break;
        }
    }
}

async fn stderr_loop(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "hls::stderr", "{line}");
    }
}

async fn read_loop(
    stdout: ChildStdout,
    pending: Pending,
    diagnostics: Arc<DiagnosticsStore>,
    accessor: SettingsAccessor,
    folders: Vec<WorkspaceFolder>,
    outbound: mpsc::UnboundedSender<Value>,
) {
    let mut reader = BufReader::new(stdout);
    loop {
        match codec::read_frame(&mut reader).await {
            Ok(Some(message)) => {
                route_message(message, &pending, &diagnostics, &accessor, &folders, &outbound);
            }
            Ok(None) => {
                debug!("language server closed its stdout");
                break;
            }
            Err(e @ Error::Protocol(_)) => {
                // Framing recovered past the bad bytes; keep the connection.
                error!(error = %e, "dropping malformed server message");
            }
            Err(e) => {
                error!(error = %e, "language server read failed");
                break;
            }
        }
    }
    fail_pending(&pending, "server connection closed");
    diagnostics.clear_all();
}

/// Dispatch one decoded server message.
fn route_message(
    message: Value,
    pending: &Pending,
    diagnostics: &DiagnosticsStore,
    accessor: &SettingsAccessor,
    folders: &[WorkspaceFolder],
    outbound: &mpsc::UnboundedSender<Value>,
) {
    let incoming: Incoming = match serde_json::from_value(message) {
        Ok(incoming) => incoming,
        Err(e) => {
            error!(error = %e, "unclassifiable server message");
            return;
        }
    };

    match incoming {
        Incoming::Response { id, result, error } => {
            let Some(id) = id.as_i64() else {
                error!(?id, "response with non-numeric id");
                return;
            };
            let Some(tx) = pending.lock().unwrap().remove(&id) else {
                debug!(id, "response for unknown or expired request");
                return;
            };
            let reply = match error {
                Some(e) => Err(Error::Protocol(format!(
                    "server error {}: {}",
                    e.code, e.message
                ))),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(reply);
        }

        Incoming::Request { id, method, params } => {
            // Server-to-client requests are answered synchronously from
            // live state; nothing here blocks.
            let reply = match method.as_str() {
                methods::WORKSPACE_CONFIGURATION => {
                    let params: ConfigurationParams = params
                        .and_then(|p| serde_json::from_value(p).ok())
                        .unwrap_or(ConfigurationParams { items: Vec::new() });
                    let values: Vec<Value> = params
                        .items
                        .iter()
                        .map(|item| {
                            item.section
                                .as_deref()
                                .and_then(|section| accessor.read(section, None))
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    protocol::response(&id, Value::Array(values))
                }
                methods::WORKSPACE_FOLDERS => protocol::response(
                    &id,
                    serde_json::to_value(folders).unwrap_or(Value::Null),
                ),
                other => {
                    warn!(method = other, "unhandled server request");
                    protocol::error_response(&id, METHOD_NOT_FOUND, "method not found")
                }
            };
            let _ = outbound.send(reply);
        }

        Incoming::Notification { method, params } => match method.as_str() {
            methods::PUBLISH_DIAGNOSTICS => {
                match params.and_then(|p| serde_json::from_value::<PublishDiagnosticsParams>(p).ok())
                {
                    Some(p) => {
                        debug!(uri = %p.uri, count = p.diagnostics.len(), "diagnostics published");
                        diagnostics.publish(&p.uri, p.diagnostics);
                    }
                    None => error!("malformed publishDiagnostics params"),
                }
            }
            methods::LOG_MESSAGE | methods::SHOW_MESSAGE => {
                if let Some(p) = params.and_then(|p| serde_json::from_value::<MessageParams>(p).ok())
                {
                    match p.kind {
                        Some(1) => error!(target: "hls", "{}", p.message),
                        Some(2) => warn!(target: "hls", "{}", p.message),
                        Some(4) => debug!(target: "hls", "{}", p.message),
                        _ => info!(target: "hls", "{}", p.message),
                    }
                }
            }
            other => debug!(method = other, "ignoring server notification"),
        },
    }
}

fn fail_pending(pending: &Pending, why: &str) {
    let mut map = pending.lock().unwrap();
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(Error::ServerExited(why.to_string())));
    }
}
