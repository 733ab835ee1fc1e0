//! MCP client over newline-delimited JSON-RPC.
//!
//! One background task reads server output and routes each response to the
//! request waiting on its id, so calls from independent conversation threads
//! can be in flight at the same time. Writes are serialized per line.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proto::{CallToolResult, RawTool, ToolError, TransportError};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ToolProvider;
use crate::command::ServerCommand;
use crate::jsonrpc::{self, Incoming, METHOD_NOT_FOUND};

pub const PROTOCOL_VERSION: &str = "2025-06-18";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

type Reply = Result<Value, TransportError>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Client identity and limits
#[derive(Debug, Clone)]
pub struct McpClientOptions {
    pub client_name: String,
    pub client_version: String,
    pub request_timeout: Duration,
}

impl Default for McpClientOptions {
    fn default() -> Self {
        Self {
            client_name: "toolbridge".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsPage {
    #[serde(default)]
    tools: Vec<RawTool>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

struct Shared {
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    closed: AtomicBool,
}

impl Shared {
    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(TransportError::Closed));
        }
    }
}

/// Removes a pending entry when the waiting future goes away early.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

/// Connected MCP session
pub struct McpClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    options: McpClientOptions,
    child: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl McpClient {
    /// Starts the server process and completes the initialize handshake.
    pub async fn spawn(command: &ServerCommand, options: McpClientOptions) -> Result<Self, ToolError> {
        info!(command = %command.display(), "Starting tool server");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", command.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        let client = Self::connect(stdout, stdin, options);
        if let Some(stderr) = stderr {
            client.tasks.lock().push(tokio::spawn(forward_stderr(stderr)));
        }
        *client.child.lock() = Some(child);

        if let Err(e) = client.initialize().await {
            let _ = client.shutdown().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Wraps an already-open byte stream pair. No handshake is performed.
    pub fn connect<R, W>(reader: R, writer: W, options: McpClientOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            next_id: AtomicU64::new(1),
            options,
            child: Mutex::new(None),
            tasks: Mutex::new(vec![reader_task]),
        }
    }

    /// Runs `initialize` then sends `notifications/initialized`.
    ///
    /// Returns the server's initialize result.
    pub async fn initialize(&self) -> Result<Value, ToolError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            }
        });
        let result = self.request("initialize", Some(params)).await?;

        let server = result
            .get("serverInfo")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let protocol = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(server = %server, protocol = %protocol, "Tool server initialized");

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Sends one request and waits for the matching response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = jsonrpc::encode_request(id, method, params)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        // The reader may have drained pending between the check and the insert.
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }

        debug!(id, method, "-> request");
        self.shared.write_line(&line).await?;

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply?),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                warn!(id, method, "Request timed out");
                Err(ToolError::Timeout(self.options.request_timeout.as_secs()))
            }
        }
    }

    /// Sends a notification; nothing is awaited besides the write.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolError> {
        let line = jsonrpc::encode_notification(method, params)?;
        debug!(method, "-> notification");
        self.shared.write_line(&line).await?;
        Ok(())
    }

    /// Returns `true` once the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self) -> Result<Vec<RawTool>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsPage = serde_json::from_value(result)
                .map_err(|e| TransportError::Codec(format!("tools/list result: {e}")))?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(cursor = %next, "Server repeated a pagination cursor; stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(count = tools.len(), "Tool listing complete");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ToolError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Codec(format!("tools/call result: {e}")))?;

        if result.is_error {
            let message = result
                .joined_text()
                .unwrap_or_else(|| "tool reported an error".to_string());
            return Err(ToolError::Remote(message));
        }
        Ok(result)
    }

    async fn shutdown(&self) -> Result<(), ToolError> {
        self.shared.fail_pending();
        // Closing stdin is the polite stop signal for stdio servers.
        self.shared.writer.lock().await.take();

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!("Tool server already exited: {e}");
            }
            match child.wait().await {
                Ok(status) => info!(%status, "Tool server stopped"),
                Err(e) => warn!("Failed to reap tool server: {e}"),
            }
        }
        Ok(())
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Tool server closed its output");
                break;
            }
            Err(e) => {
                warn!("Failed to read from tool server: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match jsonrpc::decode_line(trimmed) {
            Ok(Incoming::Response { id, outcome }) => {
                debug!(id, ok = outcome.is_ok(), "<- response");
                let waiter = shared.pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome.map_err(TransportError::from));
                    }
                    None => debug!(id, "Response for an abandoned request"),
                }
            }
            Ok(Incoming::Notification { method }) => {
                debug!(method = %method, "<- notification (ignored)");
            }
            Ok(Incoming::Request { id, method }) => {
                debug!(method = %method, "<- server request (unsupported)");
                match jsonrpc::encode_error(&id, METHOD_NOT_FOUND, format!("Method not found: {method}")) {
                    Ok(reply) => {
                        if let Err(e) = shared.write_line(&reply).await {
                            warn!("Failed to answer server request: {e}");
                        }
                    }
                    Err(e) => warn!("Failed to encode error reply: {e}"),
                }
            }
            Err(e) => warn!("Ignoring malformed line from tool server: {e}"),
        }
    }

    shared.fail_pending();
}

async fn forward_stderr<R>(stderr: R)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "toolbridge::server", "{line}");
    }
}
