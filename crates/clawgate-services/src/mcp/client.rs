//! Per-server MCP client.
//!
//! One client owns one tool-server session: a child process speaking
//! framed JSON-RPC over stdio, or an HTTP endpoint. A stdio client
//! runs three background tasks -- a read loop delivering responses to
//! pending requests, a wait loop reaping the child, and a stderr
//! drain. Outgoing requests are multiplexed by monotonically
//! incremented string ids; writes serialize through the stdin mutex.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Closed`. [`start`]
//! (McpClient::start) performs the whole left half (spawn, handshake)
//! and hands back a running client; the `done` token cancels when the
//! session ends for any reason, and [`close`](McpClient::close) is the
//! explicit right half.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use clawgate_types::config::{McpFraming, McpServerConfig};

use super::framing::{encode_frame, read_frame};
use super::types::{
    CallToolOutcome, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolDefinition,
};
use crate::error::{Result, ServiceError};

/// The MCP protocol version sent during initialize.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Deadline for the initialize handshake.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for ordinary RPCs when the caller brings none.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `close` waits for the wait loop to reap the child.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Cap on `tools/list` pagination.
const MAX_TOOL_PAGES: usize = 50;

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

struct StdioTransport {
    stdin: Mutex<Option<ChildStdin>>,
    framing: McpFraming,
    pending: PendingMap,
    kill: CancellationToken,
}

struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

/// A running MCP client session.
pub struct McpClient {
    name: String,
    response_limit: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    done: CancellationToken,
    transport: Transport,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("response_limit", &self.response_limit)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Spawn (or connect) and perform the initialize handshake. On
    /// handshake failure the session is closed before the error is
    /// returned.
    pub async fn start(name: &str, config: &McpServerConfig) -> Result<Arc<Self>> {
        let client = if let Some(url) = &config.url {
            Arc::new(Self {
                name: name.to_string(),
                response_limit: config.response_limit,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                done: CancellationToken::new(),
                transport: Transport::Http(HttpTransport {
                    http: reqwest::Client::new(),
                    endpoint: url.clone(),
                }),
            })
        } else {
            Self::spawn_stdio(name, config).await?
        };

        debug!(server = %name, "mcp session starting, sending initialize");
        match client.initialize().await {
            Ok(()) => Ok(client),
            Err(e) => {
                client.close().await;
                Err(e)
            }
        }
    }

    async fn spawn_stdio(name: &str, config: &McpServerConfig) -> Result<Arc<Self>> {
        if config.command.is_empty() {
            return Err(ServiceError::McpTransport(format!(
                "server {name} has neither a command nor a url"
            )));
        }

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ServiceError::McpTransport(format!("failed to spawn {}: {e}", config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServiceError::McpTransport("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::McpTransport("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::McpTransport("failed to capture stderr".into()))?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let done = CancellationToken::new();
        let kill = CancellationToken::new();

        let client = Arc::new(Self {
            name: name.to_string(),
            response_limit: config.response_limit,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            done: done.clone(),
            transport: Transport::Stdio(StdioTransport {
                stdin: Mutex::new(Some(stdin)),
                framing: config.framing,
                pending: pending.clone(),
                kill: kill.clone(),
            }),
        });

        spawn_read_loop(name.to_string(), stdout, config.framing, pending.clone(), done.clone());
        spawn_wait_loop(name.to_string(), child, kill, pending, done);
        spawn_stderr_drain(name.to_string(), stderr);

        Ok(client)
    }

    /// The server name this client talks to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A token cancelled when the session ends (child exit, read
    /// failure, or close).
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Whether the session is still usable.
    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.done.is_cancelled()
    }

    async fn initialize(&self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "clientInfo": {
                        "name": "clawgate",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
                INIT_TIMEOUT,
            )
            .await?;
        debug!(
            server = %self.name,
            peer = %result.get("serverInfo").and_then(|v| v.get("name")).and_then(|v| v.as_str()).unwrap_or(""),
            protocol = %result.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or(MCP_PROTOCOL_VERSION),
            "mcp session initialized"
        );
        self.notify("notifications/initialized", serde_json::json!({}))
            .await
    }

    /// Send a request and return its `result` value. JSON-RPC errors
    /// from the server become [`ServiceError::McpProtocol`].
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServiceError::McpTransport("client closed".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let request = JsonRpcRequest::new(&id, method, params);
        debug!(server = %self.name, method, id = %id, "sending mcp request");

        let response = match &self.transport {
            Transport::Stdio(t) => t.request(&id, &request, timeout).await?,
            Transport::Http(t) => t.request(&request, timeout).await?,
        };

        if let Some(err) = response.error {
            return Err(ServiceError::McpProtocol(format!(
                "code={}, message={}",
                err.code, err.message
            )));
        }
        response
            .result
            .ok_or_else(|| ServiceError::McpProtocol("empty result".into()))
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        match &self.transport {
            Transport::Stdio(t) => t.notify(&notif).await,
            Transport::Http(t) => t.notify(&notif).await,
        }
    }

    /// List all tools, paginating via `nextCursor` until exhausted or
    /// the page cap is reached.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let result = self.request("tools/list", params, CALL_TIMEOUT).await?;
            let page: Vec<ToolDefinition> = serde_json::from_value(
                result
                    .get("tools")
                    .cloned()
                    .unwrap_or_else(|| serde_json::Value::Array(vec![])),
            )?;
            tools.extend(page);
            match result.get("nextCursor").and_then(|v| v.as_str()) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => return Ok(tools),
            }
        }
        warn!(server = %self.name, pages = MAX_TOOL_PAGES, "tools/list page cap reached");
        Ok(tools)
    }

    /// Call a tool and normalize the response.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolOutcome> {
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
                CALL_TIMEOUT,
            )
            .await?;
        Ok(normalize_tool_result(&result, self.response_limit))
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value> {
        self.request(
            "resources/read",
            serde_json::json!({ "uri": uri }),
            CALL_TIMEOUT,
        )
        .await
    }

    /// Close the session: close stdin, kill the child, wait briefly
    /// for the reaper, and fail every pending request.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(server = %self.name, "closing mcp session");
        match &self.transport {
            Transport::Stdio(t) => {
                {
                    let mut stdin = t.stdin.lock().await;
                    *stdin = None;
                }
                t.kill.cancel();
                let _ = tokio::time::timeout(CLOSE_WAIT, self.done.cancelled()).await;
                fail_pending(&t.pending, "client closed");
            }
            Transport::Http(_) => {
                self.done.cancel();
            }
        }
    }
}

impl StdioTransport {
    async fn request(
        &self,
        id: &str,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.to_string(), tx);

        if let Err(e) = self.write(&serde_json::to_vec(request)?).await {
            self.pending.lock().unwrap().remove(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ServiceError::McpTransport(
                "server closed the connection before responding".into(),
            )),
            Err(_) => {
                self.pending.lock().unwrap().remove(id);
                Err(ServiceError::McpTransport(format!(
                    "request {id} timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn notify(&self, notif: &JsonRpcNotification) -> Result<()> {
        self.write(&serde_json::to_vec(notif)?).await
    }

    async fn write(&self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload, self.framing);
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| ServiceError::McpTransport("stdin closed".into()))?;
        stdin
            .write_all(&frame)
            .await
            .map_err(|e| ServiceError::McpTransport(format!("failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ServiceError::McpTransport(format!("failed to flush stdin: {e}")))
    }
}

impl HttpTransport {
    async fn request(
        &self,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let send = self.http.post(&self.endpoint).json(request).send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| {
                ServiceError::McpTransport(format!(
                    "http request timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| ServiceError::McpTransport(format!("http request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::McpTransport(format!("http {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::McpTransport(format!("failed to parse response: {e}")))
    }

    async fn notify(&self, notif: &JsonRpcNotification) -> Result<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(notif)
            .send()
            .await
            .map_err(|e| ServiceError::McpTransport(format!("http notification failed: {e}")))?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "http notification got non-success status");
        }
        Ok(())
    }
}

fn spawn_read_loop(
    name: String,
    stdout: tokio::process::ChildStdout,
    framing: McpFraming,
    pending: PendingMap,
    done: CancellationToken,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        loop {
            match read_frame(&mut reader, framing).await {
                Ok(Some(frame)) => match serde_json::from_slice::<JsonRpcResponse>(&frame) {
                    Ok(response) => {
                        let Some(id) = response.id_string() else {
                            // Server-initiated notification; ignored.
                            continue;
                        };
                        let sender = pending.lock().unwrap().remove(&id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                warn!(server = %name, id = %id, "response with no pending request");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(server = %name, error = %e, "ignoring unparsable frame");
                    }
                },
                Ok(None) => {
                    debug!(server = %name, "server closed stdout");
                    break;
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "read loop error, exiting");
                    break;
                }
            }
        }
        fail_pending(&pending, "server closed the connection");
        done.cancel();
    });
}

fn spawn_wait_loop(
    name: String,
    mut child: Child,
    kill: CancellationToken,
    pending: PendingMap,
    done: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => debug!(server = %name, %status, "mcp server exited"),
                    Err(e) => warn!(server = %name, error = %e, "failed to wait on mcp server"),
                }
            }
            _ = kill.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                debug!(server = %name, "mcp server killed");
            }
        }
        fail_pending(&pending, "server process exited");
        done.cancel();
    });
}

fn spawn_stderr_drain(name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %name, "stderr: {line}");
        }
    });
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = {
        let mut map = pending.lock().unwrap();
        map.drain().collect()
    };
    if !drained.is_empty() {
        debug!(count = drained.len(), reason, "failing pending mcp requests");
    }
    // Dropping the senders resolves every waiting receiver with an error.
}

/// Flatten a `tools/call` result into text: concatenate text blocks,
/// append JSON-encoded structured content, truncate to `limit` bytes.
pub fn normalize_tool_result(result: &serde_json::Value, limit: usize) -> CallToolOutcome {
    let mut content = String::new();
    if let Some(blocks) = result.get("content").and_then(|v| v.as_array()) {
        for block in blocks {
            if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(text);
                }
            }
        }
    }
    if let Some(structured) = result.get("structuredContent") {
        if !structured.is_null() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&serde_json::to_string(structured).unwrap_or_default());
        }
    }

    if content.len() > limit {
        let mut cut = limit;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("…[truncated]");
    }

    CallToolOutcome {
        content,
        is_error: result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}
