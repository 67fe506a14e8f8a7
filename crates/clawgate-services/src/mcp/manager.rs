//! The MCP manager: one instance slot per configured server.
//!
//! Servers are started lazily on first use and restarted on demand,
//! under a crash-rate limit (three crashes inside the window refuse
//! further restarts until the window drains). An idle reaper closes
//! sessions that have not been used within their configured idle
//! timeout; the next call starts them again.
//!
//! The instance map itself is immutable after construction; each
//! instance carries an async mutex that serializes its lifecycle
//! transitions, so concurrent callers cannot double-spawn a server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clawgate_core::tools::{Tool, ToolRegistry};
use clawgate_types::config::McpServerConfig;
use clawgate_types::GateError;

use super::client::McpClient;
use super::types::{CallToolOutcome, ToolDefinition};
use crate::error::{Result, ServiceError};

/// Sliding window for the crash-rate limit.
const DEFAULT_CRASH_WINDOW: Duration = Duration::from_secs(60);

/// Crashes inside the window that refuse a restart.
const MAX_CRASHES_PER_WINDOW: usize = 3;

/// Default idle-reaper cadence.
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Cap on qualified tool names.
const MAX_TOOL_NAME_LEN: usize = 64;

struct InstanceState {
    client: Option<Arc<McpClient>>,
    tools: Option<Vec<ToolDefinition>>,
    last_used: Option<Instant>,
    crashes: VecDeque<Instant>,
}

struct ServerInstance {
    name: String,
    config: McpServerConfig,
    state: Mutex<InstanceState>,
}

/// Owns every configured MCP server.
pub struct McpManager {
    servers: HashMap<String, Arc<ServerInstance>>,
    crash_window: Duration,
    reap_interval: Duration,
    cancel: CancellationToken,
    reaper: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl McpManager {
    /// Create a manager over the configured servers.
    pub fn new(configs: HashMap<String, McpServerConfig>) -> Self {
        let servers = configs
            .into_iter()
            .map(|(name, config)| {
                let instance = Arc::new(ServerInstance {
                    name: name.clone(),
                    config,
                    state: Mutex::new(InstanceState {
                        client: None,
                        tools: None,
                        last_used: None,
                        crashes: VecDeque::new(),
                    }),
                });
                (name, instance)
            })
            .collect();
        Self {
            servers,
            crash_window: DEFAULT_CRASH_WINDOW,
            reap_interval: DEFAULT_REAP_INTERVAL,
            cancel: CancellationToken::new(),
            reaper: StdMutex::new(None),
        }
    }

    /// Override the crash-rate window (tests).
    pub fn with_crash_window(mut self, window: Duration) -> Self {
        self.crash_window = window;
        self
    }

    /// Override the idle-reaper cadence (tests).
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sorted names of configured servers.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    fn instance(&self, name: &str) -> Result<Arc<ServerInstance>> {
        let instance = self
            .servers
            .get(name)
            .ok_or_else(|| ServiceError::McpUnavailable(format!("unknown server: {name}")))?;
        if !instance.config.enabled {
            return Err(ServiceError::McpUnavailable(format!(
                "server {name} is disabled"
            )));
        }
        Ok(instance.clone())
    }

    /// Return the live session for `name`, starting it if necessary.
    pub async fn ensure_running(&self, name: &str) -> Result<Arc<McpClient>> {
        let instance = self.instance(name)?;
        let mut state = instance.state.lock().await;

        if let Some(client) = state.client.clone() {
            if client.is_live() {
                state.last_used = Some(Instant::now());
                return Ok(client);
            }
            // Session died behind our back; clear it for restart.
            state.client = None;
        }

        // Crash-rate limit: only crashes inside the window count.
        let window = self.crash_window;
        while state
            .crashes
            .front()
            .is_some_and(|t| t.elapsed() >= window)
        {
            state.crashes.pop_front();
        }
        if state.crashes.len() >= MAX_CRASHES_PER_WINDOW {
            return Err(ServiceError::McpUnavailable(format!(
                "server {name} crashed {} times in the last {}s; refusing restart",
                state.crashes.len(),
                window.as_secs()
            )));
        }

        info!(server = %name, "starting mcp server");
        match McpClient::start(name, &instance.config).await {
            Ok(client) => {
                state.client = Some(client.clone());
                state.last_used = Some(Instant::now());
                Ok(client)
            }
            Err(e) => {
                state.crashes.push_back(Instant::now());
                Err(e)
            }
        }
    }

    /// Whether `name` currently has a live session.
    pub async fn is_running(&self, name: &str) -> bool {
        match self.servers.get(name) {
            Some(instance) => {
                let state = instance.state.lock().await;
                state.client.as_ref().is_some_and(|c| c.is_live())
            }
            None => false,
        }
    }

    /// Cached tool definitions for `name`, fetching on the first call.
    pub async fn get_tools(&self, name: &str) -> Result<Vec<ToolDefinition>> {
        let instance = self.instance(name)?;
        {
            let state = instance.state.lock().await;
            if let Some(tools) = &state.tools {
                return Ok(tools.clone());
            }
        }

        let client = self.ensure_running(name).await?;
        match client.list_tools().await {
            Ok(tools) => {
                let filtered = filter_tools(tools, &instance.config);
                let mut state = instance.state.lock().await;
                state.tools = Some(filtered.clone());
                state.last_used = Some(Instant::now());
                Ok(filtered)
            }
            Err(e) => {
                self.handle_call_error(&instance, &e).await;
                Err(e)
            }
        }
    }

    /// Call a tool on `name`.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolOutcome> {
        let instance = self.instance(name)?;
        let client = self.ensure_running(name).await?;
        match client.call_tool(tool, arguments).await {
            Ok(outcome) => {
                instance.state.lock().await.last_used = Some(Instant::now());
                Ok(outcome)
            }
            Err(e) => {
                self.handle_call_error(&instance, &e).await;
                Err(e)
            }
        }
    }

    /// Read a resource from `name`.
    pub async fn read_resource(&self, name: &str, uri: &str) -> Result<serde_json::Value> {
        let instance = self.instance(name)?;
        let client = self.ensure_running(name).await?;
        match client.read_resource(uri).await {
            Ok(value) => {
                instance.state.lock().await.last_used = Some(Instant::now());
                Ok(value)
            }
            Err(e) => {
                self.handle_call_error(&instance, &e).await;
                Err(e)
            }
        }
    }

    /// On a transport-like failure, close the session and record a
    /// crash so the next call restarts under the rate-limit rule.
    async fn handle_call_error(&self, instance: &ServerInstance, err: &ServiceError) {
        if !is_transport_error(err) {
            return;
        }
        warn!(server = %instance.name, error = %err, "transport failure, closing mcp session");
        let client = {
            let mut state = instance.state.lock().await;
            state.crashes.push_back(Instant::now());
            state.client.take()
        };
        if let Some(client) = client {
            client.close().await;
        }
    }

    /// Start the idle reaper task.
    pub fn start_reaper(self: &Arc<Self>) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.reap_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = interval.tick() => manager.reap_idle().await,
                }
            }
        });
        *self.reaper.lock().unwrap() = Some(handle);
    }

    async fn reap_idle(&self) {
        for instance in self.servers.values() {
            let idle_timeout = Duration::from_secs(instance.config.idle_timeout_secs);
            let to_close = {
                let mut state = instance.state.lock().await;
                let idle = state
                    .last_used
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                match &state.client {
                    Some(client) if client.is_live() && idle >= idle_timeout => {
                        let client = client.clone();
                        state.client = None;
                        state.tools = None;
                        Some(client)
                    }
                    _ => None,
                }
            };
            if let Some(client) = to_close {
                info!(server = %instance.name, "closing idle mcp session");
                client.close().await;
            }
        }
    }

    /// Close every session and stop the reaper.
    pub async fn stop(&self) {
        self.cancel.cancel();
        for instance in self.servers.values() {
            let client = instance.state.lock().await.client.take();
            if let Some(client) = client {
                client.close().await;
            }
        }
        let handle = self.reaper.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!("mcp manager stopped");
    }
}

fn filter_tools(tools: Vec<ToolDefinition>, config: &McpServerConfig) -> Vec<ToolDefinition> {
    tools
        .into_iter()
        .filter(|t| {
            (config.include_tools.is_empty() || config.include_tools.contains(&t.name))
                && !config.exclude_tools.contains(&t.name)
        })
        .collect()
}

/// Substrings that mark an error as transport-like (the session is
/// presumed dead, not just this call).
const TRANSPORT_PATTERNS: &[&str] = &[
    "write", "read", "pipe", "process", "http", "connection", "eof", "spawn", "closed", "exited",
];

fn is_transport_error(err: &ServiceError) -> bool {
    match err {
        ServiceError::Io(_) => true,
        ServiceError::McpTransport(msg) => {
            let lowered = msg.to_lowercase();
            TRANSPORT_PATTERNS.iter().any(|p| lowered.contains(p))
        }
        _ => false,
    }
}

/// Build the external name for a server tool:
/// `mcp_<sanitized-server>__<sanitized-tool>`, lowercase alphanumerics
/// and underscores, capped at 64 chars. Collisions append `_2`, `_3`,
/// ..., shortening the server part as needed.
pub fn qualify_tool_name(server: &str, tool: &str, taken: &HashSet<String>) -> String {
    let server_part = sanitize(server);
    let tool_part = sanitize(tool);

    let mut n = 1usize;
    loop {
        let suffix = if n == 1 {
            String::new()
        } else {
            format!("_{n}")
        };
        let budget = MAX_TOOL_NAME_LEN
            .saturating_sub("mcp_".len() + "__".len() + tool_part.len() + suffix.len());
        let server_short: String = server_part.chars().take(budget).collect();
        let mut candidate = format!("mcp_{server_short}__{tool_part}{suffix}");
        if candidate.len() > MAX_TOOL_NAME_LEN {
            candidate.truncate(MAX_TOOL_NAME_LEN - suffix.len());
            candidate.push_str(&suffix);
        }
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn sanitize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A registry tool backed by an MCP server.
pub struct McpToolProxy {
    manager: Arc<McpManager>,
    server: String,
    tool: String,
    qualified: String,
    description: String,
    schema: serde_json::Value,
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.qualified
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String> {
        match self.manager.call_tool(&self.server, &self.tool, args).await {
            Ok(outcome) if outcome.is_error => Err(GateError::Tool {
                message: outcome.content,
            }),
            Ok(outcome) => Ok(outcome.content),
            Err(e) => Err(GateError::Tool {
                message: e.to_string(),
            }),
        }
    }
}

/// Discover every enabled server's tools and register qualified
/// proxies in `registry`. Servers that fail discovery are skipped with
/// a warning. Returns the number of tools registered.
pub async fn register_mcp_tools(manager: &Arc<McpManager>, registry: &ToolRegistry) -> usize {
    let mut taken: HashSet<String> = registry.names().into_iter().collect();
    let mut count = 0;
    for name in manager.server_names() {
        let tools = match manager.get_tools(&name).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %name, error = %e, "skipping mcp server tool discovery");
                continue;
            }
        };
        for def in tools {
            let qualified = qualify_tool_name(&name, &def.name, &taken);
            taken.insert(qualified.clone());
            registry.register(Arc::new(McpToolProxy {
                manager: manager.clone(),
                server: name.clone(),
                tool: def.name,
                qualified,
                description: def.description,
                schema: if def.input_schema.is_null() {
                    serde_json::json!({"type": "object"})
                } else {
                    def.input_schema
                },
            }));
            count += 1;
        }
    }
    info!(count, "mcp tools registered");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawgate_types::config::McpFraming;

    fn sh_server(script: &str, idle_timeout_secs: u64) -> McpServerConfig {
        McpServerConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            framing: McpFraming::Jsonl,
            idle_timeout_secs,
            ..Default::default()
        }
    }

    /// Responds to initialize, then tools/list (id 2), then one
    /// tools/call (id 3), then idles.
    const LISTER: &str = r#"
read _init
printf '%s\n' '{"jsonrpc":"2.0","id":"1","result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0"}}}'
read _notif
read _r1
printf '%s\n' '{"jsonrpc":"2.0","id":"2","result":{"tools":[{"name":"greet","description":"Greets someone","inputSchema":{"type":"object"}}]}}'
read _r2
printf '%s\n' '{"jsonrpc":"2.0","id":"3","result":{"content":[{"type":"text","text":"hello from proxy"}],"isError":false}}'
while read _; do :; done
"#;

    /// Handshakes, then answers every request with a canned call result.
    const GREETER: &str = r#"
read _init
printf '%s\n' '{"jsonrpc":"2.0","id":"1","result":{"protocolVersion":"2025-06-18","capabilities":{},"serverInfo":{"name":"mock","version":"0"}}}'
read _notif
while read _req; do
  printf '%s\n' '{"jsonrpc":"2.0","id":"2","result":{"content":[{"type":"text","text":"hello Ada"}]}}'
done
"#;

    fn manager_with(name: &str, config: McpServerConfig) -> Arc<McpManager> {
        let mut configs = HashMap::new();
        configs.insert(name.to_string(), config);
        Arc::new(McpManager::new(configs))
    }

    #[tokio::test]
    async fn unknown_server_is_rejected() {
        let manager = manager_with("echo", sh_server(GREETER, 300));
        let err = manager.ensure_running("ghost").await.unwrap_err();
        assert!(err.to_string().contains("unknown server"));
    }

    #[tokio::test]
    async fn disabled_server_is_rejected() {
        let mut config = sh_server(GREETER, 300);
        config.enabled = false;
        let manager = manager_with("echo", config);
        let err = manager.ensure_running("echo").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn ensure_running_reuses_live_session() {
        let manager = manager_with("echo", sh_server(GREETER, 300));
        let first = manager.ensure_running("echo").await.unwrap();
        let second = manager.ensure_running("echo").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        manager.stop().await;
    }

    #[tokio::test]
    async fn crash_limit_refuses_fourth_start() {
        let config = McpServerConfig {
            command: "/nonexistent-clawgate-test-binary".into(),
            framing: McpFraming::Jsonl,
            ..Default::default()
        };
        let manager = manager_with("broken", config);

        for _ in 0..3 {
            let err = manager.ensure_running("broken").await.unwrap_err();
            assert!(err.to_string().contains("spawn"), "got: {err}");
        }
        let err = manager.ensure_running("broken").await.unwrap_err();
        assert!(err.to_string().contains("refusing restart"), "got: {err}");
    }

    #[tokio::test]
    async fn crash_window_drains_and_allows_restart() {
        let config = McpServerConfig {
            command: "/nonexistent-clawgate-test-binary".into(),
            framing: McpFraming::Jsonl,
            ..Default::default()
        };
        let mut configs = HashMap::new();
        configs.insert("broken".to_string(), config);
        let manager =
            Arc::new(McpManager::new(configs).with_crash_window(Duration::from_millis(100)));

        for _ in 0..3 {
            let _ = manager.ensure_running("broken").await.unwrap_err();
        }
        let err = manager.ensure_running("broken").await.unwrap_err();
        assert!(err.to_string().contains("refusing restart"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        // The window drained, so the start is attempted again (and
        // fails with the spawn error, not the refusal).
        let err = manager.ensure_running("broken").await.unwrap_err();
        assert!(err.to_string().contains("spawn"), "got: {err}");
    }

    #[tokio::test]
    async fn idle_reaper_closes_and_next_call_restarts() {
        let mut configs = HashMap::new();
        configs.insert("echo".to_string(), sh_server(GREETER, 1));
        let manager =
            Arc::new(McpManager::new(configs).with_reap_interval(Duration::from_millis(100)));
        manager.start_reaper();

        manager.ensure_running("echo").await.unwrap();
        assert!(manager.is_running("echo").await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(
            !manager.is_running("echo").await,
            "idle session should have been reaped"
        );

        // A fresh call restarts the server.
        let outcome = manager
            .call_tool("echo", "greet", serde_json::json!({"name": "Ada"}))
            .await
            .unwrap();
        assert_eq!(outcome.content, "hello Ada");
        manager.stop().await;
    }

    #[tokio::test]
    async fn tool_discovery_and_proxy_round_trip() {
        let manager = manager_with("files", sh_server(LISTER, 300));
        let registry = ToolRegistry::new();

        let count = register_mcp_tools(&manager, &registry).await;
        assert_eq!(count, 1);
        assert_eq!(registry.names(), vec!["mcp_files__greet"]);

        let result = registry
            .execute("mcp_files__greet", serde_json::json!({"name": "Ada"}))
            .await
            .unwrap();
        assert_eq!(result, "hello from proxy");
        manager.stop().await;
    }

    #[tokio::test]
    async fn get_tools_serves_from_cache() {
        let manager = manager_with("files", sh_server(LISTER, 300));
        let first = manager.get_tools("files").await.unwrap();
        assert_eq!(first.len(), 1);
        // The mock only answers tools/list once; a cache miss here
        // would hang until the call timeout.
        let second = manager.get_tools("files").await.unwrap();
        assert_eq!(second.len(), 1);
        manager.stop().await;
    }

    #[test]
    fn filter_tools_include_exclude() {
        let tools = vec![
            ToolDefinition {
                name: "a".into(),
                description: String::new(),
                input_schema: serde_json::Value::Null,
            },
            ToolDefinition {
                name: "b".into(),
                description: String::new(),
                input_schema: serde_json::Value::Null,
            },
        ];
        let mut config = McpServerConfig::default();
        config.exclude_tools = vec!["b".into()];
        let filtered = filter_tools(tools.clone(), &config);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "a");

        let mut config = McpServerConfig::default();
        config.include_tools = vec!["b".into()];
        let filtered = filter_tools(tools, &config);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "b");
    }

    #[test]
    fn qualify_sanitizes_and_prefixes() {
        let taken = HashSet::new();
        assert_eq!(
            qualify_tool_name("GitHub", "create-issue", &taken),
            "mcp_github__create_issue"
        );
    }

    #[test]
    fn qualify_resolves_collisions_with_suffix() {
        let mut taken = HashSet::new();
        taken.insert("mcp_github__search".to_string());
        assert_eq!(
            qualify_tool_name("github", "search", &taken),
            "mcp_github__search_2"
        );
        taken.insert("mcp_github__search_2".to_string());
        assert_eq!(
            qualify_tool_name("github", "search", &taken),
            "mcp_github__search_3"
        );
    }

    #[test]
    fn qualify_caps_length_by_shortening_server() {
        let taken = HashSet::new();
        let name = qualify_tool_name(
            "a-very-long-mcp-server-name-indeed-truly-excessive",
            "list_directory_contents",
            &taken,
        );
        assert!(name.len() <= 64, "{name} is {} chars", name.len());
        assert!(name.starts_with("mcp_"));
        assert!(name.ends_with("__list_directory_contents"));
    }

    #[test]
    fn transport_error_classification() {
        assert!(is_transport_error(&ServiceError::McpTransport(
            "failed to write to stdin: broken pipe".into()
        )));
        assert!(is_transport_error(&ServiceError::McpTransport(
            "server closed the connection before responding".into()
        )));
        assert!(!is_transport_error(&ServiceError::McpTransport(
            "request 4 timed out after 30s".into()
        )));
        assert!(!is_transport_error(&ServiceError::McpProtocol(
            "code=-32601, message=method not found".into()
        )));
    }
}
