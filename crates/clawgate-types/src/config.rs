//! Configuration tree for the clawgate daemon.
//!
//! Loaded from `~/.clawgate/config.toml` (or `--config`). Every field
//! has a serde default so a partial file -- or none at all -- yields a
//! runnable configuration with one `main` agent and an open gateway on
//! localhost.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway server settings (WebSocket + HTTP API).
    pub gateway: GatewayConfig,

    /// Agent definitions and routing bindings.
    pub agents: AgentsConfig,

    /// LLM provider endpoints.
    pub providers: Vec<ProviderEndpoint>,

    /// MCP tool-server definitions.
    pub mcp: McpConfig,

    /// Session persistence settings.
    pub sessions: SessionsConfig,

    /// Message bus settings.
    pub bus: BusConfig,

    /// Rate-limit buckets.
    pub limits: LimitsConfig,
}

/// Gateway server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Server name reported by the `connect` handshake.
    pub name: String,

    /// WebSocket auth token. Empty disables token checking.
    pub auth_token: String,

    /// WebSocket auth password. Empty disables password checking.
    pub auth_password: String,

    /// Bearer key for the HTTP API. Empty means open mode.
    pub api_key: String,

    /// Heartbeat interval in minutes. 0 disables the heartbeat.
    pub heartbeat_interval_minutes: u64,

    /// Prompt content delivered on each heartbeat.
    pub heartbeat_prompt: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8710,
            name: "clawgate".into(),
            auth_token: String::new(),
            auth_password: String::new(),
            api_key: String::new(),
            heartbeat_interval_minutes: 0,
            heartbeat_prompt: "Heartbeat: check in and report anything noteworthy.".into(),
        }
    }
}

/// Agent definitions plus routing bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Defaults applied to agents that omit a field.
    pub defaults: AgentDefaults,

    /// Extra agents beyond the implicit `main`.
    pub list: Vec<AgentEntry>,

    /// Longest-prefix bindings from external session keys to agents.
    pub web_bindings: Vec<WebSessionAgentBinding>,
}

/// Defaults applied to every agent that omits a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Ordered model candidates, e.g. `["anthropic/claude-sonnet-4-5",
    /// "openai/gpt-4o"]`. Tried in order by the fallback chain.
    pub models: Vec<String>,

    /// Maximum tokens per completion.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f64,

    /// Cap on tool-call iterations per user turn.
    pub max_tool_iterations: u32,

    /// Workspace directory for agents that omit one.
    pub workspace: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 8,
            workspace: "~/.clawgate/workspace".into(),
        }
    }
}

/// A named agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Unique agent id.
    pub id: String,

    /// Workspace override.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Model-candidate override. Empty uses the defaults.
    #[serde(default)]
    pub models: Vec<String>,
}

/// Binds external session keys beginning with `session_key_prefix` to
/// an agent. Longer prefixes win over shorter ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSessionAgentBinding {
    /// Prefix matched against the external (display) session key.
    pub session_key_prefix: String,

    /// Agent that owns matching sessions.
    pub agent_id: String,
}

/// An LLM provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoint {
    /// Provider name, used as the model prefix (e.g. "openai").
    pub name: String,

    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Single API key. Ignored when `api_keys` is non-empty.
    pub api_key: String,

    /// Multiple API keys for round-robin rotation.
    pub api_keys: Vec<String>,

    /// Whether the endpoint accepts `prompt_cache_key`.
    pub supports_prompt_cache: bool,
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            api_keys: Vec::new(),
            supports_prompt_cache: false,
        }
    }
}

/// MCP tool-server definitions, keyed by server name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Server name to definition.
    pub servers: HashMap<String, McpServerConfig>,
}

/// Wire framing used by an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpFraming {
    /// `Content-Length: N\r\n\r\n<body>` (MCP default).
    #[default]
    ContentLength,
    /// One JSON object per line.
    Jsonl,
}

/// Definition of one MCP tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    /// Whether the server may be started.
    pub enabled: bool,

    /// Child process command (stdio transport).
    pub command: String,

    /// Child process arguments.
    pub args: Vec<String>,

    /// Extra environment variables merged into the child's env.
    pub env: HashMap<String, String>,

    /// Working directory for the child process.
    pub working_dir: Option<String>,

    /// HTTP endpoint. When set, the HTTP transport is used and
    /// `command` is ignored.
    pub url: Option<String>,

    /// Wire framing for the stdio transport.
    pub framing: McpFraming,

    /// Seconds of inactivity before the idle reaper closes the session.
    pub idle_timeout_secs: u64,

    /// Only expose these tools. Empty exposes all.
    pub include_tools: Vec<String>,

    /// Never expose these tools.
    pub exclude_tools: Vec<String>,

    /// Byte cap applied to tool-call responses before truncation.
    pub response_limit: usize,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            url: None,
            framing: McpFraming::default(),
            idle_timeout_secs: 300,
            include_tools: Vec::new(),
            exclude_tools: Vec::new(),
            response_limit: 65_536,
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Directory for per-session JSONL files. `None` keeps sessions
    /// in memory only.
    pub dir: Option<PathBuf>,
}

/// Message bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of the inbound and outbound channels. Publishers to a
    /// full inbound channel block (backpressure onto transports).
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// One token bucket: `capacity` tokens, refilled at `refill_per_sec`.
/// A capacity of 0 disables the bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Burst capacity.
    pub capacity: u32,

    /// Tokens restored per second.
    pub refill_per_sec: f64,
}

/// Rate-limit buckets checked before admitting work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Applied across all senders.
    pub global: BucketConfig,

    /// Applied per sender id.
    pub per_user: BucketConfig,

    /// Applied per tool name.
    pub per_tool: BucketConfig,
}
