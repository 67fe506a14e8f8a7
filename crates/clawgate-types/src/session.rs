//! Conversation session types.
//!
//! [`Session`] stores an append-only message history for one
//! conversation thread, identified by an internal session key of the
//! form `agent:<agent_id>:<display_key>`. Messages are typed
//! ([`Message`]) so that tool-call bookkeeping is checked at compile
//! time rather than carried in loose JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tool invocation announced by an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Provider-assigned id; echoed back as `tool_call_id` on the
    /// matching tool-result message.
    pub id: String,

    /// Tool name.
    pub name: String,

    /// Arguments as a JSON-encoded string.
    pub arguments: String,
}

/// One turn in a session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role: "user", "assistant", "tool", or "system".
    pub role: String,

    /// Text content.
    pub content: String,

    /// Tool calls announced by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,

    /// For tool-result messages, the id of the tool call answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// When the message was appended. Absent on histories imported
    /// from sources that store no per-message time; the wire layer
    /// synthesizes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a plain message with role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Create an assistant message that announces tool calls.
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::new("assistant", content)
        }
    }

    /// Create a tool-result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new("tool", content)
        }
    }
}

/// A conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Internal session key: `agent:<agent_id>:<display_key>`.
    pub key: String,

    /// Human-facing label, patchable via the gateway.
    #[serde(default)]
    pub label: String,

    /// Ordered message history (append-only).
    #[serde(default)]
    pub messages: Vec<Message>,

    /// When the session was first created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the session was last mutated. Non-decreasing.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given internal key.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            label: String::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, bumping `updated_at` without letting it go
    /// backwards under clock adjustment.
    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.touch();
    }

    /// Bump `updated_at` to now, keeping it non-decreasing.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// The last `max` messages of the history.
    pub fn tail(&self, max: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(max);
        &self.messages[start..]
    }
}

/// The display key of the per-agent primary session.
pub const MAIN_SESSION: &str = "main";

/// The display key of the hidden heartbeat session.
pub const HEARTBEAT_SESSION: &str = "heartbeat";
