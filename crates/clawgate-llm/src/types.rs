//! Request and response types for LLM chat completion calls.
//!
//! These types mirror the OpenAI chat completion wire format, which is
//! the de facto standard across providers. They are standalone and have
//! no dependency on other clawgate crates.

use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message author ("system", "user", "assistant", "tool").
    pub role: String,

    /// The content of the message.
    pub content: String,

    /// For tool-result messages, the ID of the tool call this answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the assistant in this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    /// Create a simple message with role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Create a tool-result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new("tool", content)
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call. Usable verbatim as
    /// `tool_call_id` on the matching tool-result message.
    pub id: String,

    /// The type of tool call. Currently always "function".
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,

    /// The function to invoke.
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".into()
}

/// A function invocation within a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// The name of the function to call.
    pub name: String,

    /// The arguments as a JSON string.
    pub arguments: String,
}

/// Options the core recognizes on a chat call. Anything the concrete
/// provider does not support is silently dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f64>,

    /// Prompt cache key, sent only to endpoints known to support it.
    pub prompt_cache_key: Option<String>,
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The model identifier as the provider expects it.
    pub model: String,

    /// The conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Tool definitions available to the model (OpenAI function shape).
    pub tools: Vec<serde_json::Value>,

    /// Call options.
    pub options: ChatOptions,
}

impl ChatRequest {
    /// Create a minimal chat request with a model and messages.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            options: ChatOptions::default(),
        }
    }
}

/// A chat completion response, reduced to the shape the core consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    /// Assistant text content (may be empty when only tools were called).
    pub content: String,

    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,

    /// Why generation stopped ("stop", "tool_calls", "length").
    pub finish_reason: Option<String>,

    /// Token usage, if the provider reported it.
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// A plain-text response, convenient in tests.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }
    }
}

/// Token usage statistics for a completion request.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Usage {
    /// Number of tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,

    /// Number of tokens in the generated completion.
    #[serde(default)]
    pub completion_tokens: u32,

    /// Total tokens used (prompt + completion).
    #[serde(default)]
    pub total_tokens: u32,
}
