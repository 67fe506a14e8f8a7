//! Message event types for the gateway bus.
//!
//! [`InboundMessage`] represents a user turn arriving from a transport
//! (WebSocket, HTTP, heartbeat), while [`OutboundMessage`] represents
//! assistant output heading back out. The `chat_id` on both is the
//! concatenation `"{session_key}|{run_id}"` so that one user turn and
//! all of its assistant events correlate; use [`join_chat_id`] /
//! [`split_chat_id`] rather than formatting by hand.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of an outbound assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// An intermediate turn state (e.g. text emitted alongside tool calls).
    Partial,
    /// The final assistant message of the turn.
    #[default]
    Final,
}

/// Join a session key and run id into a `chat_id`.
pub fn join_chat_id(session_key: &str, run_id: &str) -> String {
    format!("{session_key}|{run_id}")
}

/// Split a `chat_id` into `(session_key, run_id)`.
///
/// The run id is everything after the *last* `|`, so session keys that
/// themselves contain `|` survive the round trip. A `chat_id` without a
/// separator yields an empty run id.
pub fn split_chat_id(chat_id: &str) -> (&str, &str) {
    match chat_id.rfind('|') {
        Some(idx) => (&chat_id[..idx], &chat_id[idx + 1..]),
        None => (chat_id, ""),
    }
}

/// An inbound message received from a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport name (e.g. "web", "api", "heartbeat").
    pub channel: String,

    /// Sender identifier within the transport.
    pub sender_id: String,

    /// Correlation id: `"{session_key}|{run_id}"`.
    pub chat_id: String,

    /// Message text content.
    pub content: String,

    /// Session key as supplied by the transport. May be a display key
    /// or an already-resolved `agent:<id>:<display>` internal key; the
    /// agent loop resolves it either way.
    pub session_key: String,

    /// When the message was received.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Arbitrary transport-specific metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// The run id embedded in `chat_id` (empty when absent).
    pub fn run_id(&self) -> &str {
        split_chat_id(&self.chat_id).1
    }
}

/// An outbound message produced by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target transport name.
    pub channel: String,

    /// Correlation id: `"{session_key}|{run_id}"`.
    pub chat_id: String,

    /// Assistant text content.
    pub content: String,

    /// Whether this is a partial or the final message of the turn.
    /// Absent on the wire defaults to final.
    #[serde(default)]
    pub state: MessageState,

    /// Arbitrary transport-specific metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// The session-key half of `chat_id`.
    pub fn session_key(&self) -> &str {
        split_chat_id(&self.chat_id).0
    }

    /// The run-id half of `chat_id`.
    pub fn run_id(&self) -> &str {
        split_chat_id(&self.chat_id).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_round_trip() {
        let chat_id = join_chat_id("agent:main:u42", "R1");
        assert_eq!(chat_id, "agent:main:u42|R1");
        assert_eq!(split_chat_id(&chat_id), ("agent:main:u42", "R1"));
    }

    #[test]
    fn split_uses_last_separator() {
        assert_eq!(split_chat_id("a|b|run9"), ("a|b", "run9"));
    }

    #[test]
    fn split_without_separator() {
        assert_eq!(split_chat_id("heartbeat"), ("heartbeat", ""));
    }

    #[test]
    fn outbound_state_defaults_to_final() {
        let json = r#"{
            "channel": "web",
            "chat_id": "agent:main:u42|R1",
            "content": "hi"
        }"#;
        let msg: OutboundMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.state, MessageState::Final);
        assert_eq!(msg.session_key(), "agent:main:u42");
        assert_eq!(msg.run_id(), "R1");
    }

    #[test]
    fn message_state_serde() {
        assert_eq!(
            serde_json::to_string(&MessageState::Partial).unwrap(),
            "\"partial\""
        );
        assert_eq!(
            serde_json::to_string(&MessageState::Final).unwrap(),
            "\"final\""
        );
    }

    #[test]
    fn inbound_serde_defaults() {
        let json = r#"{
            "channel": "web",
            "sender_id": "u1",
            "chat_id": "agent:main:u1|r1",
            "content": "hello",
            "session_key": "u1"
        }"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(msg.metadata.is_empty());
        assert_eq!(msg.run_id(), "r1");
    }
}
