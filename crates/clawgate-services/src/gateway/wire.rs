//! History conversion to the client wire shape.
//!
//! Session messages become role-tagged JSON objects with content-block
//! arrays. Each carries a deterministic id derived from its content
//! (`msg-<sha1 prefix>-<index>`) so clients can dedupe across
//! reconnects, and a `createdAt` that falls back to a fixed base plus
//! one second per index when the message has no stored timestamp.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sha1::{Digest, Sha1};

use clawgate_types::session::Message;

/// Convert up to `limit` trailing messages to the wire shape.
pub fn history_to_wire(messages: &[Message], limit: usize) -> Vec<serde_json::Value> {
    let start = messages.len().saturating_sub(limit);
    messages[start..]
        .iter()
        .enumerate()
        .map(|(index, msg)| message_to_wire(msg, start + index))
        .collect()
}

/// Convert one message.
pub fn message_to_wire(msg: &Message, index: usize) -> serde_json::Value {
    let id = message_id(msg, index);
    let created_at = created_at(msg, index);
    match msg.role.as_str() {
        "assistant" => {
            let mut blocks = Vec::new();
            if !msg.content.is_empty() {
                blocks.push(serde_json::json!({"type": "text", "text": msg.content}));
            }
            for call in &msg.tool_calls {
                blocks.push(serde_json::json!({
                    "type": "toolCall",
                    "id": call.id,
                    "name": call.name,
                    "arguments": call.arguments,
                }));
            }
            if blocks.is_empty() {
                blocks.push(serde_json::json!({"type": "text", "text": ""}));
            }
            serde_json::json!({
                "role": "assistant",
                "content": blocks,
                "id": id,
                "createdAt": created_at,
            })
        }
        "tool" => serde_json::json!({
            "role": "toolResult",
            "toolCallId": msg.tool_call_id.clone().unwrap_or_default(),
            "content": [{"type": "text", "text": msg.content}],
            "id": id,
            "createdAt": created_at,
        }),
        role => serde_json::json!({
            "role": role,
            "content": [{"type": "text", "text": msg.content}],
            "id": id,
            "createdAt": created_at,
        }),
    }
}

/// `msg-<sha1(role|content|tool_call_id|each(tool.id|tool.name))[:8]>-<index>`.
fn message_id(msg: &Message, index: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(msg.role.as_bytes());
    hasher.update(b"|");
    hasher.update(msg.content.as_bytes());
    hasher.update(b"|");
    hasher.update(msg.tool_call_id.as_deref().unwrap_or("").as_bytes());
    for call in &msg.tool_calls {
        hasher.update(b"|");
        hasher.update(call.id.as_bytes());
        hasher.update(b"|");
        hasher.update(call.name.as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("msg-{}-{}", &hex[..8], index)
}

/// The synthesis base for messages without a stored timestamp.
fn synth_base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn created_at(msg: &Message, index: usize) -> String {
    let ts = msg
        .timestamp
        .unwrap_or_else(|| synth_base() + Duration::milliseconds(index as i64 * 1000));
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawgate_types::session::ToolCallRecord;

    fn stripped(mut msg: Message) -> Message {
        msg.timestamp = None;
        msg
    }

    #[test]
    fn user_message_shape() {
        let wire = message_to_wire(&stripped(Message::user("hello")), 0);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "text");
        assert_eq!(wire["content"][0]["text"], "hello");
        assert!(wire["id"].as_str().unwrap().starts_with("msg-"));
        assert_eq!(wire["createdAt"], "2026-01-01T00:00:00.000Z");
    }

    #[test]
    fn assistant_with_tool_calls() {
        let msg = Message::assistant_with_tools(
            "checking",
            vec![ToolCallRecord {
                id: "tc-1".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"x"}"#.into(),
            }],
        );
        let wire = message_to_wire(&msg, 3);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["content"][0]["type"], "text");
        assert_eq!(wire["content"][1]["type"], "toolCall");
        assert_eq!(wire["content"][1]["id"], "tc-1");
        assert_eq!(wire["content"][1]["name"], "read_file");
    }

    #[test]
    fn empty_assistant_gets_empty_text_block() {
        let wire = message_to_wire(&Message::assistant(""), 0);
        assert_eq!(wire["content"].as_array().unwrap().len(), 1);
        assert_eq!(wire["content"][0]["text"], "");
    }

    #[test]
    fn tool_result_shape() {
        let wire = message_to_wire(&Message::tool_result("tc-9", "output"), 2);
        assert_eq!(wire["role"], "toolResult");
        assert_eq!(wire["toolCallId"], "tc-9");
        assert_eq!(wire["content"][0]["text"], "output");
    }

    #[test]
    fn ids_are_deterministic_and_index_suffixed() {
        let a = message_to_wire(&stripped(Message::user("same")), 4);
        let b = message_to_wire(&stripped(Message::user("same")), 4);
        assert_eq!(a["id"], b["id"]);
        assert!(a["id"].as_str().unwrap().ends_with("-4"));

        let c = message_to_wire(&stripped(Message::user("different")), 4);
        assert_ne!(a["id"], c["id"]);
    }

    #[test]
    fn synthesized_created_at_steps_one_second_per_index() {
        let w0 = message_to_wire(&stripped(Message::user("a")), 0);
        let w2 = message_to_wire(&stripped(Message::user("b")), 2);
        assert_eq!(w0["createdAt"], "2026-01-01T00:00:00.000Z");
        assert_eq!(w2["createdAt"], "2026-01-01T00:00:02.000Z");
    }

    #[test]
    fn stored_timestamp_wins() {
        let mut msg = Message::user("dated");
        msg.timestamp = Some(Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap());
        let wire = message_to_wire(&msg, 0);
        assert_eq!(wire["createdAt"], "2026-03-14T09:26:53.000Z");
    }

    #[test]
    fn history_limit_takes_the_tail() {
        let messages: Vec<Message> = (0..10)
            .map(|i| stripped(Message::user(format!("m{i}"))))
            .collect();
        let wire = history_to_wire(&messages, 3);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0]["content"][0]["text"], "m7");
        // Indices are absolute within the full history.
        assert!(wire[0]["id"].as_str().unwrap().ends_with("-7"));
    }
}
