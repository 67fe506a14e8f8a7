//! The gateway frame protocol.
//!
//! Every WebSocket message is one JSON [`GatewayFrame`]:
//! `type: "req"` carries a method call correlated by `id`,
//! `type: "res"` answers it, and `type: "event"` is a server-initiated
//! push stamped with a per-server monotonic `seq`.

use serde::{Deserialize, Serialize};

/// Error codes used in error responses.
pub mod codes {
    /// Authentication failed or missing.
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// The frame or its params could not be decoded.
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    /// The method name is unknown.
    pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
    /// The request was understood but is invalid.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// Something broke on our side.
    pub const INTERNAL: &str = "INTERNAL";
}

/// One frame on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// "req", "res", or "event".
    #[serde(rename = "type")]
    pub frame_type: String,

    /// Correlates a `res` with its `req`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Method name on a `req`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Method parameters on a `req`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,

    /// Result payload on a `res` or `event`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Event name on an `event` frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Per-server monotonic sequence number on an `event` frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Success flag on a `res`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,

    /// Error body on a failed `res`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Error body of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// One of the [`codes`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GatewayFrame {
    /// A successful response to `id`.
    pub fn response(id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            frame_type: "res".into(),
            id,
            ok: Some(true),
            payload: Some(payload),
            ..Default::default()
        }
    }

    /// A failed response to `id`.
    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            frame_type: "res".into(),
            id,
            ok: Some(false),
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
            ..Default::default()
        }
    }

    /// An event frame.
    pub fn event(name: &str, seq: u64, payload: serde_json::Value) -> Self {
        Self {
            frame_type: "event".into(),
            event: Some(name.into()),
            seq: Some(seq),
            payload: Some(payload),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_parses() {
        let json = r#"{"type":"req","id":"1","method":"connect","params":{"auth":{"token":"T"}}}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.frame_type, "req");
        assert_eq!(frame.id.as_deref(), Some("1"));
        assert_eq!(frame.method.as_deref(), Some("connect"));
        assert_eq!(frame.params.unwrap()["auth"]["token"], "T");
    }

    #[test]
    fn response_serialization_is_sparse() {
        let frame = GatewayFrame::response(Some("1".into()), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"res""#));
        assert!(json.contains(r#""ok":true"#));
        assert!(!json.contains("method"));
        assert!(!json.contains("seq"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn error_frame_carries_code_and_message() {
        let frame = GatewayFrame::error(Some("2".into()), codes::UNAUTHORIZED, "bad token");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
        assert_eq!(json["error"]["message"], "bad token");
    }

    #[test]
    fn event_frame_shape() {
        let frame = GatewayFrame::event("chat", 7, serde_json::json!({"runId": "R1"}));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "chat");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["payload"]["runId"], "R1");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"type":"req","id":"1","method":"x","future_field":42}"#;
        assert!(serde_json::from_str::<GatewayFrame>(json).is_ok());
    }
}
