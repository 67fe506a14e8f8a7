//! Service error types.

use thiserror::Error;

/// Errors produced by services in this crate.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// MCP transport-layer failure (pipe, process, connection).
    #[error("mcp transport error: {0}")]
    McpTransport(String),

    /// MCP protocol-layer failure (JSON-RPC error, bad frame).
    #[error("mcp protocol error: {0}")]
    McpProtocol(String),

    /// The named MCP server is unknown or disabled.
    #[error("mcp server unavailable: {0}")]
    McpUnavailable(String),

    /// A WebSocket write failed (connection gone).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
