//! MCP (Model Context Protocol) client manager.
//!
//! Talks JSON-RPC 2.0 to tool-server subprocesses (or HTTP endpoints):
//! [`client`] owns one session, [`manager`] owns the set of them with
//! crash-rate limiting and idle reaping, [`framing`] implements the
//! two wire framings, and [`types`] holds the JSON-RPC shapes.

pub mod client;
pub mod framing;
pub mod manager;
pub mod types;

pub use client::{McpClient, CALL_TIMEOUT, INIT_TIMEOUT, MCP_PROTOCOL_VERSION};
pub use manager::{qualify_tool_name, register_mcp_tools, McpManager, McpToolProxy};
pub use types::{CallToolOutcome, ToolDefinition};
