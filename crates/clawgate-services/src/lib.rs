//! Services for the clawgate daemon.
//!
//! - [`mcp`] -- client manager for MCP tool-server subprocesses
//!   (JSON-RPC over stdio or HTTP, crash-rate limiting, idle reaping)
//! - [`gateway`] -- the WebSocket protocol server, HTTP/JSON API, and
//!   the outbound event pump
//! - [`heartbeat`] -- periodic prompt injection on the `heartbeat`
//!   channel

pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod mcp;

pub use error::{Result, ServiceError};
