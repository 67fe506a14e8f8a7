//! Runtime core for the clawgate agent gateway.
//!
//! Wires the pieces a running gateway is made of:
//!
//! - [`bus`] -- bounded inbound queue + outbound fan-out
//! - [`session_store`] -- per-agent conversation state with an optional
//!   file-backed persistence sink
//! - [`routing`] -- external session keys to `(agent, internal key)`
//! - [`hooks`] -- priority-ordered lifecycle hooks
//! - [`rate_limit`] -- token buckets per user / tool / global
//! - [`tools`] -- the tool registry the agent loop executes through
//! - [`agent`] -- agents, the registry, and the conversation loop

pub mod agent;
pub mod bus;
pub mod hooks;
pub mod rate_limit;
pub mod routing;
pub mod session_store;
pub mod tools;

pub use agent::{Agent, AgentLoop, AgentRegistry, ProviderSet};
pub use bus::{MessageBus, OutboundSubscriber};
pub use hooks::{HookEvent, HookHandler, HookKind, HookRegistry};
pub use rate_limit::RateLimiter;
pub use session_store::{FileSessionSink, SessionMeta, SessionSink, SessionStore};
pub use tools::{Tool, ToolRegistry};
