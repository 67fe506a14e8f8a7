//! Error types for the clawgate framework.
//!
//! [`GateError`] is the top-level error type shared by the core and
//! service crates. It is non-exhaustive to allow future extension
//! without breaking downstream.

use thiserror::Error;

/// Top-level error type for the clawgate framework.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GateError {
    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A session key could not be resolved to an agent.
    #[error("routing error: {reason}")]
    Routing {
        /// Why resolution failed.
        reason: String,
    },

    /// An operation on a session was rejected.
    #[error("session error: {reason}")]
    Session {
        /// Why the operation was rejected.
        reason: String,
    },

    /// The named agent does not exist.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// A provider returned an error the fallback chain could not absorb.
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error message.
        message: String,
    },

    /// A tool invocation failed.
    #[error("tool error: {message}")]
    Tool {
        /// Tool-supplied error message.
        message: String,
    },

    /// A request was rejected by the rate limiter.
    #[error("rate limited: {scope}")]
    RateLimited {
        /// Which bucket rejected the request (user, tool, global).
        scope: String,
    },

    /// A bus channel was full or closed.
    #[error("channel error: {0}")]
    Channel(String),

    /// The operation was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
