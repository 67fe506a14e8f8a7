//! The [`Provider`] trait: one chat completion call.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A chat completion provider.
///
/// Implementations must return tool-call IDs that are usable verbatim
/// as `tool_call_id` on subsequent tool-role messages. Cancellation is
/// surfaced by returning the `Cancelled` error or by the caller
/// dropping the future.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider's name (used in logs and failover attempt records).
    fn name(&self) -> &str;

    /// Perform one chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
