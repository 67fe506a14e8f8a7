//! The agent loop: the bus's single inbound consumer.
//!
//! ```text
//! InboundMessage (from MessageBus)
//!   |
//!   v
//! resolve session key -> (agent, internal key)
//!   |
//!   v
//! rate-limit admission, message-received hooks
//!   |
//!   v
//! Agent::run_turn (fallback chain + tool loop)
//!   |
//!   v
//! OutboundMessage(s) (partial states + final) back onto the bus
//! ```
//!
//! Within a session the loop is single-threaded, so history mutations
//! are linearizable against that session. Errors on individual
//! messages are logged (and answered) but never terminate the loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clawgate_types::config::WebSessionAgentBinding;
use clawgate_types::event::{join_chat_id, InboundMessage, MessageState, OutboundMessage};
use clawgate_types::GateError;

use crate::bus::MessageBus;
use crate::hooks::{HookEvent, HookRegistry};
use crate::rate_limit::RateLimiter;
use crate::routing::resolve_session_key;

use super::AgentRegistry;

/// The single inbound consumer driving conversations.
pub struct AgentLoop {
    registry: Arc<AgentRegistry>,
    bus: Arc<MessageBus>,
    hooks: Arc<HookRegistry>,
    limits: Arc<RateLimiter>,
    bindings: Vec<WebSessionAgentBinding>,
    cancel: CancellationToken,
}

impl AgentLoop {
    /// Create the loop with all dependencies wired.
    pub fn new(
        registry: Arc<AgentRegistry>,
        bus: Arc<MessageBus>,
        hooks: Arc<HookRegistry>,
        limits: Arc<RateLimiter>,
        bindings: Vec<WebSessionAgentBinding>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            bus,
            hooks,
            limits,
            bindings,
            cancel,
        }
    }

    /// Run until the bus closes or the cancellation token fires.
    pub async fn run(&self) {
        info!("agent loop started, waiting for messages");
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("agent loop cancelled, exiting");
                    break;
                }
                msg = self.bus.consume_inbound() => msg,
            };
            match msg {
                Some(msg) => {
                    debug!(channel = %msg.channel, chat_id = %msg.chat_id, "processing inbound message");
                    if let Err(e) = self.process_message(msg).await {
                        error!(error = %e, "failed to process message");
                    }
                }
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// Process one inbound message end to end.
    async fn process_message(&self, msg: InboundMessage) -> clawgate_types::Result<()> {
        let (internal_key, agent_id) = resolve_session_key(&msg.session_key, &self.bindings);
        let Some(agent) = self.registry.get_agent(&agent_id) else {
            return Err(GateError::UnknownAgent(agent_id));
        };

        let run_id = if msg.run_id().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            msg.run_id().to_string()
        };
        let chat_id = join_chat_id(&internal_key, &run_id);

        if !self.limits.allow_message(&msg.sender_id) {
            warn!(sender = %msg.sender_id, "message rejected by rate limiter");
            self.publish(
                &msg.channel,
                &chat_id,
                "Rate limit exceeded. Please try again shortly.",
                MessageState::Final,
            );
            return Ok(());
        }

        self.hooks
            .fire(HookEvent::MessageReceived {
                message: msg.clone(),
            })
            .await;

        let channel = msg.channel.clone();
        let partial_chat_id = chat_id.clone();
        let turn = agent
            .run_turn(
                &self.cancel,
                &self.hooks,
                &self.limits,
                &internal_key,
                &msg.content,
                |partial| {
                    self.publish(&channel, &partial_chat_id, partial, MessageState::Partial);
                },
            )
            .await;

        match turn {
            Ok(result) => {
                if !result.suppressed {
                    self.publish(&channel, &chat_id, &result.content, MessageState::Final);
                }
                debug!(session = %internal_key, run = %run_id, "message processed");
                Ok(())
            }
            Err(GateError::Cancelled) => Ok(()),
            Err(e) => {
                error!(session = %internal_key, error = %e, "turn failed");
                self.publish(
                    &channel,
                    &chat_id,
                    &format!("Error: {e}"),
                    MessageState::Final,
                );
                Ok(())
            }
        }
    }

    fn publish(&self, channel: &str, chat_id: &str, content: &str, state: MessageState) {
        self.bus.publish_outbound(OutboundMessage {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            state,
            metadata: Default::default(),
        });
    }
}
