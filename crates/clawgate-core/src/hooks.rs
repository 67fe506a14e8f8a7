//! Priority-ordered lifecycle hooks.
//!
//! Eight hook points cover the life of a turn. Two of them --
//! `message_sending` and `before_tool_call` -- are **modifying**:
//! handlers run sequentially in priority order over one shared event
//! and may set `cancel` to stop both the dispatch and the operation.
//! The rest are **fan-out**: each handler gets its own clone of the
//! event and runs concurrently; mutations never propagate back, and
//! errors or panics are logged, never surfaced.
//!
//! Registration is copy-on-write: each `register` builds a new sorted
//! handler slice, so a dispatch already in flight keeps its snapshot
//! and a handler registered mid-dispatch joins only the next one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use clawgate_llm::ChatMessage;
use clawgate_types::event::InboundMessage;

/// The hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// A user message arrived (fan-out).
    MessageReceived,
    /// An assistant message is about to be delivered (modifying).
    MessageSending,
    /// A tool call is about to execute (modifying).
    BeforeToolCall,
    /// A tool call finished (fan-out).
    AfterToolCall,
    /// The LLM is about to be invoked (fan-out).
    LlmInput,
    /// The LLM returned (fan-out).
    LlmOutput,
    /// A session was created (fan-out).
    SessionStart,
    /// A session was deleted (fan-out).
    SessionEnd,
}

impl HookKind {
    /// Whether handlers of this kind share one mutable event and may
    /// cancel the operation.
    pub fn is_modifying(&self) -> bool {
        matches!(self, HookKind::MessageSending | HookKind::BeforeToolCall)
    }
}

/// The event passed to hook handlers. Fan-out dispatch clones it per
/// handler; modifying dispatch threads one instance through handlers
/// in priority order.
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// A user message arrived.
    MessageReceived {
        /// The inbound envelope.
        message: InboundMessage,
    },
    /// An assistant message is about to be delivered.
    MessageSending {
        /// Internal session key.
        session_key: String,
        /// The content to deliver; handlers may rewrite it.
        content: String,
        /// Set to stop delivery.
        cancel: bool,
    },
    /// A tool call is about to execute.
    BeforeToolCall {
        /// Internal session key.
        session_key: String,
        /// Tool name.
        tool: String,
        /// Arguments; handlers may rewrite them.
        arguments: serde_json::Value,
        /// Set to stop the call.
        cancel: bool,
    },
    /// A tool call finished.
    AfterToolCall {
        /// Internal session key.
        session_key: String,
        /// Tool name.
        tool: String,
        /// The (possibly truncated) result text.
        result: String,
        /// Whether the tool reported an error.
        is_error: bool,
    },
    /// The LLM is about to be invoked.
    LlmInput {
        /// Internal session key.
        session_key: String,
        /// The outgoing message list.
        messages: Vec<ChatMessage>,
    },
    /// The LLM returned.
    LlmOutput {
        /// Internal session key.
        session_key: String,
        /// Assistant text content.
        content: String,
    },
    /// A session was created.
    SessionStart {
        /// Internal session key.
        session_key: String,
    },
    /// A session was deleted.
    SessionEnd {
        /// Internal session key.
        session_key: String,
    },
}

impl HookEvent {
    /// The hook point this event belongs to.
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::MessageReceived { .. } => HookKind::MessageReceived,
            HookEvent::MessageSending { .. } => HookKind::MessageSending,
            HookEvent::BeforeToolCall { .. } => HookKind::BeforeToolCall,
            HookEvent::AfterToolCall { .. } => HookKind::AfterToolCall,
            HookEvent::LlmInput { .. } => HookKind::LlmInput,
            HookEvent::LlmOutput { .. } => HookKind::LlmOutput,
            HookEvent::SessionStart { .. } => HookKind::SessionStart,
            HookEvent::SessionEnd { .. } => HookKind::SessionEnd,
        }
    }

    /// Whether a modifying handler cancelled the operation.
    pub fn cancelled(&self) -> bool {
        match self {
            HookEvent::MessageSending { cancel, .. } => *cancel,
            HookEvent::BeforeToolCall { cancel, .. } => *cancel,
            _ => false,
        }
    }
}

/// A hook handler.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Handle the event. For modifying hooks, mutations and `cancel`
    /// take effect; for fan-out hooks the event is this handler's own
    /// clone. Errors are logged and swallowed.
    async fn handle(&self, event: &mut HookEvent) -> Result<(), String>;
}

#[derive(Clone)]
struct Registration {
    priority: i32,
    name: String,
    handler: Arc<dyn HookHandler>,
}

/// The hook registry.
#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookKind, Arc<Vec<Registration>>>>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `kind`. Lower priorities run first;
    /// equal priorities keep registration order.
    pub fn register(
        &self,
        kind: HookKind,
        priority: i32,
        name: impl Into<String>,
        handler: Arc<dyn HookHandler>,
    ) {
        let name = name.into();
        let mut handlers = self.handlers.write().unwrap();
        let current = handlers.entry(kind).or_default();
        let mut next: Vec<Registration> = current.as_ref().clone();
        next.push(Registration {
            priority,
            name: name.clone(),
            handler,
        });
        next.sort_by_key(|r| r.priority);
        *current = Arc::new(next);
        debug!(?kind, priority, name = %name, "hook registered");
    }

    /// Number of handlers registered for `kind`.
    pub fn count(&self, kind: HookKind) -> usize {
        self.handlers
            .read()
            .unwrap()
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    fn snapshot(&self, kind: HookKind) -> Arc<Vec<Registration>> {
        self.handlers
            .read()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Dispatch `event` to its hook point, choosing the firing mode by
    /// kind. Returns the (possibly modified) event; check
    /// [`HookEvent::cancelled`] after modifying dispatches.
    pub async fn fire(&self, event: HookEvent) -> HookEvent {
        if event.kind().is_modifying() {
            self.fire_modifying(event).await
        } else {
            self.fire_fanout(event.clone()).await;
            event
        }
    }

    /// Sequential dispatch over one shared event, stopping at the
    /// first handler that cancels.
    async fn fire_modifying(&self, mut event: HookEvent) -> HookEvent {
        let snapshot = self.snapshot(event.kind());
        for registration in snapshot.iter() {
            if let Err(e) = registration.handler.handle(&mut event).await {
                warn!(hook = ?event.kind(), handler = %registration.name, error = %e, "hook handler failed");
            }
            if event.cancelled() {
                debug!(hook = ?event.kind(), handler = %registration.name, "hook cancelled operation");
                break;
            }
        }
        event
    }

    /// Concurrent dispatch over per-handler clones. Waits for every
    /// handler so panics can be logged; results are discarded.
    async fn fire_fanout(&self, event: HookEvent) {
        let snapshot = self.snapshot(event.kind());
        if snapshot.is_empty() {
            return;
        }
        let mut joins = Vec::with_capacity(snapshot.len());
        for registration in snapshot.iter() {
            let handler = registration.handler.clone();
            let name = registration.name.clone();
            let mut clone = event.clone();
            joins.push((
                name,
                tokio::spawn(async move { handler.handle(&mut clone).await }),
            ));
        }
        for (name, join) in joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(handler = %name, error = %e, "hook handler failed");
                }
                Err(e) if e.is_panic() => {
                    warn!(handler = %name, "hook handler panicked");
                }
                Err(_) => {}
            }
        }
    }
}
