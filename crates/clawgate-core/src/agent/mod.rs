//! Agents, the agent registry, and the conversation loop.
//!
//! An [`Agent`] is a named conversation context: its own session
//! store, model-candidate list, tool set, and workspace. The
//! [`AgentRegistry`] owns all agents and designates `main` as the
//! default. The [`AgentLoop`] is the single inbound consumer that
//! drives turns (see [`loop_core`]).

pub mod loop_core;
pub mod registry;

pub use loop_core::AgentLoop;
pub use registry::AgentRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use clawgate_llm::{
    ChatMessage, ChatOptions, ChatRequest, FallbackChain, FallbackError, ModelRef, Provider,
    ProviderError, ToolCall,
};
use clawgate_types::session::{Message, ToolCallRecord};
use clawgate_types::GateError;

use crate::hooks::{HookEvent, HookRegistry};
use crate::rate_limit::RateLimiter;
use crate::session_store::SessionStore;
use crate::tools::ToolRegistry;

/// How many trailing history messages are replayed to the model.
const MAX_HISTORY_MESSAGES: usize = 200;

/// Named lookup of provider instances.
#[derive(Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a provider under its name.
    pub fn insert(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Known provider names (used for model-prefix parsing).
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Tuning knobs applied to every turn of an agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Cap on tool-call iterations per user turn.
    pub max_tool_iterations: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 8,
        }
    }
}

/// The result of one user turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// Final assistant content (possibly rewritten by hooks).
    pub content: String,
    /// Whether a `message_sending` hook cancelled delivery.
    pub suppressed: bool,
}

/// A named conversation context.
pub struct Agent {
    id: String,
    workspace: String,
    candidates: Vec<ModelRef>,
    sessions: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    providers: Arc<ProviderSet>,
    chain: FallbackChain,
    settings: AgentSettings,
}

impl Agent {
    /// Create an agent.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        workspace: impl Into<String>,
        candidates: Vec<ModelRef>,
        sessions: Arc<SessionStore>,
        tools: Arc<ToolRegistry>,
        providers: Arc<ProviderSet>,
        chain: FallbackChain,
        settings: AgentSettings,
    ) -> Self {
        Self {
            id: id.into(),
            workspace: workspace.into(),
            candidates,
            sessions,
            tools,
            providers,
            chain,
            settings,
        }
    }

    /// The agent's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent's workspace path.
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// The agent's session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The agent's tool registry.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// The agent's model candidates, in fallback order.
    pub fn candidates(&self) -> &[ModelRef] {
        &self.candidates
    }

    /// Synchronous processing path used by the HTTP chat endpoint.
    /// Runs a full turn against `session_key` (internal form) and
    /// returns the final text; publishes nothing to the bus.
    pub async fn process_direct(
        &self,
        cancel: &CancellationToken,
        hooks: &HookRegistry,
        limits: &RateLimiter,
        session_key: &str,
        content: &str,
    ) -> clawgate_types::Result<String> {
        let result = self
            .run_turn(cancel, hooks, limits, session_key, content, |_| {})
            .await?;
        Ok(if result.suppressed {
            String::new()
        } else {
            result.content
        })
    }

    /// Run one user turn against `session_key` (internal form).
    ///
    /// Appends the user message, invokes the fallback chain, executes
    /// tool calls until the model stops asking or the iteration cap is
    /// hit, and persists the session. `on_partial` is called with any
    /// intermediate assistant text produced alongside tool calls.
    pub async fn run_turn(
        &self,
        cancel: &CancellationToken,
        hooks: &HookRegistry,
        limits: &RateLimiter,
        session_key: &str,
        content: &str,
        mut on_partial: impl FnMut(&str),
    ) -> clawgate_types::Result<TurnResult> {
        let (_, created) = self.sessions.get_or_create(session_key);
        if created {
            hooks
                .fire(HookEvent::SessionStart {
                    session_key: session_key.to_string(),
                })
                .await;
        }

        self.sessions
            .append_message(session_key, Message::user(content));

        let mut messages = history_to_chat(&self.sessions.history(session_key));
        let tool_schemas = self.tools.schemas();
        let options = ChatOptions {
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.temperature),
            prompt_cache_key: Some(session_key.to_string()),
        };

        let max_iterations = self.settings.max_tool_iterations.max(1);
        let mut result = None;

        for iteration in 0..max_iterations {
            hooks
                .fire(HookEvent::LlmInput {
                    session_key: session_key.to_string(),
                    messages: messages.clone(),
                })
                .await;

            let outcome = self
                .chain
                .run(cancel, &self.candidates, |candidate| {
                    let providers = self.providers.clone();
                    let messages = messages.clone();
                    let tools = tool_schemas.clone();
                    let options = options.clone();
                    async move {
                        let provider =
                            providers.get(&candidate.provider).ok_or_else(|| {
                                ProviderError::NotConfigured(format!(
                                    "unknown provider: {}",
                                    candidate.provider
                                ))
                            })?;
                        let request = ChatRequest {
                            model: candidate.model,
                            messages,
                            tools,
                            options,
                        };
                        provider.chat(&request).await
                    }
                })
                .await
                .map_err(map_fallback_error)?;

            let response = outcome.response;
            debug!(
                agent = %self.id,
                session = %session_key,
                iteration,
                winner = %outcome.winner,
                tool_calls = response.tool_calls.len(),
                "completion received"
            );

            hooks
                .fire(HookEvent::LlmOutput {
                    session_key: session_key.to_string(),
                    content: response.content.clone(),
                })
                .await;

            if response.tool_calls.is_empty() {
                result = Some(
                    self.finish_turn(hooks, session_key, response.content)
                        .await,
                );
                break;
            }

            // Record the assistant's tool-call announcement so the
            // next request sees user -> assistant(tool_calls) ->
            // tool results in order.
            self.sessions.append_message(
                session_key,
                Message::assistant_with_tools(
                    response.content.clone(),
                    response.tool_calls.iter().map(to_record).collect(),
                ),
            );
            messages.push(ChatMessage {
                role: "assistant".into(),
                content: response.content.clone(),
                tool_call_id: None,
                tool_calls: Some(response.tool_calls.clone()),
            });
            if !response.content.is_empty() {
                on_partial(&response.content);
            }

            for call in &response.tool_calls {
                let (text, is_error) = self
                    .execute_tool_call(hooks, limits, session_key, call)
                    .await;
                hooks
                    .fire(HookEvent::AfterToolCall {
                        session_key: session_key.to_string(),
                        tool: call.function.name.clone(),
                        result: text.clone(),
                        is_error,
                    })
                    .await;
                self.sessions
                    .append_message(session_key, Message::tool_result(&call.id, &text));
                messages.push(ChatMessage::tool(&call.id, text));
            }
        }

        let result = match result {
            Some(result) => result,
            None => {
                // Iteration cap reached with the model still asking
                // for tools.
                let notice = "Stopped: tool-call iteration limit reached for this turn.";
                self.finish_turn(hooks, session_key, notice.to_string())
                    .await
            }
        };

        if let Err(e) = self.sessions.save(session_key).await {
            error!(session = %session_key, error = %e, "failed to persist session");
        }

        Ok(result)
    }

    /// Run the `message_sending` hook and record the final assistant
    /// message.
    async fn finish_turn(
        &self,
        hooks: &HookRegistry,
        session_key: &str,
        content: String,
    ) -> TurnResult {
        let event = hooks
            .fire(HookEvent::MessageSending {
                session_key: session_key.to_string(),
                content,
                cancel: false,
            })
            .await;
        let (content, suppressed) = match event {
            HookEvent::MessageSending {
                content, cancel, ..
            } => (content, cancel),
            _ => unreachable!("message_sending dispatch returns the same variant"),
        };
        self.sessions
            .append_message(session_key, Message::assistant(&content));
        TurnResult {
            content,
            suppressed,
        }
    }

    /// Execute one tool call, honoring the `before_tool_call` hook and
    /// the per-tool rate limit. Returns `(result_text, is_error)`.
    async fn execute_tool_call(
        &self,
        hooks: &HookRegistry,
        limits: &RateLimiter,
        session_key: &str,
        call: &ToolCall,
    ) -> (String, bool) {
        let name = &call.function.name;
        let arguments: serde_json::Value = match serde_json::from_str(&call.function.arguments) {
            Ok(value) => value,
            Err(e) => {
                return (format!("invalid tool arguments: {e}"), true);
            }
        };

        let event = hooks
            .fire(HookEvent::BeforeToolCall {
                session_key: session_key.to_string(),
                tool: name.clone(),
                arguments,
                cancel: false,
            })
            .await;
        let (arguments, cancelled) = match event {
            HookEvent::BeforeToolCall {
                arguments, cancel, ..
            } => (arguments, cancel),
            _ => unreachable!("before_tool_call dispatch returns the same variant"),
        };
        if cancelled {
            return (format!("tool call '{name}' cancelled by hook"), true);
        }

        if !limits.allow_tool(name) {
            return (format!("tool '{name}' rate limit exceeded"), true);
        }

        match self.tools.execute(name, arguments).await {
            Ok(text) => (text, false),
            Err(e) => {
                error!(tool = %name, error = %e, "tool execution failed");
                (e.to_string(), true)
            }
        }
    }
}

/// Convert session history to the LLM wire shape.
fn history_to_chat(history: &[Message]) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
    history[start..]
        .iter()
        .map(|msg| match msg.role.as_str() {
            "assistant" if !msg.tool_calls.is_empty() => ChatMessage {
                role: "assistant".into(),
                content: msg.content.clone(),
                tool_call_id: None,
                tool_calls: Some(msg.tool_calls.iter().map(from_record).collect()),
            },
            "tool" => ChatMessage {
                role: "tool".into(),
                content: msg.content.clone(),
                tool_call_id: msg.tool_call_id.clone(),
                tool_calls: None,
            },
            role => ChatMessage::new(role, msg.content.clone()),
        })
        .collect()
}

fn to_record(call: &ToolCall) -> ToolCallRecord {
    ToolCallRecord {
        id: call.id.clone(),
        name: call.function.name.clone(),
        arguments: call.function.arguments.clone(),
    }
}

fn from_record(record: &ToolCallRecord) -> ToolCall {
    ToolCall {
        id: record.id.clone(),
        call_type: "function".into(),
        function: clawgate_llm::FunctionCall {
            name: record.name.clone(),
            arguments: record.arguments.clone(),
        },
    }
}

fn map_fallback_error(err: FallbackError) -> GateError {
    match err {
        FallbackError::Cancelled => GateError::Cancelled,
        other => GateError::Provider {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clawgate_llm::{ChatResponse, CooldownTracker, FunctionCall};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A provider scripted with a sequence of responses.
    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<ChatResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(ChatResponse::text("default"))
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    struct Greeter;

    #[async_trait]
    impl crate::tools::Tool for Greeter {
        fn name(&self) -> &str {
            "greet"
        }
        fn description(&self) -> &str {
            "Greets someone"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}})
        }
        async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String> {
            Ok(format!(
                "hello {}",
                args["name"].as_str().unwrap_or("stranger")
            ))
        }
    }

    fn tool_call_response(name: &str, args: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "tc-1".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: args.into(),
                },
            }],
            finish_reason: Some("tool_calls".into()),
            usage: None,
        }
    }

    fn agent_with(responses: Vec<ChatResponse>) -> Agent {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(Greeter));
        let mut providers = ProviderSet::new();
        providers.insert("scripted", Arc::new(ScriptedProvider::new(responses)));
        Agent::new(
            "main",
            "/tmp/ws",
            vec![ModelRef {
                provider: "scripted".into(),
                model: "test-model".into(),
            }],
            Arc::new(SessionStore::new("main")),
            tools,
            Arc::new(providers),
            FallbackChain::new(Arc::new(CooldownTracker::new())),
            AgentSettings::default(),
        )
    }

    #[tokio::test]
    async fn plain_turn_appends_user_and_assistant() {
        let agent = agent_with(vec![ChatResponse::text("hi there")]);
        let hooks = HookRegistry::new();
        let limits = RateLimiter::unlimited();
        let result = agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "hello",
                |_| {},
            )
            .await
            .unwrap();
        assert_eq!(result.content, "hi there");
        assert!(!result.suppressed);

        let history = agent.sessions().history("agent:main:u42");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[tokio::test]
    async fn tool_loop_executes_and_records_results() {
        let agent = agent_with(vec![
            tool_call_response("greet", r#"{"name":"Ada"}"#),
            ChatResponse::text("greeted successfully"),
        ]);
        let hooks = HookRegistry::new();
        let limits = RateLimiter::unlimited();
        let result = agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "greet Ada",
                |_| {},
            )
            .await
            .unwrap();
        assert_eq!(result.content, "greeted successfully");

        let history = agent.sessions().history("agent:main:u42");
        // user, assistant(tool_calls), tool result, assistant final
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].tool_calls[0].name, "greet");
        assert_eq!(history[2].tool_call_id.as_deref(), Some("tc-1"));
        assert_eq!(history[2].content, "hello Ada");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let agent = agent_with(vec![
            tool_call_response("no_such_tool", "{}"),
            ChatResponse::text("noted"),
        ]);
        let hooks = HookRegistry::new();
        let limits = RateLimiter::unlimited();
        agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "try it",
                |_| {},
            )
            .await
            .unwrap();
        let history = agent.sessions().history("agent:main:u42");
        assert!(history[2].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn iteration_cap_produces_notice() {
        // Every response asks for another tool call.
        let responses: Vec<ChatResponse> = (0..20)
            .map(|_| tool_call_response("greet", r#"{"name":"x"}"#))
            .collect();
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(Greeter));
        let mut providers = ProviderSet::new();
        providers.insert("scripted", Arc::new(ScriptedProvider::new(responses)));
        let agent = Agent::new(
            "main",
            "/tmp/ws",
            vec![ModelRef {
                provider: "scripted".into(),
                model: "test-model".into(),
            }],
            Arc::new(SessionStore::new("main")),
            tools,
            Arc::new(providers),
            FallbackChain::new(Arc::new(CooldownTracker::new())),
            AgentSettings {
                max_tool_iterations: 2,
                ..AgentSettings::default()
            },
        );
        let hooks = HookRegistry::new();
        let limits = RateLimiter::unlimited();
        let result = agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "loop forever",
                |_| {},
            )
            .await
            .unwrap();
        assert!(result.content.contains("iteration limit"));
    }

    #[tokio::test]
    async fn partial_text_alongside_tools_is_reported() {
        let mut with_text = tool_call_response("greet", r#"{"name":"Ada"}"#);
        with_text.content = "Let me greet Ada.".into();
        let agent = agent_with(vec![with_text, ChatResponse::text("done")]);
        let hooks = HookRegistry::new();
        let limits = RateLimiter::unlimited();
        let mut partials = Vec::new();
        agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "go",
                |p| partials.push(p.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(partials, vec!["Let me greet Ada."]);
    }

    #[tokio::test]
    async fn sending_hook_can_suppress_delivery() {
        struct Suppress;
        #[async_trait]
        impl crate::hooks::HookHandler for Suppress {
            async fn handle(&self, event: &mut HookEvent) -> Result<(), String> {
                if let HookEvent::MessageSending { cancel, .. } = event {
                    *cancel = true;
                }
                Ok(())
            }
        }

        let agent = agent_with(vec![ChatResponse::text("secret")]);
        let hooks = HookRegistry::new();
        hooks.register(
            crate::hooks::HookKind::MessageSending,
            10,
            "suppress",
            Arc::new(Suppress),
        );
        let limits = RateLimiter::unlimited();
        let result = agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "hello",
                |_| {},
            )
            .await
            .unwrap();
        assert!(result.suppressed);
    }

    #[tokio::test]
    async fn before_tool_hook_cancel_skips_execution() {
        struct Veto;
        #[async_trait]
        impl crate::hooks::HookHandler for Veto {
            async fn handle(&self, event: &mut HookEvent) -> Result<(), String> {
                if let HookEvent::BeforeToolCall { cancel, .. } = event {
                    *cancel = true;
                }
                Ok(())
            }
        }

        let agent = agent_with(vec![
            tool_call_response("greet", r#"{"name":"Ada"}"#),
            ChatResponse::text("ok"),
        ]);
        let hooks = HookRegistry::new();
        hooks.register(
            crate::hooks::HookKind::BeforeToolCall,
            10,
            "veto",
            Arc::new(Veto),
        );
        let limits = RateLimiter::unlimited();
        agent
            .run_turn(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:u42",
                "go",
                |_| {},
            )
            .await
            .unwrap();
        let history = agent.sessions().history("agent:main:u42");
        assert!(history[2].content.contains("cancelled by hook"));
    }

    #[tokio::test]
    async fn process_direct_returns_final_text() {
        let agent = agent_with(vec![ChatResponse::text("direct answer")]);
        let hooks = HookRegistry::new();
        let limits = RateLimiter::unlimited();
        let text = agent
            .process_direct(
                &CancellationToken::new(),
                &hooks,
                &limits,
                "agent:main:api:1234",
                "question",
            )
            .await
            .unwrap();
        assert_eq!(text, "direct answer");
    }
}
