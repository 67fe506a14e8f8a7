//! Config loading and runtime assembly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clawgate_core::agent::{Agent, AgentLoop, AgentSettings, ProviderSet};
use clawgate_core::{
    AgentRegistry, FileSessionSink, HookRegistry, MessageBus, RateLimiter, SessionStore,
    ToolRegistry,
};
use clawgate_llm::{
    dedup_candidates, AuthRotatingProvider, CooldownTracker, FallbackChain, KeyProfile,
    LlmProviderConfig, ModelRef, OpenAiCompatProvider, Provider,
};
use clawgate_services::gateway::{run_pump, serve, GatewayState};
use clawgate_services::heartbeat::HeartbeatService;
use clawgate_services::mcp::{register_mcp_tools, McpManager};
use clawgate_types::config::{AgentEntry, Config, ProviderEndpoint};

/// Load the configuration from `path`, `~/.clawgate/config.toml`, or
/// defaults when neither exists.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => dirs::home_dir().map(|home| home.join(".clawgate").join("config.toml")),
    };
    match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!(path = %path.display(), "config loaded");
            Ok(config)
        }
        _ => {
            info!("no config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Build one provider from its endpoint config: a plain provider for
/// a single key, a rotating one for several.
fn build_provider(
    endpoint: &ProviderEndpoint,
    cooldowns: &Arc<CooldownTracker>,
) -> Arc<dyn Provider> {
    let config = LlmProviderConfig {
        supports_prompt_cache: endpoint.supports_prompt_cache,
        ..LlmProviderConfig::new(&endpoint.name, &endpoint.base_url)
    };
    if endpoint.api_keys.len() > 1 {
        let profiles: Vec<KeyProfile> = endpoint
            .api_keys
            .iter()
            .enumerate()
            .map(|(i, key)| KeyProfile {
                id: format!("{}/key-{}", endpoint.name, i + 1),
                api_key: key.clone(),
            })
            .collect();
        let config = config.clone();
        Arc::new(AuthRotatingProvider::new(
            endpoint.name.clone(),
            profiles,
            cooldowns.clone(),
            move |profile| {
                Arc::new(OpenAiCompatProvider::new(
                    config.clone(),
                    profile.api_key.clone(),
                )) as Arc<dyn Provider>
            },
        ))
    } else {
        let key = endpoint
            .api_keys
            .first()
            .cloned()
            .unwrap_or_else(|| endpoint.api_key.clone());
        Arc::new(OpenAiCompatProvider::new(config, key))
    }
}

fn parse_candidates(
    models: &[String],
    known: &[String],
    default_provider: &str,
) -> Vec<ModelRef> {
    dedup_candidates(
        models
            .iter()
            .map(|m| ModelRef::parse(m, known, default_provider))
            .collect(),
    )
}

/// The assembled runtime, ready to run.
pub struct Runtime {
    cancel: CancellationToken,
    state: Arc<GatewayState>,
    mcp: Arc<McpManager>,
    listener: tokio::net::TcpListener,
    agent_loop: AgentLoop,
    heartbeat: Option<HeartbeatService>,
}

/// Wire the whole daemon from config.
pub async fn build_runtime(config: Config) -> anyhow::Result<Runtime> {
    let cancel = CancellationToken::new();
    let cooldowns = Arc::new(CooldownTracker::new());

    // Providers.
    let mut providers = ProviderSet::new();
    for endpoint in &config.providers {
        if endpoint.name.is_empty() || endpoint.base_url.is_empty() {
            warn!("skipping provider with empty name or base_url");
            continue;
        }
        providers.insert(endpoint.name.clone(), build_provider(endpoint, &cooldowns));
    }
    let known = providers.names();
    let default_provider = config
        .providers
        .first()
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "openai".into());
    let providers = Arc::new(providers);

    // Session persistence.
    let sessions_dir = config
        .sessions
        .dir
        .clone()
        .unwrap_or_else(|| expand_home("~/.clawgate/sessions"));
    let sink = Arc::new(FileSessionSink::new(sessions_dir).context("creating sessions dir")?);

    // MCP manager.
    let mcp = Arc::new(McpManager::new(config.mcp.servers.clone()));
    mcp.start_reaper();

    // Agents: the implicit main plus the configured list.
    let mut entries: Vec<AgentEntry> = vec![AgentEntry {
        id: "main".into(),
        workspace: None,
        models: Vec::new(),
    }];
    entries.extend(config.agents.list.iter().filter(|a| a.id != "main").cloned());

    let defaults = &config.agents.defaults;
    let settings = AgentSettings {
        max_tokens: defaults.max_tokens,
        temperature: defaults.temperature,
        max_tool_iterations: defaults.max_tool_iterations,
    };

    let mut agents = Vec::new();
    for entry in entries {
        let models = if entry.models.is_empty() {
            &defaults.models
        } else {
            &entry.models
        };
        let candidates = parse_candidates(models, &known, &default_provider);
        if candidates.is_empty() {
            warn!(agent = %entry.id, "agent has no model candidates configured");
        }
        let workspace = expand_home(
            entry
                .workspace
                .as_deref()
                .unwrap_or(defaults.workspace.as_str()),
        );

        let store = Arc::new(SessionStore::with_sink(&entry.id, sink.clone()));
        if let Err(e) = store.load_from_sink().await {
            warn!(agent = %entry.id, error = %e, "failed to load persisted sessions");
        }

        let tools = Arc::new(ToolRegistry::new());
        if let Err(e) = std::fs::create_dir_all(&workspace) {
            warn!(agent = %entry.id, error = %e, "failed to create workspace dir");
        }
        clawgate_tools::register_all(&tools, workspace.clone());
        let registered = register_mcp_tools(&mcp, &tools).await;
        info!(
            agent = %entry.id,
            builtin = tools.len() - registered,
            mcp = registered,
            "agent tool registry ready"
        );

        agents.push(Arc::new(Agent::new(
            entry.id.clone(),
            workspace.to_string_lossy().to_string(),
            candidates,
            store,
            tools,
            providers.clone(),
            FallbackChain::new(cooldowns.clone()),
            settings.clone(),
        )));
    }
    let registry = Arc::new(AgentRegistry::new(agents).map_err(|e| anyhow::anyhow!("{e}"))?);

    // Bus, hooks, limits.
    let bus = Arc::new(MessageBus::with_capacity(config.bus.capacity));
    let hooks = Arc::new(HookRegistry::new());
    let limits = Arc::new(RateLimiter::new(config.limits.clone()));

    // Gateway state + listener.
    let state = GatewayState::new(
        registry.clone(),
        bus.clone(),
        hooks.clone(),
        limits.clone(),
        config.agents.web_bindings.clone(),
        config.gateway.clone(),
        cancel.clone(),
    );
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    // Agent loop.
    let agent_loop = AgentLoop::new(
        registry,
        bus.clone(),
        hooks,
        limits,
        config.agents.web_bindings.clone(),
        cancel.clone(),
    );

    // Heartbeat.
    let heartbeat = (config.gateway.heartbeat_interval_minutes > 0).then(|| {
        HeartbeatService::new(
            config.gateway.heartbeat_interval_minutes,
            config.gateway.heartbeat_prompt.clone(),
            bus.inbound_sender(),
        )
    });

    Ok(Runtime {
        cancel,
        state,
        mcp,
        listener,
        agent_loop,
        heartbeat,
    })
}

impl Runtime {
    /// Run everything until Ctrl+C, then shut down in order.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        let Runtime {
            cancel,
            state,
            mcp,
            listener,
            agent_loop,
            heartbeat,
        } = self;

        let loop_handle = tokio::spawn(async move { agent_loop.run().await });

        let pump_state = state.clone();
        let pump_handle = tokio::spawn(async move { run_pump(pump_state).await });

        let heartbeat_handle = heartbeat.map(|service| {
            let hb_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = service.start(hb_cancel).await {
                    error!(error = %e, "heartbeat service exited with error");
                }
            })
        });

        let serve_state = state.clone();
        let serve_handle = tokio::spawn(async move {
            if let Err(e) = serve(serve_state, listener).await {
                error!(error = %e, "gateway server exited with error");
            }
        });

        info!("gateway running -- press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("received shutdown signal");

        cancel.cancel();
        mcp.stop().await;

        let _ = serve_handle.await;
        let _ = pump_handle.await;
        let _ = loop_handle.await;
        if let Some(handle) = heartbeat_handle {
            let _ = handle.await;
        }

        info!("gateway shutdown complete");
        Ok(())
    }
}
