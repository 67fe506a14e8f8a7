//! Gateway method dispatch.
//!
//! Every `req` frame from any connection lands in [`dispatch`], which
//! returns either a payload or a `(code, message)` error. The handler
//! set mirrors the protocol surface: `connect`, the `sessions.*`
//! family, and the `chat.*` family.

use std::sync::atomic::Ordering;

use chrono::Utc;
use tracing::{debug, warn};

use clawgate_core::hooks::HookEvent;
use clawgate_core::routing::{display_key, resolve_session_key};
use clawgate_core::Agent;
use clawgate_types::event::{join_chat_id, InboundMessage};

use super::frame::{codes, GatewayFrame};
use super::subs::ConnId;
use super::wire::history_to_wire;
use super::GatewayState;

/// Default trailing-message count for `chat.history`.
const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Default session count for `sessions.list`.
const DEFAULT_LIST_LIMIT: usize = 100;

/// Protocol version reported by `connect`.
const PROTOCOL_VERSION: u32 = 3;

/// A method failure as sent to the client.
#[derive(Debug)]
pub struct MethodError {
    /// One of [`codes`].
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl MethodError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

type MethodResult = Result<serde_json::Value, MethodError>;

/// Dispatch one request frame for `conn_id`.
pub async fn dispatch(
    state: &GatewayState,
    conn_id: ConnId,
    frame: &GatewayFrame,
) -> MethodResult {
    let method = frame
        .method
        .as_deref()
        .ok_or_else(|| MethodError::new(codes::INVALID_REQUEST, "missing method"))?;
    let params = frame.params.clone().unwrap_or(serde_json::json!({}));
    debug!(conn = conn_id, method, "dispatching gateway method");

    if method == "connect" {
        return connect(state, conn_id, &params);
    }

    if state.ws_auth_configured() && !state.authed.read().unwrap().contains(&conn_id) {
        return Err(MethodError::new(
            codes::UNAUTHORIZED,
            "connect with valid credentials first",
        ));
    }

    match method {
        "sessions.list" => sessions_list(state, &params),
        "sessions.patch" => sessions_patch(state, &params).await,
        "sessions.resolve" => sessions_resolve(state, &params),
        "sessions.delete" => sessions_delete(state, &params).await,
        "chat.send" => chat_send(state, conn_id, &params).await,
        "chat.history" => chat_history(state, &params),
        "chat.subscribe" => chat_subscribe(state, conn_id, &params),
        other => Err(MethodError::new(
            codes::METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        )),
    }
}

fn connect(state: &GatewayState, conn_id: ConnId, params: &serde_json::Value) -> MethodResult {
    let token = params["auth"]["token"].as_str();
    let password = params["auth"]["password"].as_str();

    let token_ok = state.config.auth_token.is_empty()
        || token.is_some_and(|t| t == state.config.auth_token);
    let password_ok = state.config.auth_password.is_empty()
        || password.is_some_and(|p| p == state.config.auth_password);
    // With nothing configured, a connect carrying no credential at all
    // is still rejected.
    let open_mode_blank =
        !state.ws_auth_configured() && token.is_none() && password.is_none();

    if !token_ok || !password_ok || open_mode_blank {
        warn!(conn = conn_id, "connect rejected");
        return Err(MethodError::new(codes::UNAUTHORIZED, "invalid credentials"));
    }

    state.authed.write().unwrap().insert(conn_id);
    Ok(serde_json::json!({
        "protocol": PROTOCOL_VERSION,
        "server": state.config.name,
    }))
}

/// Resolve a display key and the agent that owns it.
fn resolve_agent(
    state: &GatewayState,
    display: &str,
) -> Result<(String, std::sync::Arc<Agent>), MethodError> {
    let (internal, agent_id) = resolve_session_key(display, &state.bindings);
    let agent = state.registry.get_agent(&agent_id).ok_or_else(|| {
        MethodError::new(codes::INTERNAL, format!("unknown agent: {agent_id}"))
    })?;
    Ok((internal, agent))
}

/// A url-ish slug of a display key, stable across calls.
fn friendly_id(display: &str) -> String {
    let mut slug = String::with_capacity(display.len());
    let mut last_dash = true;
    for c in display.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn sessions_list(state: &GatewayState, params: &serde_json::Value) -> MethodResult {
    let limit = params["limit"].as_u64().unwrap_or(DEFAULT_LIST_LIMIT as u64) as usize;
    let include_last = params["includeLastMessage"].as_bool().unwrap_or(false);
    let include_titles = params["includeDerivedTitles"].as_bool().unwrap_or(false);

    let agent = state.registry.get_default_agent();
    let sessions: Vec<serde_json::Value> = agent
        .sessions()
        .list()
        .into_iter()
        .take(limit)
        .map(|meta| {
            let display = display_key(&meta.key).to_string();
            let mut entry = serde_json::json!({
                "key": display,
                "friendlyId": friendly_id(&display),
                "updatedAt": meta.updated_at.timestamp_millis(),
                "label": meta.label,
            });
            if include_last {
                if let Some(last) = &meta.last_message {
                    entry["lastMessage"] = serde_json::json!(last.content);
                }
            }
            if include_titles {
                let history = agent.sessions().history(&meta.key);
                if let Some(first_user) = history.iter().find(|m| m.role == "user") {
                    entry["derivedTitle"] = serde_json::json!(derive_title(&first_user.content));
                }
            }
            entry
        })
        .collect();

    Ok(serde_json::json!({ "sessions": sessions }))
}

fn derive_title(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 48 {
        flat
    } else {
        let cut: String = flat.chars().take(48).collect();
        format!("{cut}…")
    }
}

async fn sessions_patch(state: &GatewayState, params: &serde_json::Value) -> MethodResult {
    let key = params["key"]
        .as_str()
        .ok_or_else(|| MethodError::new(codes::INVALID_REQUEST, "missing key"))?;
    let (internal, agent) = resolve_agent(state, key)?;

    agent.sessions().get_or_create(&internal);
    if let Some(label) = params["label"].as_str() {
        agent.sessions().set_label(&internal, label);
    }
    if let Err(e) = agent.sessions().save(&internal).await {
        return Err(MethodError::new(codes::INTERNAL, e.to_string()));
    }

    let display = display_key(&internal).to_string();
    Ok(serde_json::json!({
        "ok": true,
        "key": display,
        "entry": { "key": display },
    }))
}

fn sessions_resolve(state: &GatewayState, params: &serde_json::Value) -> MethodResult {
    let key = params["key"].as_str().unwrap_or("");
    let (internal, _) = resolve_session_key(key, &state.bindings);
    Ok(serde_json::json!({
        "ok": true,
        "key": display_key(&internal),
    }))
}

async fn sessions_delete(state: &GatewayState, params: &serde_json::Value) -> MethodResult {
    let key = params["key"]
        .as_str()
        .ok_or_else(|| MethodError::new(codes::INVALID_REQUEST, "missing key"))?;
    let (internal, agent) = resolve_agent(state, key)?;

    agent
        .sessions()
        .delete(&internal)
        .map_err(|e| MethodError::new(codes::INVALID_REQUEST, e.to_string()))?;
    if let Err(e) = agent.sessions().remove_persisted(&internal).await {
        warn!(session = %internal, error = %e, "failed to remove persisted session");
    }
    state
        .hooks
        .fire(HookEvent::SessionEnd {
            session_key: internal,
        })
        .await;
    Ok(serde_json::json!({ "ok": true }))
}

async fn chat_send(
    state: &GatewayState,
    conn_id: ConnId,
    params: &serde_json::Value,
) -> MethodResult {
    let message = params["message"]
        .as_str()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| MethodError::new(codes::INVALID_REQUEST, "missing message"))?;
    let display = params["sessionKey"].as_str().unwrap_or("");
    let (internal, _agent) = resolve_agent(state, display)?;

    let run_id = match params["idempotencyKey"].as_str().filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None => format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            state.run_counter.fetch_add(1, Ordering::Relaxed) + 1
        ),
    };

    let inbound = InboundMessage {
        channel: "web".into(),
        sender_id: format!("ws-{conn_id}"),
        chat_id: join_chat_id(&internal, &run_id),
        content: message.to_string(),
        session_key: internal.clone(),
        timestamp: Utc::now(),
        metadata: Default::default(),
    };
    state
        .bus
        .publish_inbound_async(inbound)
        .await
        .map_err(|e| MethodError::new(codes::INTERNAL, e.to_string()))?;

    Ok(serde_json::json!({
        "ok": true,
        "runId": run_id,
        "sessionKey": display_key(&internal),
    }))
}

fn chat_history(state: &GatewayState, params: &serde_json::Value) -> MethodResult {
    let display = params["sessionKey"].as_str().unwrap_or("");
    let limit = params["limit"]
        .as_u64()
        .unwrap_or(DEFAULT_HISTORY_LIMIT as u64) as usize;
    let (internal, agent) = resolve_agent(state, display)?;

    let history = agent.sessions().history(&internal);
    Ok(serde_json::json!({
        "sessionKey": display_key(&internal),
        "messages": history_to_wire(&history, limit),
    }))
}

fn chat_subscribe(
    state: &GatewayState,
    conn_id: ConnId,
    params: &serde_json::Value,
) -> MethodResult {
    let internal = if let Some(display) = params["sessionKey"].as_str() {
        resolve_session_key(display, &state.bindings).0
    } else if let Some(friendly) = params["friendlyId"].as_str() {
        let agent = state.registry.get_default_agent();
        agent
            .sessions()
            .list()
            .into_iter()
            .find(|meta| friendly_id(display_key(&meta.key)) == friendly)
            .map(|meta| meta.key)
            .ok_or_else(|| {
                MethodError::new(
                    codes::INVALID_REQUEST,
                    format!("no session with friendlyId: {friendly}"),
                )
            })?
    } else {
        return Err(MethodError::new(
            codes::INVALID_REQUEST,
            "missing sessionKey or friendlyId",
        ));
    };

    state.subs.subscribe(&internal, conn_id);
    Ok(serde_json::json!({ "ok": true }))
}
