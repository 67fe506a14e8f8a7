//! Session-key routing.
//!
//! External (display) session keys are free-form strings, typically a
//! transport-native chat id. Internal keys are always
//! `agent:<agent_id>:<display_key>`. [`resolve_session_key`] maps a
//! display key onto the owning agent via longest-prefix bindings, so
//! more specific prefixes override generic ones.

use clawgate_types::config::WebSessionAgentBinding;
use clawgate_types::session::MAIN_SESSION;

/// The id of the implicit default agent.
pub const DEFAULT_AGENT: &str = "main";

/// Build an internal key from agent id and display key.
pub fn internal_key(agent_id: &str, display: &str) -> String {
    format!("agent:{agent_id}:{display}")
}

/// Split an internal key into `(agent_id, display_key)`.
/// Returns `None` when `key` is not agent-prefixed.
pub fn parse_internal_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("agent:")?;
    let (agent_id, display) = rest.split_once(':')?;
    if agent_id.is_empty() || display.is_empty() {
        return None;
    }
    Some((agent_id, display))
}

/// Normalize an agent id: trimmed, lowercase.
fn normalize_agent(agent_id: &str) -> String {
    agent_id.trim().to_lowercase()
}

/// Resolve a display key to `(internal_key, agent_id)`.
///
/// 1. Trim. Empty resolves to the default agent's main session.
/// 2. Already agent-prefixed keys pass through (agent id normalized).
/// 3. The longest matching binding prefix wins.
/// 4. Otherwise the default agent owns the session.
pub fn resolve_session_key(
    display: &str,
    bindings: &[WebSessionAgentBinding],
) -> (String, String) {
    let display = display.trim();
    if display.is_empty() {
        return (
            internal_key(DEFAULT_AGENT, MAIN_SESSION),
            DEFAULT_AGENT.to_string(),
        );
    }

    if let Some((agent_id, rest)) = parse_internal_key(display) {
        let agent_id = normalize_agent(agent_id);
        return (internal_key(&agent_id, rest), agent_id);
    }

    let mut sorted: Vec<&WebSessionAgentBinding> = bindings.iter().collect();
    sorted.sort_by(|a, b| b.session_key_prefix.len().cmp(&a.session_key_prefix.len()));
    for binding in sorted {
        if !binding.session_key_prefix.is_empty()
            && display.starts_with(binding.session_key_prefix.as_str())
        {
            let agent_id = normalize_agent(&binding.agent_id);
            return (internal_key(&agent_id, display), agent_id);
        }
    }

    (
        internal_key(DEFAULT_AGENT, display),
        DEFAULT_AGENT.to_string(),
    )
}

/// The display form shown to web clients: the `agent:main:` prefix of
/// the default agent is stripped; other agents' keys stay fully
/// qualified so they remain unambiguous.
pub fn display_key(internal: &str) -> &str {
    match parse_internal_key(internal) {
        Some((agent_id, display)) if agent_id == DEFAULT_AGENT => display,
        _ => internal,
    }
}
