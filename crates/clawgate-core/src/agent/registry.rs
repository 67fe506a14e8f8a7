//! The agent registry.
//!
//! Owns every [`Agent`] in the process and designates `main` as the
//! default. A non-empty process always has exactly one default agent.

use std::collections::HashMap;
use std::sync::Arc;

use clawgate_types::GateError;

use super::Agent;
use crate::routing::DEFAULT_AGENT;

/// Registry of named agents.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<Agent>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AgentRegistry {
    /// Build a registry. Exactly one agent must carry the id `main`.
    pub fn new(agents: Vec<Arc<Agent>>) -> clawgate_types::Result<Self> {
        let mut map = HashMap::new();
        for agent in agents {
            let id = agent.id().to_string();
            if map.insert(id.clone(), agent).is_some() {
                return Err(GateError::ConfigInvalid {
                    reason: format!("duplicate agent id: {id}"),
                });
            }
        }
        if !map.contains_key(DEFAULT_AGENT) {
            return Err(GateError::ConfigInvalid {
                reason: "no 'main' agent configured".into(),
            });
        }
        Ok(Self { agents: map })
    }

    /// Look up an agent by id.
    pub fn get_agent(&self, id: &str) -> Option<Arc<Agent>> {
        self.agents.get(id).cloned()
    }

    /// The default agent, `main`.
    pub fn get_default_agent(&self) -> Arc<Agent> {
        self.agents
            .get(DEFAULT_AGENT)
            .cloned()
            .expect("registry construction guarantees a main agent")
    }

    /// Sorted agent ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Always false: a constructed registry has at least `main`.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSettings, ProviderSet};
    use crate::session_store::SessionStore;
    use crate::tools::ToolRegistry;
    use clawgate_llm::{CooldownTracker, FallbackChain};

    fn make_agent(id: &str) -> Arc<Agent> {
        Arc::new(Agent::new(
            id,
            "/tmp/ws",
            vec![],
            Arc::new(SessionStore::new(id)),
            Arc::new(ToolRegistry::new()),
            Arc::new(ProviderSet::new()),
            FallbackChain::new(Arc::new(CooldownTracker::new())),
            AgentSettings::default(),
        ))
    }

    #[test]
    fn registry_requires_main() {
        let err = AgentRegistry::new(vec![make_agent("ops")]).unwrap_err();
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn default_agent_is_main() {
        let registry =
            AgentRegistry::new(vec![make_agent("main"), make_agent("ops")]).unwrap();
        assert_eq!(registry.get_default_agent().id(), "main");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["main", "ops"]);
    }

    #[test]
    fn get_agent_by_id() {
        let registry = AgentRegistry::new(vec![make_agent("main")]).unwrap();
        assert!(registry.get_agent("main").is_some());
        assert!(registry.get_agent("ghost").is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err =
            AgentRegistry::new(vec![make_agent("main"), make_agent("main")]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
