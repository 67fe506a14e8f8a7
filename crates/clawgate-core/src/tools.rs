//! Tool registry.
//!
//! Every tool the agent loop can execute -- built-in or an MCP proxy --
//! registers here under a unique name with a JSON-schema descriptor.
//! The loop only ever sees this seam; it does not know which tools are
//! local and which fan out to a tool-server subprocess.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use clawgate_types::GateError;

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name as exposed to the model.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema of the tool's parameters.
    fn schema(&self) -> serde_json::Value;

    /// Execute with the model-supplied arguments, returning result
    /// text. Failures become tool-result errors, not turn failures.
    async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String>;
}

/// Registry of callable tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "tool registered");
        self.tools.write().unwrap().insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool descriptors in the OpenAI function format, sorted by name
    /// for a stable prompt layout.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        let tools = self.tools.read().unwrap();
        let mut entries: Vec<(&String, &Arc<dyn Tool>)> = tools.iter().collect();
        entries.sort_by_key(|(name, _)| name.as_str());
        entries
            .into_iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description(),
                        "parameters": tool.schema(),
                    }
                })
            })
            .collect()
    }

    /// Execute `name` with `args`. Unknown names are an error.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> clawgate_types::Result<String> {
        let tool = self.get(name).ok_or_else(|| GateError::Tool {
            message: format!("unknown tool: {name}"),
        })?;
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input back"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn schemas_are_openai_function_shaped() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "echo");
        assert_eq!(
            schemas[0]["function"]["parameters"]["type"],
            "object"
        );
    }

    #[test]
    fn reregistration_replaces() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Echo));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["echo"]);
    }
}
