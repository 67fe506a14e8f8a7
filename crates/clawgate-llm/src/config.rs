//! Provider endpoint configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for one OpenAI-compatible provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Provider name; also the model prefix (e.g. "openai" routes
    /// "openai/gpt-4o").
    pub name: String,

    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Whether the endpoint accepts `prompt_cache_key`.
    #[serde(default)]
    pub supports_prompt_cache: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl LlmProviderConfig {
    /// Minimal config for `name` at `base_url`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            headers: HashMap::new(),
            supports_prompt_cache: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_defaults() {
        let config = LlmProviderConfig::new("openai", "https://api.openai.com/v1");
        assert_eq!(config.timeout_secs, 120);
        assert!(!config.supports_prompt_cache);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn serde_defaults() {
        let json = r#"{"name":"groq","base_url":"https://api.groq.com/openai/v1"}"#;
        let config: LlmProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout_secs, 120);
    }
}
