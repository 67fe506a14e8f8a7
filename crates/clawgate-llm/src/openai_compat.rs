//! OpenAI-compatible provider implementation.
//!
//! [`OpenAiCompatProvider`] works with any API that follows the OpenAI
//! chat completion format: OpenAI, Anthropic's compat endpoint, Groq,
//! DeepSeek, Mistral, OpenRouter, and many more. It implements the
//! non-streaming `Chat` shape the core consumes; classification of the
//! errors it returns is the [`classify`](crate::classify) module's job.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::LlmProviderConfig;
use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse, ToolCall, Usage};

/// An LLM provider speaking the OpenAI chat completion API.
pub struct OpenAiCompatProvider {
    config: LlmProviderConfig,
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiCompatProvider {
    /// Create a provider bound to one API key.
    pub fn new(config: LlmProviderConfig, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            api_key: api_key.into(),
        }
    }

    /// Returns the provider configuration.
    pub fn config(&self) -> &LlmProviderConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
        });
        let obj = body.as_object_mut().expect("body is an object");
        if !request.tools.is_empty() {
            obj.insert("tools".into(), serde_json::Value::Array(request.tools.clone()));
        }
        if let Some(max_tokens) = request.options.max_tokens {
            obj.insert("max_tokens".into(), max_tokens.into());
        }
        if let Some(temperature) = request.options.temperature {
            obj.insert("temperature".into(), temperature.into());
        }
        if self.config.supports_prompt_cache {
            if let Some(ref key) = request.options.prompt_cache_key {
                obj.insert("prompt_cache_key".into(), key.clone().into());
            }
        }
        body
    }
}

/// Wire shape of an OpenAI chat completion response, reduced to the
/// fields we read.
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Assistant message as providers send it. `content` is null when the
/// model only called tools.
#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "{}: no API key",
                self.config.name
            )));
        }

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(&self.build_body(request)).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("bad completion body: {e}")))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".into()))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: wire.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ChatOptions};

    fn provider(supports_cache: bool) -> OpenAiCompatProvider {
        let mut config = LlmProviderConfig::new("openai", "https://api.openai.com/v1/");
        config.supports_prompt_cache = supports_cache;
        OpenAiCompatProvider::new(config, "sk-test")
    }

    fn request_with_options() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![serde_json::json!({"type": "function", "function": {"name": "t"}})],
            options: ChatOptions {
                max_tokens: Some(512),
                temperature: Some(0.2),
                prompt_cache_key: Some("session-1".into()),
            },
        }
    }

    #[test]
    fn completions_url_strips_trailing_slash() {
        assert_eq!(
            provider(false).completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn body_includes_options() {
        let body = provider(false).build_body(&request_with_options());
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
        // Not advertised as supported, so never sent.
        assert!(body.get("prompt_cache_key").is_none());
    }

    #[test]
    fn body_sends_cache_key_when_supported() {
        let body = provider(true).build_body(&request_with_options());
        assert_eq!(body["prompt_cache_key"], "session-1");
    }

    #[test]
    fn body_omits_empty_tools() {
        let req = ChatRequest::new("gpt-4o", vec![ChatMessage::user("hi")]);
        let body = provider(false).build_body(&req);
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn missing_api_key_is_not_configured() {
        let config = LlmProviderConfig::new("openai", "https://api.openai.com/v1");
        let provider = OpenAiCompatProvider::new(config, "");
        let err = provider
            .chat(&ChatRequest::new("gpt-4o", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn wire_response_parses_tool_calls() {
        let json = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;
        let wire: WireResponse = serde_json::from_str(json).unwrap();
        let choice = &wire.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "read_file");
        assert_eq!(wire.usage.as_ref().unwrap().total_tokens, 12);
    }
}
