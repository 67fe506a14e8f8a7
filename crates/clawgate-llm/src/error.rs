//! Provider error types for clawgate-llm.
//!
//! All provider operations return [`Result<T>`] which uses
//! [`ProviderError`] as the error type. The [`classify`](crate::classify)
//! module maps these onto failover reasons; `Cancelled` and `Timeout`
//! are the two sentinels it recognizes structurally.

use thiserror::Error;

/// Errors that can occur when interacting with an LLM provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The caller cancelled the request. Never triggers fallback.
    #[error("cancelled")]
    Cancelled,

    /// The request exceeded its deadline.
    #[error("timeout")]
    Timeout,

    /// The provider returned a non-success HTTP status.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or provider-supplied message.
        message: String,
    },

    /// The HTTP request itself failed (connect, TLS, etc.).
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The provider has not been configured (e.g. missing API key).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_api_error() {
        let err = ProviderError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.to_string(), "api error (status 429): slow down");
    }

    #[test]
    fn display_sentinels() {
        assert_eq!(ProviderError::Cancelled.to_string(), "cancelled");
        assert_eq!(ProviderError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn json_error_conversion() {
        let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ProviderError = serde_err.into();
        assert!(err.to_string().starts_with("json error:"));
    }
}
