//! Provider error classification for failover decisions.
//!
//! [`classify_error`] is a pure function mapping a [`ProviderError`] to
//! a [`FailoverError`] (reason + retriability) or `None` when the error
//! should not participate in failover at all (success, cancellation) or
//! could not be recognized (the fallback chain then treats it as a
//! retriable unknown).
//!
//! Classification cooperates between two signals: an HTTP status
//! extracted from the error, and an ordered table of lowercase
//! substring patterns. A text match overrides the status verdict, so a
//! 400 whose body says "not a valid model ID" classifies as retriable
//! `model_invalid` rather than terminal `format`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ProviderError;

/// Why a provider attempt failed, from the fallback chain's viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverReason {
    /// 401/403 or an authentication-flavored message.
    Auth,
    /// 402 or an out-of-credit message.
    Billing,
    /// 429 or a rate-limit message.
    RateLimit,
    /// Deadline exceeded, 408, or a 5xx response.
    Timeout,
    /// The provider reported itself overloaded.
    Overloaded,
    /// The model name is unknown, unsupported, or retired.
    ModelInvalid,
    /// The request itself is malformed (schema, tool ids, image size).
    /// Never retriable.
    Format,
    /// Unclassified; the chain retries these.
    Unknown,
}

impl FailoverReason {
    /// Whether the fallback chain may try another candidate after this.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, FailoverReason::Format)
    }

    /// Stable lowercase name used in logs and attempt records.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverReason::Auth => "auth",
            FailoverReason::Billing => "billing",
            FailoverReason::RateLimit => "rate_limit",
            FailoverReason::Timeout => "timeout",
            FailoverReason::Overloaded => "overloaded",
            FailoverReason::ModelInvalid => "model_invalid",
            FailoverReason::Format => "format",
            FailoverReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified provider failure.
#[derive(Debug, Clone)]
pub struct FailoverError {
    /// The classified reason.
    pub reason: FailoverReason,
    /// The provider that produced the error.
    pub provider: String,
    /// The model that was requested.
    pub model: String,
    /// The original error message.
    pub message: String,
}

impl FailoverError {
    /// Whether the fallback chain may continue past this error.
    pub fn is_retriable(&self) -> bool {
        self.reason.is_retriable()
    }
}

impl fmt::Display for FailoverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} failed ({}): {}",
            self.provider, self.model, self.reason, self.message
        )
    }
}

impl std::error::Error for FailoverError {}

/// Patterns that resolve a 400 body into model-invalid instead of
/// format. Deliberately broad: in a 400 body, "unavailable" or
/// "not supported" is about the model.
const MODEL_INVALID_400_PATTERNS: &[&str] = &[
    "model not found",
    "invalid model",
    "not a valid model",
    "no such model",
    "not supported",
    "deprecated",
    "unavailable",
];

/// Status-independent model-invalid patterns. Narrower than the 400
/// list: a bare "unavailable" next to a 503 means the service, not
/// the model.
const MODEL_INVALID_TEXT_PATTERNS: &[&str] = &[
    "model not found",
    "invalid model",
    "not a valid model",
    "no such model",
    "model is not supported",
    "model has been deprecated",
];

/// Ordered text-pattern table. The first matching row wins; evaluated
/// irrespective of any HTTP status, overriding its verdict.
const PATTERN_TABLE: &[(&[&str], FailoverReason)] = &[
    (
        &[
            "rate limit",
            "rate_limit",
            "too many requests",
            "quota exceeded",
            "requests per minute",
        ],
        FailoverReason::RateLimit,
    ),
    (
        &["overloaded_error", "overloaded", "at capacity"],
        FailoverReason::Overloaded,
    ),
    (
        &[
            "billing",
            "insufficient credit",
            "insufficient funds",
            "insufficient_quota",
            "payment required",
            "balance is too low",
        ],
        FailoverReason::Billing,
    ),
    (
        &["timed out", "timeout", "deadline exceeded"],
        FailoverReason::Timeout,
    ),
    (
        &[
            "invalid api key",
            "invalid x-api-key",
            "incorrect api key",
            "expired token",
            "authentication",
            "unauthorized",
        ],
        FailoverReason::Auth,
    ),
    (MODEL_INVALID_TEXT_PATTERNS, FailoverReason::ModelInvalid),
    (
        &[
            "tool_use_id",
            "did not match pattern",
            "schema validation",
            "invalid schema",
            "invalid request body",
        ],
        FailoverReason::Format,
    ),
    (
        &[
            "image exceeds",
            "image dimensions",
            "image size",
            "image too large",
        ],
        FailoverReason::Format,
    ),
];

/// Extract an HTTP status code embedded in an error message, e.g.
/// "api error (status 429): ..." or "HTTP 503: unavailable".
fn extract_status(message: &str) -> Option<u16> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(?:status|http|code)\D{0,3}([1-5]\d\d)\b").expect("valid status regex")
    });
    re.captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Map an HTTP status to a tentative reason. A 400 is resolved against
/// the message body: model-invalid patterns make it retriable
/// `model_invalid`, anything else is `format`.
fn classify_status(status: u16, lowered: &str) -> Option<FailoverReason> {
    match status {
        401 | 403 => Some(FailoverReason::Auth),
        402 => Some(FailoverReason::Billing),
        408 => Some(FailoverReason::Timeout),
        429 => Some(FailoverReason::RateLimit),
        500..=599 => Some(FailoverReason::Timeout),
        400 => {
            if MODEL_INVALID_400_PATTERNS
                .iter()
                .any(|p| lowered.contains(p))
            {
                Some(FailoverReason::ModelInvalid)
            } else {
                Some(FailoverReason::Format)
            }
        }
        _ => None,
    }
}

/// Classify a provider error for failover purposes.
///
/// Returns `None` for cancellation (the chain must not fall back) and
/// for errors that match nothing (the chain treats those as retriable
/// `unknown`).
pub fn classify_error(
    err: &ProviderError,
    provider: &str,
    model: &str,
) -> Option<FailoverError> {
    // Structural sentinels first.
    match err {
        ProviderError::Cancelled => return None,
        ProviderError::Timeout => {
            return Some(make(FailoverReason::Timeout, provider, model, err));
        }
        _ => {}
    }

    let message = err.to_string();
    let lowered = message.to_lowercase();

    let status = match err {
        ProviderError::Api { status, .. } => Some(*status),
        _ => extract_status(&message),
    };
    let by_status = status.and_then(|s| classify_status(s, &lowered));

    let by_text = PATTERN_TABLE.iter().find_map(|(patterns, reason)| {
        patterns
            .iter()
            .any(|p| lowered.contains(p))
            .then_some(*reason)
    });

    // Text verdict overrides the status verdict.
    by_text
        .or(by_status)
        .map(|reason| make(reason, provider, model, err))
}

fn make(
    reason: FailoverReason,
    provider: &str,
    model: &str,
    err: &ProviderError,
) -> FailoverError {
    FailoverError {
        reason,
        provider: provider.into(),
        model: model.into(),
        message: err.to_string(),
    }
}
