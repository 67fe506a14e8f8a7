//! LLM provider abstraction for clawgate.
//!
//! This crate provides a unified interface for calling LLM APIs and the
//! machinery that keeps a multi-model configuration healthy under
//! provider failures. It is a standalone library with no dependencies
//! on other clawgate crates.
//!
//! # Architecture
//!
//! - [`Provider`] trait defines the chat completion interface
//! - [`OpenAiCompatProvider`] implements it for any OpenAI-compatible API
//! - [`classify_error`] maps provider errors to [`FailoverReason`]s
//! - [`CooldownTracker`] tracks per-key backoff windows
//! - [`KeyRotator`] / [`AuthRotatingProvider`] rotate API-key profiles
//! - [`FallbackChain`] executes an ordered candidate list under one
//!   logical request, honoring cooldowns and classification

pub mod classify;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod fallback;
pub mod openai_compat;
pub mod provider;
pub mod rotation;
pub mod types;

pub use classify::{classify_error, FailoverError, FailoverReason};
pub use config::LlmProviderConfig;
pub use cooldown::CooldownTracker;
pub use error::{ProviderError, Result};
pub use fallback::{
    dedup_candidates, Attempt, AttemptOutcome, FallbackChain, FallbackError, ModelRef,
};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use rotation::{AuthRotatingProvider, KeyProfile, KeyRotator};
pub use types::{ChatMessage, ChatOptions, ChatRequest, ChatResponse, FunctionCall, ToolCall, Usage};
