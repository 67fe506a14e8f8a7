//! API-key rotation across profiles sharing one provider endpoint.
//!
//! [`KeyRotator`] hands out the least-recently-used profile that is not
//! in cooldown. [`AuthRotatingProvider`] wraps one sub-provider per
//! profile and rotates on every call; on a retriable failure the
//! profile is put in cooldown and the error propagates so the outer
//! fallback chain may try another candidate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::classify::{classify_error, FailoverReason};
use crate::cooldown::CooldownTracker;
use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// One API-key profile.
#[derive(Debug, Clone)]
pub struct KeyProfile {
    /// Stable profile id (used as the cooldown key).
    pub id: String,
    /// The API key itself.
    pub api_key: String,
}

/// Round-robin rotation over key profiles, skipping cooled-down ones.
pub struct KeyRotator {
    profiles: Vec<KeyProfile>,
    cooldowns: Arc<CooldownTracker>,
    last_used: Mutex<HashMap<String, Instant>>,
}

impl KeyRotator {
    /// Create a rotator over `profiles` sharing `cooldowns`.
    pub fn new(profiles: Vec<KeyProfile>, cooldowns: Arc<CooldownTracker>) -> Self {
        Self {
            profiles,
            cooldowns,
            last_used: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the available profile with the oldest `last_used`, marking
    /// it used. Returns `None` when every profile is in cooldown.
    pub fn next_available(&self) -> Option<KeyProfile> {
        let mut last_used = self.last_used.lock().unwrap();
        let chosen = self
            .profiles
            .iter()
            .filter(|p| self.cooldowns.is_available(&p.id))
            // A never-used profile (None) sorts before any used one.
            .min_by_key(|p| last_used.get(&p.id).copied())?
            .clone();
        last_used.insert(chosen.id.clone(), Instant::now());
        Some(chosen)
    }

    /// Record a failure against a profile.
    pub fn mark_failure(&self, id: &str, reason: FailoverReason) {
        self.cooldowns.mark_failure(id, reason);
    }

    /// Clear a profile's failure state.
    pub fn mark_success(&self, id: &str) {
        self.cooldowns.mark_success(id);
    }

    /// Number of configured profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether no profiles are configured.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// A provider that rotates across one sub-provider per key profile.
pub struct AuthRotatingProvider {
    name: String,
    rotator: Arc<KeyRotator>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl AuthRotatingProvider {
    /// Build a rotating provider. `make` constructs the sub-provider
    /// for each profile (typically an
    /// [`OpenAiCompatProvider`](crate::OpenAiCompatProvider) bound to
    /// that profile's key).
    pub fn new(
        name: impl Into<String>,
        profiles: Vec<KeyProfile>,
        cooldowns: Arc<CooldownTracker>,
        make: impl Fn(&KeyProfile) -> Arc<dyn Provider>,
    ) -> Self {
        let providers = profiles
            .iter()
            .map(|p| (p.id.clone(), make(p)))
            .collect();
        Self {
            name: name.into(),
            rotator: Arc::new(KeyRotator::new(profiles, cooldowns)),
            providers,
        }
    }

    /// The underlying rotator (shared for inspection and tests).
    pub fn rotator(&self) -> &Arc<KeyRotator> {
        &self.rotator
    }
}

#[async_trait]
impl Provider for AuthRotatingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let profile = self.rotator.next_available().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "{}: all API key profiles are cooling down",
                self.name
            ))
        })?;

        let provider = self
            .providers
            .get(&profile.id)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("no provider for profile {}", profile.id))
            })?
            .clone();

        debug!(provider = %self.name, profile = %profile.id, "rotating onto profile");

        match provider.chat(request).await {
            Ok(response) => {
                self.rotator.mark_success(&profile.id);
                Ok(response)
            }
            Err(err) => {
                if let Some(fe) = classify_error(&err, &profile.id, &request.model) {
                    if fe.is_retriable() {
                        warn!(
                            profile = %profile.id,
                            reason = %fe.reason,
                            "profile failed, entering cooldown"
                        );
                        self.rotator.mark_failure(&profile.id, fe.reason);
                    }
                }
                Err(err)
            }
        }
    }
}
