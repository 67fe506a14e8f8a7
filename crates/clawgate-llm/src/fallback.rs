//! Ordered model-candidate execution under one logical request.
//!
//! [`FallbackChain::run`] walks a candidate list in order, skipping
//! keys in cooldown, classifying failures, and stopping early on
//! non-retriable errors or caller cancellation. It never retries the
//! same candidate twice within one call; retrying is the next call's
//! problem once cooldowns expire.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::{classify_error, FailoverError, FailoverReason};
use crate::cooldown::CooldownTracker;
use crate::error::ProviderError;

/// A `provider/model` candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelRef {
    /// Provider name.
    pub provider: String,
    /// Model name with the provider prefix stripped.
    pub model: String,
}

impl ModelRef {
    /// Parse a candidate string with provider-prefix awareness.
    ///
    /// `"openai/gpt-4o"` splits on the first `/` when `openai` is a
    /// known provider; otherwise the whole string is the model and
    /// `default_provider` is assumed (so model names that themselves
    /// contain `/`, like `meta/llama-3.3-70b` routed through a
    /// different provider, do not mis-split).
    pub fn parse(raw: &str, known_providers: &[String], default_provider: &str) -> Self {
        let raw = raw.trim();
        if let Some((prefix, rest)) = raw.split_once('/') {
            if known_providers.iter().any(|p| p == prefix) && !rest.is_empty() {
                return Self {
                    provider: prefix.to_string(),
                    model: rest.to_string(),
                };
            }
        }
        Self {
            provider: default_provider.to_string(),
            model: raw.to_string(),
        }
    }

    /// Canonical cooldown key: `provider/model`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Drop duplicate candidates, keeping the first occurrence of each
/// canonical `provider/model` key.
pub fn dedup_candidates(candidates: Vec<ModelRef>) -> Vec<ModelRef> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.key()))
        .collect()
}

/// The outcome of one candidate attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The attempt ran and failed.
    Failed {
        /// Classified reason (unclassifiable errors become `unknown`).
        reason: FailoverReason,
        /// How long the attempt took.
        duration: Duration,
    },
    /// The candidate was skipped because its key is cooling down.
    Skipped {
        /// Remaining cooldown at the time of the skip.
        remaining: Duration,
    },
}

/// One entry in the attempt log of a fallback run.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Provider of the candidate.
    pub provider: String,
    /// Model of the candidate.
    pub model: String,
    /// What happened.
    pub outcome: AttemptOutcome,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Failed { reason, duration } => write!(
                f,
                "{}/{}: {} after {}ms",
                self.provider,
                self.model,
                reason,
                duration.as_millis()
            ),
            AttemptOutcome::Skipped { remaining } => write!(
                f,
                "{}/{}: skipped (cooldown {}s remaining)",
                self.provider,
                self.model,
                remaining.as_secs()
            ),
        }
    }
}

/// Why a fallback run produced no response.
#[derive(Debug)]
pub enum FallbackError {
    /// The caller cancelled the request.
    Cancelled,
    /// A candidate failed with a non-retriable classification.
    Fatal(FailoverError),
    /// Every candidate failed or was skipped.
    Exhausted {
        /// The full attempt log, in candidate order.
        attempts: Vec<Attempt>,
    },
}

impl fmt::Display for FallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackError::Cancelled => write!(f, "cancelled"),
            FallbackError::Fatal(fe) => write!(f, "{fe}"),
            FallbackError::Exhausted { attempts } => {
                write!(f, "all {} candidates exhausted: ", attempts.len())?;
                let summary: Vec<String> = attempts.iter().map(|a| a.to_string()).collect();
                f.write_str(&summary.join("; "))
            }
        }
    }
}

impl std::error::Error for FallbackError {}

/// A successful fallback run.
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    /// The winning response.
    pub response: T,
    /// The candidate that produced it.
    pub winner: ModelRef,
    /// Attempts made before the winner (failures and skips).
    pub attempts: Vec<Attempt>,
}

/// Executes candidate lists against a shared cooldown tracker.
pub struct FallbackChain {
    cooldowns: Arc<CooldownTracker>,
}

impl FallbackChain {
    /// Create a chain over `cooldowns`.
    pub fn new(cooldowns: Arc<CooldownTracker>) -> Self {
        Self { cooldowns }
    }

    /// The shared cooldown tracker.
    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Run `attempt` against each candidate in order.
    ///
    /// Candidates whose key is cooling down are recorded as skipped.
    /// Retriable failures put the key in cooldown and continue;
    /// non-retriable ones stop the run. Cancellation is checked before
    /// each candidate and propagates from mid-attempt errors.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        candidates: &[ModelRef],
        mut attempt: F,
    ) -> Result<FallbackOutcome<T>, FallbackError>
    where
        F: FnMut(ModelRef) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = Vec::new();

        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(FallbackError::Cancelled);
            }

            let key = candidate.key();
            if !self.cooldowns.is_available(&key) {
                let remaining = self.cooldowns.remaining(&key).unwrap_or_default();
                debug!(candidate = %key, remaining_secs = remaining.as_secs(), "skipping cooled-down candidate");
                attempts.push(Attempt {
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    outcome: AttemptOutcome::Skipped { remaining },
                });
                continue;
            }

            let start = Instant::now();
            match attempt(candidate.clone()).await {
                Ok(response) => {
                    self.cooldowns.mark_success(&key);
                    return Ok(FallbackOutcome {
                        response,
                        winner: candidate.clone(),
                        attempts,
                    });
                }
                Err(ProviderError::Cancelled) => return Err(FallbackError::Cancelled),
                Err(err) => {
                    let duration = start.elapsed();
                    let classified =
                        classify_error(&err, &candidate.provider, &candidate.model);
                    let reason = match classified {
                        Some(fe) if !fe.is_retriable() => {
                            warn!(candidate = %key, error = %err, "non-retriable failure, aborting fallback");
                            return Err(FallbackError::Fatal(fe));
                        }
                        Some(fe) => fe.reason,
                        // Unclassifiable errors are retriable unknowns.
                        None => FailoverReason::Unknown,
                    };
                    warn!(
                        candidate = %key,
                        reason = %reason,
                        error = %err,
                        "candidate failed, trying next"
                    );
                    self.cooldowns.mark_failure(&key, reason);
                    attempts.push(Attempt {
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        outcome: AttemptOutcome::Failed { reason, duration },
                    });
                }
            }
        }

        Err(FallbackError::Exhausted { attempts })
    }

    /// Simplified variant for image requests: no cooldowns, and only
    /// `format` (image dimension / size) failures stop the run;
    /// everything else moves on until the list is exhausted.
    pub async fn run_image<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        candidates: &[ModelRef],
        mut attempt: F,
    ) -> Result<FallbackOutcome<T>, FallbackError>
    where
        F: FnMut(ModelRef) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = Vec::new();

        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(FallbackError::Cancelled);
            }

            let start = Instant::now();
            match attempt(candidate.clone()).await {
                Ok(response) => {
                    return Ok(FallbackOutcome {
                        response,
                        winner: candidate.clone(),
                        attempts,
                    });
                }
                Err(ProviderError::Cancelled) => return Err(FallbackError::Cancelled),
                Err(err) => {
                    let classified =
                        classify_error(&err, &candidate.provider, &candidate.model);
                    if let Some(fe) = &classified {
                        if fe.reason == FailoverReason::Format {
                            return Err(FallbackError::Fatal(fe.clone()));
                        }
                    }
                    attempts.push(Attempt {
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        outcome: AttemptOutcome::Failed {
                            reason: classified
                                .map(|fe| fe.reason)
                                .unwrap_or(FailoverReason::Unknown),
                            duration: start.elapsed(),
                        },
                    });
                }
            }
        }

        Err(FallbackError::Exhausted { attempts })
    }
}
