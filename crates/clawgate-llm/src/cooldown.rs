//! Per-key cooldown tracking with reason-dependent backoff.
//!
//! [`CooldownTracker`] maps a logical key (a `provider/model` pair or
//! an API-key profile id) to its consecutive-failure state. The
//! fallback chain and key rotator consult [`is_available`]
//! (CooldownTracker::is_available) before spending an attempt on a key
//! that just failed.
//!
//! The schedule grows exponentially for transient reasons and is flat
//! for reasons where hammering cannot help (billing, auth). `format`
//! failures never enter cooldown: the request itself is broken, not
//! the key.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::classify::FailoverReason;

/// Cooldown state for one key.
#[derive(Debug, Clone)]
pub struct CooldownEntry {
    /// Consecutive failures since the last success.
    pub failures: u32,
    /// When the most recent failure was recorded.
    pub last_failure: Instant,
    /// The reason of the most recent failure.
    pub reason: FailoverReason,
}

impl CooldownEntry {
    /// The duration of this entry's cooldown window.
    fn window(&self) -> Duration {
        cooldown_for(self.reason, self.failures)
    }
}

/// Compute the cooldown window for a reason after `failures`
/// consecutive failures.
pub fn cooldown_for(reason: FailoverReason, failures: u32) -> Duration {
    let exp = 2u64.saturating_pow(failures.saturating_sub(1).min(4));
    match reason {
        FailoverReason::Billing => Duration::from_secs(5 * 3600),
        FailoverReason::Auth => Duration::from_secs(15 * 60),
        FailoverReason::RateLimit | FailoverReason::Overloaded => {
            Duration::from_secs((30 * exp).min(300))
        }
        FailoverReason::Timeout | FailoverReason::Unknown => {
            Duration::from_secs((10 * exp).min(120))
        }
        FailoverReason::ModelInvalid => Duration::from_secs(60),
        FailoverReason::Format => Duration::ZERO,
    }
}

/// Tracks per-key failure state. Read-mostly; guarded by a
/// [`RwLock`] that is never held across I/O.
#[derive(Default)]
pub struct CooldownTracker {
    entries: RwLock<HashMap<String, CooldownEntry>>,
}

impl CooldownTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `key`. `format` failures are ignored.
    pub fn mark_failure(&self, key: &str, reason: FailoverReason) {
        if reason == FailoverReason::Format {
            return;
        }
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(key.to_string()).or_insert(CooldownEntry {
            failures: 0,
            last_failure: Instant::now(),
            reason,
        });
        entry.failures += 1;
        entry.last_failure = Instant::now();
        entry.reason = reason;
        debug!(
            key,
            failures = entry.failures,
            reason = %reason,
            cooldown_secs = entry.window().as_secs(),
            "key entered cooldown"
        );
    }

    /// Clear the failure state for `key`.
    pub fn mark_success(&self, key: &str) {
        let mut entries = self.entries.write().unwrap();
        if entries.remove(key).is_some() {
            debug!(key, "key cooldown cleared");
        }
    }

    /// Whether `key` may be used now.
    pub fn is_available(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap();
        match entries.get(key) {
            Some(entry) => entry.last_failure.elapsed() >= entry.window(),
            None => true,
        }
    }

    /// Time until `key` becomes available, or `None` when it already is.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        entry.window().checked_sub(entry.last_failure.elapsed())
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn entry(&self, key: &str) -> Option<CooldownEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }
}
