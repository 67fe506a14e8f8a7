//! Token-bucket rate limiting for inbound work.
//!
//! Three layers, each optional: a global bucket across all senders, a
//! bucket per sender id, and a bucket per tool name. The agent loop
//! checks the first two before admitting a turn and the tool bucket
//! before each tool call. A capacity of 0 disables a layer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use clawgate_types::config::{BucketConfig, LimitsConfig};

/// One token bucket.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(config: &BucketConfig) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            last_refill: Instant::now(),
        }
    }

    /// Refill elapsed tokens, then try to take one.
    fn try_take(&mut self, config: &BucketConfig) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens =
            (self.tokens + elapsed * config.refill_per_sec).min(f64::from(config.capacity));
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token buckets per user / per tool / global.
pub struct RateLimiter {
    config: LimitsConfig,
    global: Mutex<Bucket>,
    users: Mutex<HashMap<String, Bucket>>,
    tools: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter from config. Zero-capacity layers admit
    /// everything.
    pub fn new(config: LimitsConfig) -> Self {
        let global = Bucket::full(&config.global);
        Self {
            config,
            global: Mutex::new(global),
            users: Mutex::new(HashMap::new()),
            tools: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter that admits everything.
    pub fn unlimited() -> Self {
        Self::new(LimitsConfig::default())
    }

    /// Check the global and per-user buckets for one inbound message.
    /// The global bucket is consulted first so aggregate abuse from
    /// many distinct senders is still capped.
    pub fn allow_message(&self, sender_id: &str) -> bool {
        if self.config.global.capacity > 0
            && !self.global.lock().unwrap().try_take(&self.config.global)
        {
            debug!(sender_id, "global rate limit rejected message");
            return false;
        }
        if self.config.per_user.capacity > 0 {
            let mut users = self.users.lock().unwrap();
            let bucket = users
                .entry(sender_id.to_string())
                .or_insert_with(|| Bucket::full(&self.config.per_user));
            if !bucket.try_take(&self.config.per_user) {
                debug!(sender_id, "per-user rate limit rejected message");
                return false;
            }
        }
        true
    }

    /// Check the per-tool bucket before executing `tool`.
    pub fn allow_tool(&self, tool: &str) -> bool {
        if self.config.per_tool.capacity == 0 {
            return true;
        }
        let mut tools = self.tools.lock().unwrap();
        let bucket = tools
            .entry(tool.to_string())
            .or_insert_with(|| Bucket::full(&self.config.per_tool));
        let allowed = bucket.try_take(&self.config.per_tool);
        if !allowed {
            debug!(tool, "per-tool rate limit rejected call");
        }
        allowed
    }
}
