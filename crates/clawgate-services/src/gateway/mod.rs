//! The gateway: WebSocket protocol server, HTTP/JSON API, and the
//! outbound event pump.
//!
//! - [`frame`] -- the req/res/event frame protocol
//! - [`subs`] -- connection registry, per-connection write mutexes, and
//!   the subscription table
//! - [`methods`] -- method dispatch shared by every connection
//! - [`pump`] -- bus-to-subscriber event fan-out with `seq` stamping
//! - [`server`] -- axum router and the per-connection WebSocket loop
//! - [`http_api`] -- `POST /api/chat` and friends
//! - [`wire`] -- history conversion to the client message shape

pub mod frame;
pub mod http_api;
pub mod methods;
pub mod pump;
pub mod server;
pub mod subs;
pub mod wire;

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use clawgate_core::{AgentRegistry, HookRegistry, MessageBus, RateLimiter};
use clawgate_types::config::{GatewayConfig, WebSessionAgentBinding};

pub use frame::{codes, ErrorBody, GatewayFrame};
pub use methods::dispatch;
pub use pump::run_pump;
pub use server::{build_router, serve};
pub use subs::{ConnId, ConnSink, GatewayConn, SubscriptionTable};

/// Everything a gateway server shares across connections.
pub struct GatewayState {
    /// The agent registry.
    pub registry: Arc<AgentRegistry>,
    /// The message bus.
    pub bus: Arc<MessageBus>,
    /// Lifecycle hooks.
    pub hooks: Arc<HookRegistry>,
    /// Admission rate limits.
    pub limits: Arc<RateLimiter>,
    /// Session-key routing bindings.
    pub bindings: Vec<WebSessionAgentBinding>,
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// Connections and subscriptions.
    pub subs: Arc<SubscriptionTable>,
    /// Per-server monotonic event sequence.
    pub seq: AtomicU64,
    /// Tiebreaker for generated run ids.
    pub run_counter: AtomicU64,
    /// Root cancellation.
    pub cancel: CancellationToken,
    /// Connections that passed `connect` auth.
    pub authed: RwLock<HashSet<ConnId>>,
    /// Source of connection ids.
    pub next_conn_id: AtomicU64,
}

impl GatewayState {
    /// Assemble the shared state.
    pub fn new(
        registry: Arc<AgentRegistry>,
        bus: Arc<MessageBus>,
        hooks: Arc<HookRegistry>,
        limits: Arc<RateLimiter>,
        bindings: Vec<WebSessionAgentBinding>,
        config: GatewayConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bus,
            hooks,
            limits,
            bindings,
            config,
            subs: Arc::new(SubscriptionTable::new()),
            seq: AtomicU64::new(0),
            run_counter: AtomicU64::new(0),
            cancel,
            authed: RwLock::new(HashSet::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Whether WebSocket auth is configured at all.
    pub fn ws_auth_configured(&self) -> bool {
        !self.config.auth_token.is_empty() || !self.config.auth_password.is_empty()
    }
}
