//! Connection registry and subscription table.
//!
//! The gateway owns one [`GatewayConn`] per WebSocket connection. All
//! writes to a connection -- method responses from its read loop and
//! events from the outbound pump -- serialize through the connection's
//! write mutex, because the underlying socket forbids concurrent
//! writes.
//!
//! The subscription table maps a session key to the set of connections
//! that subscribed to it. A connection may appear under many keys; on
//! disconnect it is removed from every set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Identifies one connection for the lifetime of the server.
pub type ConnId = u64;

/// The raw write half of a connection.
#[async_trait]
pub trait ConnSink: Send + Sync {
    /// Write one text frame.
    async fn send_text(&self, text: String) -> Result<()>;
}

/// A connection handle whose writes are serialized by a mutex.
pub struct GatewayConn {
    id: ConnId,
    sink: Arc<dyn ConnSink>,
    write_lock: Mutex<()>,
}

impl GatewayConn {
    /// Wrap a sink.
    pub fn new(id: ConnId, sink: Arc<dyn ConnSink>) -> Self {
        Self {
            id,
            sink,
            write_lock: Mutex::new(()),
        }
    }

    /// The connection id.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Write one frame under the connection's write mutex.
    pub async fn send(&self, text: String) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.sink.send_text(text).await
    }
}

/// Connections and their session subscriptions.
#[derive(Default)]
pub struct SubscriptionTable {
    conns: RwLock<HashMap<ConnId, Arc<GatewayConn>>>,
    subs: RwLock<HashMap<String, HashSet<ConnId>>>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn add_conn(&self, conn: Arc<GatewayConn>) {
        self.conns.write().unwrap().insert(conn.id(), conn);
    }

    /// Look up a connection.
    pub fn conn(&self, id: ConnId) -> Option<Arc<GatewayConn>> {
        self.conns.read().unwrap().get(&id).cloned()
    }

    /// Remove a connection and drop it from every subscription set.
    pub fn remove_conn(&self, id: ConnId) {
        self.conns.write().unwrap().remove(&id);
        let mut subs = self.subs.write().unwrap();
        for set in subs.values_mut() {
            set.remove(&id);
        }
        subs.retain(|_, set| !set.is_empty());
        debug!(conn = id, "connection removed from subscription table");
    }

    /// Subscribe a connection to a session key.
    pub fn subscribe(&self, session_key: &str, id: ConnId) {
        self.subs
            .write()
            .unwrap()
            .entry(session_key.to_string())
            .or_default()
            .insert(id);
        debug!(conn = id, session = session_key, "subscribed");
    }

    /// Snapshot of the connections subscribed to `session_key`.
    pub fn subscribers(&self, session_key: &str) -> Vec<Arc<GatewayConn>> {
        let ids: Vec<ConnId> = {
            let subs = self.subs.read().unwrap();
            match subs.get(session_key) {
                Some(set) => set.iter().copied().collect(),
                None => return Vec::new(),
            }
        };
        let conns = self.conns.read().unwrap();
        ids.iter().filter_map(|id| conns.get(id).cloned()).collect()
    }

    /// Number of live connections.
    pub fn conn_count(&self) -> usize {
        self.conns.read().unwrap().len()
    }

    /// Number of subscribers for `session_key`.
    pub fn subscriber_count(&self, session_key: &str) -> usize {
        self.subs
            .read()
            .unwrap()
            .get(session_key)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}
