//! Message bus decoupling transports from the agent loop.
//!
//! Provides a thread-safe [`MessageBus`] with two sides:
//!
//! - **inbound**: a bounded MPSC channel with a single consumer (the
//!   agent loop). When the consumer stalls and the buffer fills,
//!   publishers block (or get an error from the non-async publish) --
//!   deliberate backpressure onto transports.
//! - **outbound**: a broadcast channel fanned out to every subscriber
//!   (one per gateway server, plus any channel adapters). Ordering is
//!   preserved per subscriber; a subscriber that falls more than the
//!   capacity behind skips the overwritten messages with a warning.

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

use clawgate_types::event::{InboundMessage, OutboundMessage};
use clawgate_types::GateError;

/// Default capacity for both channel sides.
pub const DEFAULT_CAPACITY: usize = 256;

/// The inbound/outbound queue pair.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
}

impl MessageBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom capacity. Higher buffers more burst
    /// at the cost of memory; lower tightens backpressure.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, _) = broadcast::channel(capacity);
        debug!(capacity, "message bus created");
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
        }
    }

    /// Publish an inbound message without waiting. Errors when the
    /// buffer is full (backpressure) or the consumer is gone.
    pub fn publish_inbound(&self, msg: InboundMessage) -> clawgate_types::Result<()> {
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "publishing inbound message");
        self.inbound_tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                GateError::Channel("inbound channel full (backpressure)".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                GateError::Channel("inbound channel closed".into())
            }
        })
    }

    /// Publish an inbound message, waiting while the buffer is full.
    /// Prefer this in async contexts so messages are not dropped.
    pub async fn publish_inbound_async(&self, msg: InboundMessage) -> clawgate_types::Result<()> {
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "publishing inbound message (async)");
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|e| GateError::Channel(format!("inbound channel closed: {e}")))
    }

    /// Consume the next inbound message. `None` when every sender has
    /// been dropped and the buffer is drained.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Publish an outbound message to every current subscriber. With
    /// no subscribers the message is dropped silently -- nothing is
    /// listening yet, which is normal during startup.
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "publishing outbound message");
        let _ = self.outbound_tx.send(msg);
    }

    /// Subscribe to the outbound side. Each subscriber sees every
    /// message published after the subscription, in publish order.
    pub fn subscribe_outbound(&self) -> OutboundSubscriber {
        OutboundSubscriber {
            rx: self.outbound_tx.subscribe(),
        }
    }

    /// A cloneable sender handle for publishing inbound messages, for
    /// transports that outlive borrows of the bus.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber of the outbound fan-out.
pub struct OutboundSubscriber {
    rx: broadcast::Receiver<OutboundMessage>,
}

impl OutboundSubscriber {
    /// The next outbound message, or `None` when the bus is gone.
    /// Lagged gaps are skipped with a warning.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "outbound subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawgate_types::event::MessageState;
    use std::collections::HashMap;

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage {
            channel: "test".into(),
            sender_id: "user1".into(),
            chat_id: "agent:main:chat1|r1".into(),
            content: content.into(),
            session_key: "chat1".into(),
            timestamp: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    fn outbound(content: &str) -> OutboundMessage {
        OutboundMessage {
            channel: "web".into(),
            chat_id: "agent:main:chat1|r1".into(),
            content: content.into(),
            state: MessageState::Final,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn publish_and_consume_inbound_in_order() {
        let bus = MessageBus::new();
        for i in 0..5 {
            bus.publish_inbound(inbound(&format!("msg-{i}"))).unwrap();
        }
        for i in 0..5 {
            let msg = bus.consume_inbound().await.unwrap();
            assert_eq!(msg.content, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn outbound_fans_out_to_all_subscribers() {
        let bus = MessageBus::new();
        let mut sub1 = bus.subscribe_outbound();
        let mut sub2 = bus.subscribe_outbound();

        bus.publish_outbound(outbound("hello"));

        assert_eq!(sub1.recv().await.unwrap().content, "hello");
        assert_eq!(sub2.recv().await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn outbound_ordering_per_subscriber() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_outbound();
        for i in 0..10 {
            bus.publish_outbound(outbound(&format!("out-{i}")));
        }
        for i in 0..10 {
            assert_eq!(sub.recv().await.unwrap().content, format!("out-{i}"));
        }
    }

    #[tokio::test]
    async fn outbound_without_subscribers_does_not_error() {
        let bus = MessageBus::new();
        bus.publish_outbound(outbound("into the void"));
    }

    #[tokio::test]
    async fn subscriber_misses_messages_before_subscription() {
        let bus = MessageBus::new();
        bus.publish_outbound(outbound("early"));
        let mut sub = bus.subscribe_outbound();
        bus.publish_outbound(outbound("late"));
        assert_eq!(sub.recv().await.unwrap().content, "late");
    }

    #[tokio::test]
    async fn inbound_backpressure_errors_on_full_buffer() {
        let bus = MessageBus::with_capacity(2);
        bus.publish_inbound(inbound("a")).unwrap();
        bus.publish_inbound(inbound("b")).unwrap();
        let err = bus.publish_inbound(inbound("overflow")).unwrap_err();
        assert!(err.to_string().contains("backpressure"));
    }

    #[tokio::test]
    async fn async_publish_waits_for_space() {
        let bus = std::sync::Arc::new(MessageBus::with_capacity(1));
        bus.publish_inbound(inbound("first")).unwrap();

        let bus_producer = bus.clone();
        let producer = tokio::spawn(async move {
            bus_producer
                .publish_inbound_async(inbound("second"))
                .await
                .unwrap();
        });

        tokio::task::yield_now().await;
        assert_eq!(bus.consume_inbound().await.unwrap().content, "first");
        producer.await.unwrap();
        assert_eq!(bus.consume_inbound().await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn concurrent_publishers_all_delivered() {
        let bus = std::sync::Arc::new(MessageBus::new());
        let mut handles = Vec::new();
        for i in 0..10 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                bus.publish_inbound_async(inbound(&format!("p{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut received = Vec::new();
        for _ in 0..10 {
            received.push(bus.consume_inbound().await.unwrap().content);
        }
        assert_eq!(received.len(), 10);
    }

    #[test]
    fn bus_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MessageBus>();
    }
}
