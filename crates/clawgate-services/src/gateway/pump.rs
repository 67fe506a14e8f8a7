//! The outbound event pump.
//!
//! One task per gateway server: subscribe to the bus, and for every
//! outbound message on the `web` channel build an `event:"chat"` frame
//! with the next `seq`, snapshot the session's subscribers, and write
//! to each in its own task. Writes for one event complete before the
//! next event is read, so each subscriber observes a strictly
//! increasing `seq`.
//!
//! `seq` is per server, not per session: two sessions multiplexed
//! through one gateway observe interleaved values.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use clawgate_core::routing::display_key;
use clawgate_types::event::{split_chat_id, MessageState, OutboundMessage};

use super::frame::GatewayFrame;
use super::GatewayState;

/// Run the pump until the bus closes or the root context cancels.
pub async fn run_pump(state: Arc<GatewayState>) {
    let mut subscription = state.bus.subscribe_outbound();
    info!("gateway outbound pump started");
    loop {
        let msg = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => {
                info!("outbound pump cancelled, exiting");
                return;
            }
            msg = subscription.recv() => msg,
        };
        match msg {
            Some(msg) => deliver(&state, msg).await,
            None => {
                info!("outbound bus closed, pump exiting");
                return;
            }
        }
    }
}

/// Fan one outbound message out to its subscribers.
pub async fn deliver(state: &GatewayState, msg: OutboundMessage) {
    if msg.channel != "web" {
        return;
    }

    let (session_key, run_id) = split_chat_id(&msg.chat_id);
    let subscribers = state.subs.subscribers(session_key);
    if subscribers.is_empty() {
        debug!(session = session_key, "no subscribers for outbound event");
        return;
    }

    let seq = state.seq.fetch_add(1, Ordering::Relaxed) + 1;
    let frame = GatewayFrame::event("chat", seq, event_payload(session_key, run_id, &msg));
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode event frame");
            return;
        }
    };

    // One write task per subscriber; all of them finish before the
    // next event is pulled off the bus.
    let writes = subscribers.into_iter().map(|conn| {
        let text = text.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.send(text).await {
                debug!(conn = conn.id(), error = %e, "event write failed");
            }
        })
    });
    join_all(writes).await;
}

fn event_payload(session_key: &str, run_id: &str, msg: &OutboundMessage) -> serde_json::Value {
    let state_str = match msg.state {
        MessageState::Partial => "partial",
        MessageState::Final => "final",
    };
    serde_json::json!({
        "runId": run_id,
        "sessionKey": display_key(session_key),
        "state": state_str,
        "message": {
            "role": "assistant",
            "content": [{"type": "text", "text": msg.content}],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::subs::test_sink::RecordingSink;
    use crate::gateway::{GatewayConn, GatewayState};
    use clawgate_core::agent::{AgentSettings, ProviderSet};
    use clawgate_core::{
        AgentRegistry, HookRegistry, MessageBus, RateLimiter, SessionStore, ToolRegistry,
    };
    use clawgate_llm::{CooldownTracker, FallbackChain};
    use clawgate_types::config::GatewayConfig;
    use tokio_util::sync::CancellationToken;

    fn make_state() -> Arc<GatewayState> {
        let agent = Arc::new(clawgate_core::Agent::new(
            "main",
            "/tmp/ws",
            vec![],
            Arc::new(SessionStore::new("main")),
            Arc::new(ToolRegistry::new()),
            Arc::new(ProviderSet::new()),
            FallbackChain::new(Arc::new(CooldownTracker::new())),
            AgentSettings::default(),
        ));
        GatewayState::new(
            Arc::new(AgentRegistry::new(vec![agent]).unwrap()),
            Arc::new(MessageBus::new()),
            Arc::new(HookRegistry::new()),
            Arc::new(RateLimiter::unlimited()),
            vec![],
            GatewayConfig::default(),
            CancellationToken::new(),
        )
    }

    fn outbound(chat_id: &str, content: &str, state: MessageState) -> OutboundMessage {
        OutboundMessage {
            channel: "web".into(),
            chat_id: chat_id.into(),
            content: content.into(),
            state,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn deliver_builds_chat_event() {
        let state = make_state();
        let sink = RecordingSink::new();
        state.subs.add_conn(Arc::new(GatewayConn::new(1, sink.clone())));
        state.subs.subscribe("agent:main:u42", 1);

        deliver(
            &state,
            outbound("agent:main:u42|R1", "hello", MessageState::Final),
        )
        .await;

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["type"], "event");
        assert_eq!(frame["event"], "chat");
        assert_eq!(frame["seq"], 1);
        assert_eq!(frame["payload"]["runId"], "R1");
        assert_eq!(frame["payload"]["sessionKey"], "u42");
        assert_eq!(frame["payload"]["state"], "final");
        assert_eq!(frame["payload"]["message"]["role"], "assistant");
        assert_eq!(
            frame["payload"]["message"]["content"][0]["text"],
            "hello"
        );
    }

    #[tokio::test]
    async fn non_web_channels_are_ignored() {
        let state = make_state();
        let sink = RecordingSink::new();
        state.subs.add_conn(Arc::new(GatewayConn::new(1, sink.clone())));
        state.subs.subscribe("agent:main:hb", 1);

        let mut msg = outbound("agent:main:hb|R1", "tick", MessageState::Final);
        msg.channel = "heartbeat".into();
        deliver(&state, msg).await;
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn unsubscribed_sessions_get_nothing() {
        let state = make_state();
        let sink = RecordingSink::new();
        state.subs.add_conn(Arc::new(GatewayConn::new(1, sink.clone())));
        state.subs.subscribe("agent:main:other", 1);

        deliver(
            &state,
            outbound("agent:main:u42|R1", "hello", MessageState::Final),
        )
        .await;
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn seq_is_strictly_increasing_per_subscriber() {
        let state = make_state();
        let sink = RecordingSink::new();
        state.subs.add_conn(Arc::new(GatewayConn::new(1, sink.clone())));
        state.subs.subscribe("agent:main:u42", 1);

        for i in 0..100 {
            deliver(
                &state,
                outbound(
                    "agent:main:u42|R1",
                    &format!("m{i}"),
                    MessageState::Partial,
                ),
            )
            .await;
        }

        let frames = sink.frames();
        assert_eq!(frames.len(), 100);
        let mut last_seq = 0u64;
        for text in frames {
            let frame: serde_json::Value =
                serde_json::from_str(&text).expect("well-formed JSON frame");
            let seq = frame["seq"].as_u64().unwrap();
            assert!(seq > last_seq, "seq {seq} not greater than {last_seq}");
            last_seq = seq;
        }
        assert!(!sink.overlapped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let state = make_state();
        let sink1 = RecordingSink::new();
        let sink2 = RecordingSink::new();
        state.subs.add_conn(Arc::new(GatewayConn::new(1, sink1.clone())));
        state.subs.add_conn(Arc::new(GatewayConn::new(2, sink2.clone())));
        state.subs.subscribe("agent:main:u42", 1);
        state.subs.subscribe("agent:main:u42", 2);

        deliver(
            &state,
            outbound("agent:main:u42|R1", "both", MessageState::Final),
        )
        .await;
        assert_eq!(sink1.frames().len(), 1);
        assert_eq!(sink2.frames().len(), 1);
    }

    #[tokio::test]
    async fn pump_consumes_from_bus() {
        let state = make_state();
        let sink = RecordingSink::new();
        state.subs.add_conn(Arc::new(GatewayConn::new(1, sink.clone())));
        state.subs.subscribe("agent:main:u42", 1);

        let pump_state = state.clone();
        let handle = tokio::spawn(async move { run_pump(pump_state).await });

        // The pump subscribes asynchronously; publish until a frame
        // lands.
        for _ in 0..100 {
            state.bus.publish_outbound(outbound(
                "agent:main:u42|R1",
                "from the bus",
                MessageState::Final,
            ));
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if !sink.frames().is_empty() {
                break;
            }
        }
        assert!(!sink.frames().is_empty());

        state.cancel.cancel();
        handle.await.unwrap();
    }
}
