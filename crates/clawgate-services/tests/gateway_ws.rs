//! End-to-end gateway tests over a real WebSocket.
//!
//! Spins up the full stack -- agent loop, outbound pump, axum server on
//! an ephemeral port -- with a scripted echo provider, then drives the
//! frame protocol from a tokio-tungstenite client.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use clawgate_core::agent::{Agent, AgentLoop, AgentSettings, ProviderSet};
use clawgate_core::{
    AgentRegistry, HookRegistry, MessageBus, RateLimiter, SessionStore, ToolRegistry,
};
use clawgate_llm::{
    ChatRequest, ChatResponse, CooldownTracker, FallbackChain, ModelRef, Provider, ProviderError,
};
use clawgate_services::gateway::{run_pump, serve, GatewayState};
use clawgate_types::config::GatewayConfig;

struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let last = req
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse::text(format!("echo: {last}")))
    }
}

struct TestGateway {
    addr: std::net::SocketAddr,
    cancel: CancellationToken,
}

impl TestGateway {
    async fn start(config: GatewayConfig) -> Self {
        let mut providers = ProviderSet::new();
        providers.insert("echo", Arc::new(EchoProvider));
        let agent = Arc::new(Agent::new(
            "main",
            "/tmp/ws",
            vec![ModelRef {
                provider: "echo".into(),
                model: "m".into(),
            }],
            Arc::new(SessionStore::new("main")),
            Arc::new(ToolRegistry::new()),
            Arc::new(providers),
            FallbackChain::new(Arc::new(CooldownTracker::new())),
            AgentSettings::default(),
        ));
        let registry = Arc::new(AgentRegistry::new(vec![agent]).unwrap());
        let bus = Arc::new(MessageBus::new());
        let hooks = Arc::new(HookRegistry::new());
        let limits = Arc::new(RateLimiter::unlimited());
        let cancel = CancellationToken::new();

        let state = GatewayState::new(
            registry.clone(),
            bus.clone(),
            hooks.clone(),
            limits.clone(),
            vec![],
            config,
            cancel.clone(),
        );

        let agent_loop = AgentLoop::new(
            registry,
            bus.clone(),
            hooks,
            limits,
            vec![],
            cancel.clone(),
        );
        tokio::spawn(async move { agent_loop.run().await });

        let pump_state = state.clone();
        tokio::spawn(async move { run_pump(pump_state).await });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = serve(state, listener).await;
        });

        Self { addr, cancel }
    }

    async fn connect_ws(
        &self,
    ) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    > {
        let url = format!("ws://{}/", self.addr);
        // The server task may not be accepting yet on the first try.
        for _ in 0..50 {
            if let Ok((ws, _)) = tokio_tungstenite::connect_async(&url).await {
                return ws;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("could not connect to {url}");
    }
}

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv_json(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn handshake_subscribe_send_and_event() {
    let gateway = TestGateway::start(GatewayConfig {
        auth_token: "T".into(),
        ..GatewayConfig::default()
    })
    .await;
    let mut ws = gateway.connect_ws().await;

    // Handshake.
    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "1", "method": "connect",
            "params": {"auth": {"token": "T"}}
        }),
    )
    .await;
    let res = recv_json(&mut ws).await;
    assert_eq!(res["type"], "res");
    assert_eq!(res["id"], "1");
    assert_eq!(res["ok"], true);
    assert_eq!(res["payload"]["protocol"], 3);
    assert_eq!(res["payload"]["server"], "clawgate");

    // Subscribe, then send.
    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "2", "method": "chat.subscribe",
            "params": {"sessionKey": "u42"}
        }),
    )
    .await;
    let res = recv_json(&mut ws).await;
    assert_eq!(res["ok"], true);

    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "3", "method": "chat.send",
            "params": {"sessionKey": "u42", "message": "hello", "idempotencyKey": "R1"}
        }),
    )
    .await;

    // The send response and the chat event both arrive; order between
    // them is not fixed.
    let mut saw_response = false;
    let mut event = None;
    for _ in 0..4 {
        let frame = recv_json(&mut ws).await;
        match frame["type"].as_str() {
            Some("res") => {
                assert_eq!(frame["id"], "3");
                assert_eq!(frame["payload"]["runId"], "R1");
                assert_eq!(frame["payload"]["sessionKey"], "u42");
                saw_response = true;
            }
            Some("event") => {
                event = Some(frame);
            }
            other => panic!("unexpected frame type: {other:?}"),
        }
        if saw_response && event.is_some() {
            break;
        }
    }
    let event = event.expect("no chat event received");
    assert_eq!(event["event"], "chat");
    assert_eq!(event["seq"], 1);
    assert_eq!(event["payload"]["runId"], "R1");
    assert_eq!(event["payload"]["sessionKey"], "u42");
    assert_eq!(event["payload"]["state"], "final");
    assert_eq!(
        event["payload"]["message"]["content"][0]["text"],
        "echo: hello"
    );

    // Deleting the main session is refused.
    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "4", "method": "sessions.delete",
            "params": {"key": "main"}
        }),
    )
    .await;
    let res = recv_json(&mut ws).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "INVALID_REQUEST");
    assert!(res["error"]["message"]
        .as_str()
        .unwrap()
        .contains("main session"));

    gateway.cancel.cancel();
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let gateway = TestGateway::start(GatewayConfig {
        auth_token: "T".into(),
        ..GatewayConfig::default()
    })
    .await;
    let mut ws = gateway.connect_ws().await;

    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "1", "method": "connect",
            "params": {"auth": {"token": "nope"}}
        }),
    )
    .await;
    let res = recv_json(&mut ws).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "UNAUTHORIZED");

    // And without connect, methods stay locked.
    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "2", "method": "sessions.list", "params": {}
        }),
    )
    .await;
    let res = recv_json(&mut ws).await;
    assert_eq!(res["error"]["code"], "UNAUTHORIZED");

    gateway.cancel.cancel();
}

#[tokio::test]
async fn malformed_frame_gets_bad_request() {
    let gateway = TestGateway::start(GatewayConfig::default()).await;
    let mut ws = gateway.connect_ws().await;

    ws.send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let res = recv_json(&mut ws).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "BAD_REQUEST");

    gateway.cancel.cancel();
}

#[tokio::test]
async fn non_req_frames_are_ignored() {
    let gateway = TestGateway::start(GatewayConfig {
        auth_token: "T".into(),
        ..GatewayConfig::default()
    })
    .await;
    let mut ws = gateway.connect_ws().await;

    // An event frame from a client draws no response; the following
    // request is answered normally.
    send_json(
        &mut ws,
        serde_json::json!({"type": "event", "event": "chat", "seq": 1}),
    )
    .await;
    send_json(
        &mut ws,
        serde_json::json!({
            "type": "req", "id": "1", "method": "connect",
            "params": {"auth": {"token": "T"}}
        }),
    )
    .await;
    let res = recv_json(&mut ws).await;
    assert_eq!(res["id"], "1");
    assert_eq!(res["ok"], true);

    gateway.cancel.cancel();
}
