//! The gateway HTTP/WebSocket server.
//!
//! `GET /health` and `GET /ready` answer liveness probes, `GET /`
//! upgrades to the WebSocket protocol, and `/api` carries the JSON
//! surface. Each WebSocket connection runs one read loop; every write
//! to the socket goes through the connection's write mutex (see
//! [`subs`](super::subs)).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::frame::{codes, GatewayFrame};
use super::methods::dispatch;
use super::subs::{ConnSink, GatewayConn};
use super::GatewayState;
use crate::error::{Result, ServiceError};

/// Build the full router: health, WebSocket upgrade, HTTP API.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/", get(ws_upgrade))
        .nest("/api", super::http_api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `listener` until the root context cancels.
pub async fn serve(state: Arc<GatewayState>, listener: tokio::net::TcpListener) -> Result<()> {
    let cancel = state.cancel.clone();
    let router = build_router(state);
    info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ServiceError::Io(std::io::Error::other(e)))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn ready() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ready": true}))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// The write half of one WebSocket.
struct WsSink {
    tx: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl ConnSink for WsSink {
    async fn send_text(&self, text: String) -> Result<()> {
        let mut tx = self.tx.lock().await;
        tx.send(Message::Text(text.into()))
            .await
            .map_err(|e| ServiceError::ConnectionClosed(e.to_string()))
    }
}

async fn handle_socket(state: Arc<GatewayState>, socket: WebSocket) {
    let (tx, mut rx) = socket.split();
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let conn = Arc::new(GatewayConn::new(
        conn_id,
        Arc::new(WsSink {
            tx: tokio::sync::Mutex::new(tx),
        }),
    ));
    state.subs.add_conn(conn.clone());
    debug!(conn = conn_id, "websocket connected");

    while let Some(Ok(msg)) = rx.next().await {
        match msg {
            Message::Text(text) => {
                let response = match serde_json::from_str::<GatewayFrame>(&text) {
                    Ok(frame) if frame.frame_type == "req" => {
                        let id = frame.id.clone();
                        match dispatch(&state, conn_id, &frame).await {
                            Ok(payload) => GatewayFrame::response(id, payload),
                            Err(e) => GatewayFrame::error(id, e.code, e.message),
                        }
                    }
                    // Non-req frames are ignored.
                    Ok(_) => continue,
                    Err(e) => GatewayFrame::error(None, codes::BAD_REQUEST, e.to_string()),
                };
                match serde_json::to_string(&response) {
                    Ok(text) => {
                        if conn.send(text).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(conn = conn_id, error = %e, "failed to encode response"),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.subs.remove_conn(conn_id);
    state.authed.write().unwrap().remove(&conn_id);
    debug!(conn = conn_id, "websocket disconnected");
}
