//! The HTTP/JSON surface: `POST /api/chat`, `GET /api/sessions`,
//! `GET /api/health`, `GET /api/openapi.yaml`.
//!
//! Auth is a bearer key matched against the configured API key;
//! `/api/health` and `/api/openapi.yaml` are public. An empty key
//! means open mode -- everything is public.
//!
//! The chat endpoint is synchronous: it drives the agent's direct
//! processing path and returns the final text. It does not publish
//! outbound events, so WebSocket subscribers of the same session see
//! nothing for HTTP turns.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, error};

use clawgate_core::routing::{display_key, resolve_session_key};

use super::GatewayState;

/// Build the `/api` routes.
pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/chat", axum::routing::post(chat))
        .route("/sessions", get(sessions))
        .route("/health", get(health))
        .route("/openapi.yaml", get(openapi))
}

fn authorized(state: &GatewayState, headers: &HeaderMap) -> bool {
    if state.config.api_key.is_empty() {
        return true;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", state.config.api_key))
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
}

#[derive(Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn chat(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Ok(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid request body"})),
        );
    };
    if body.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "message is required"})),
        );
    }

    let display = body
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("api:{}", uuid::Uuid::new_v4()));
    let (internal, agent_id) = resolve_session_key(&display, &state.bindings);
    let Some(agent) = state.registry.get_agent(&agent_id) else {
        error!(agent = %agent_id, "chat request routed to unknown agent");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "routing failed"})),
        );
    };

    if !state.limits.allow_message(&display) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "rate limit exceeded"})),
        );
    }

    debug!(session = %internal, "http chat request");
    match agent
        .process_direct(
            &state.cancel,
            &state.hooks,
            &state.limits,
            &internal,
            &body.message,
        )
        .await
    {
        Ok(response) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "session_id": display_key(&internal),
                "response": response,
            })),
        ),
        Err(e) => {
            error!(session = %internal, error = %e, "http chat turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn sessions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let agent = state.registry.get_default_agent();
    let sessions: Vec<serde_json::Value> = agent
        .sessions()
        .list()
        .into_iter()
        .map(|meta| {
            serde_json::json!({
                "key": display_key(&meta.key),
                "label": meta.label,
                "updated_at": meta.updated_at.to_rfc3339(),
                "message_count": meta.message_count,
            })
        })
        .collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({"sessions": sessions})),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

const OPENAPI_YAML: &str = r#"openapi: 3.0.3
info:
  title: clawgate API
  version: "0.3"
paths:
  /api/chat:
    post:
      summary: Send a chat message and wait for the reply
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [message]
              properties:
                message: { type: string }
                session_id: { type: string }
      responses:
        "200":
          description: The assistant reply
          content:
            application/json:
              schema:
                type: object
                properties:
                  session_id: { type: string }
                  response: { type: string }
        "401": { description: Missing or invalid bearer key }
  /api/sessions:
    get:
      summary: List sessions of the default agent
      responses:
        "200": { description: Session list }
  /api/health:
    get:
      summary: Liveness probe
      responses:
        "200": { description: OK }
"#;

async fn openapi() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/yaml")], OPENAPI_YAML)
}
