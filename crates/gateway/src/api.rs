//! HTTP API under `/api`.
//!
//! Endpoints:
//!
//! - `POST   /api/query`          — Ask a question, get an SSE stream
//! - `GET    /api/health`         — Liveness probe
//! - `GET    /api/models`         — Selectable models
//! - `GET    /api/sessions`       — Known session ids
//! - `GET    /api/sessions/{id}`  — Session history snapshot
//! - `DELETE /api/sessions/{id}`  — Discard a session
//! - `GET    /api/logs`           — SSE stream of domain events

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::info;

use chatbi_agent::ChatRequest;
use chatbi_core::event::DomainEvent;
use chatbi_memory::SessionSnapshot;

use crate::SharedState;

/// Session used when a query names none.
pub const DEFAULT_SESSION_ID: &str = "default";

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .route("/models", get(models_handler))
        .route("/sessions", get(list_sessions_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(reset_session_handler),
        )
        .route("/logs", get(log_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    /// Falls back to the configured default model.
    #[serde(default)]
    model: Option<String>,
}

impl QueryRequest {
    fn into_chat_request(self, default_model: &str) -> ChatRequest {
        ChatRequest {
            session_id: non_empty(self.session_id)
                .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string()),
            request_id: non_empty(self.request_id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            model: non_empty(self.model).unwrap_or_else(|| default_model.to_string()),
            query: self.query,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    service: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelDto {
    model_name: String,
    model_code: String,
    schema_list: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct SessionListResponse {
    sessions: Vec<String>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct ResetResponse {
    reset: bool,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /api/query` — run one request, streaming its events as SSE.
async fn query_handler(
    State(state): State<SharedState>,
    Json(payload): Json<QueryRequest>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let request = payload.into_chat_request(&state.config.default_model);
    info!(
        request_id = %request.request_id,
        session_id = %request.session_id,
        query_len = request.query.len(),
        "Query received"
    );

    let rx = state.coordinator.stream(request);
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Sse::new(stream)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        service: "ChatBI API".into(),
    })
}

async fn models_handler(State(state): State<SharedState>) -> Json<Vec<ModelDto>> {
    Json(
        state
            .config
            .models
            .iter()
            .map(|m| ModelDto {
                model_name: m.clone(),
                model_code: m.clone(),
                schema_list: Vec::new(),
            })
            .collect(),
    )
}

async fn list_sessions_handler(State(state): State<SharedState>) -> Json<SessionListResponse> {
    let sessions = state.memory.session_ids().await;
    let count = sessions.len();
    Json(SessionListResponse { sessions, count })
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    state.memory.snapshot(&id).await.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Unknown session: {id}"),
            }),
        )
    })
}

async fn reset_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<ResetResponse> {
    let existed = state.memory.reset(&id).await;
    state.event_bus.publish(DomainEvent::SessionReset {
        session_id: id,
        existed,
        timestamp: chrono::Utc::now(),
    });
    Json(ResetResponse { reset: existed })
}

// ── SSE Log Stream ────────────────────────────────────────────────────────

/// `GET /api/logs` — SSE stream of domain events.
async fn log_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_name()).data(data))
        });

    Sse::new(stream)
}

// ── Tests ─────────────────────────────────────────────────────────────────
