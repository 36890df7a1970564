//! REST API server for the stock chat orchestrator
//!
//! Exposes sessions over HTTP: a JSON endpoint returning the final render
//! unit, and an SSE endpoint relaying the incremental UI events. Sessions
//! live in memory keyed by chat id; each one is guarded by a mutex so a
//! single `submit` is in flight per session.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::groq::ChatModel;
use crate::orchestrator::ChatSession;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub chat_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// Session Registry
/// =============================

/// Sessions untouched for this long are evicted on the next lookup.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct SessionEntry {
    session: Arc<Mutex<ChatSession>>,
    last_used: Instant,
}

/// In-memory session map. State is session-scoped and discarded with the
/// process; there is no durable storage layer. Idle sessions are swept on
/// lookup so the map stays bounded by recent traffic.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    model: Arc<dyn ChatModel>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::with_idle_timeout(model, SESSION_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(model: Arc<dyn ChatModel>, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            model,
            idle_timeout,
        }
    }

    pub async fn get_or_create(&self, chat_id: Uuid) -> Arc<Mutex<ChatSession>> {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.last_used.elapsed() < self.idle_timeout);

        let entry = sessions.entry(chat_id).or_insert_with(|| SessionEntry {
            session: Arc::new(Mutex::new(ChatSession::with_chat_id(
                chat_id,
                self.model.clone(),
            ))),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        entry.session.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager>,
}

/// =============================
/// Helpers — chat id resolution
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Map a client-supplied chat id to a session key: parse as UUID, hash
/// anything else stably, mint a fresh id when absent.
fn resolve_chat_id(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => Uuid::new_v4(),
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let chat_id = resolve_chat_id(req.chat_id.as_deref());
    info!(%chat_id, "Received chat request");

    let session = state.sessions.get_or_create(chat_id).await;

    // The JSON surface only reports the final unit; incremental events are
    // dropped with the receiver.
    let (ui_tx, _ui_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut session = session.lock().await;
    match session.submit(&req.message, &ui_tx).await {
        Ok(unit) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "chat_id": chat_id,
                "render": unit,
                "message_count": session.state().message_count(),
            }))),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Chat submission rejected: {}", e))),
        ),
    }
}

async fn chat_stream_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let chat_id = resolve_chat_id(req.chat_id.as_deref());
    info!(%chat_id, "Received streaming chat request");

    let (ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let sessions = state.sessions.clone();

    tokio::spawn(async move {
        let session = sessions.get_or_create(chat_id).await;
        let mut session = session.lock().await;
        if let Err(e) = session.submit(&req.message, &ui_tx).await {
            warn!(%chat_id, "Streaming chat submission rejected: {}", e);
        }
        // ui_tx drops here; the SSE stream ends after the final event.
    });

    let stream = UnboundedReceiverStream::new(ui_rx).map(|event| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// =============================
/// Router
/// =============================

pub fn create_router(sessions: Arc<SessionManager>) -> Router {
    let state = ApiState { sessions };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    sessions: Arc<SessionManager>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(sessions);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groq::{DeltaSink, ModelOutcome};
    use crate::models::TranscriptMessage;
    use crate::tools::ToolSpec;
    use async_trait::async_trait;

    struct NoopModel;

    #[async_trait]
    impl ChatModel for NoopModel {
        async fn complete(
            &self,
            _system: &str,
            _transcript: &[TranscriptMessage],
            _tools: &[ToolSpec],
            _deltas: DeltaSink,
        ) -> crate::Result<ModelOutcome> {
            Ok(ModelOutcome::Text(String::new()))
        }

        async fn caption(
            &self,
            _system: &str,
            _transcript: &[TranscriptMessage],
        ) -> crate::Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_sessions_are_reused_for_the_same_chat_id() {
        let manager = SessionManager::new(Arc::new(NoopModel));
        let chat_id = Uuid::new_v4();

        let first = manager.get_or_create(chat_id).await;
        let second = manager.get_or_create(chat_id).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted_on_lookup() {
        // A zero timeout makes every existing session idle.
        let manager = SessionManager::with_idle_timeout(Arc::new(NoopModel), Duration::ZERO);

        manager.get_or_create(Uuid::new_v4()).await;
        assert_eq!(manager.session_count().await, 1);

        manager.get_or_create(Uuid::new_v4()).await;
        assert_eq!(manager.session_count().await, 1);
    }

    #[test]
    fn test_resolve_chat_id_parses_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(resolve_chat_id(Some(&id.to_string())), id);
    }

    #[test]
    fn test_resolve_chat_id_is_stable_for_opaque_ids() {
        let a = resolve_chat_id(Some("frontend-session-42"));
        let b = resolve_chat_id(Some("frontend-session-42"));
        let c = resolve_chat_id(Some("frontend-session-43"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_resolve_chat_id_mints_fresh_when_absent() {
        let a = resolve_chat_id(None);
        let b = resolve_chat_id(None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_api_response_envelope() {
        let ok = ApiResponse::success(serde_json::json!({ "x": 1 }));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ApiResponse::error("boom".to_string());
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
