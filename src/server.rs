//! JSON HTTP API over chat sessions.
//!
//! # Endpoints
//!
//! | Method   | Path                        | Description |
//! |----------|-----------------------------|-------------|
//! | `GET`    | `/health`                   | Health check (returns version) |
//! | `GET`    | `/models`                   | Configured models, default flagged |
//! | `POST`   | `/sessions`                 | Create a session `{model?, mode?}` |
//! | `DELETE` | `/sessions/{id}`            | Drop a session |
//! | `POST`   | `/sessions/{id}/reset`      | Clear history and uploaded documents |
//! | `PUT`    | `/sessions/{id}/settings`   | Change `{model?, mode?}` |
//! | `POST`   | `/sessions/{id}/documents`  | Upload `{name, content_base64}` |
//! | `POST`   | `/sessions/{id}/messages`   | Run a turn `{text}` |
//! | `GET`    | `/sessions/{id}/history`    | Current bounded history |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no session with id ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_document` (422),
//! `not_found` (404), `session_busy` (409), `payload_too_large` (413).
//! Bodies are capped at `[server] max_body_bytes`.
//!
//! A session runs one turn at a time. A second request that needs the
//! session while a turn is in flight gets `409` instead of queueing.
//! Generation failures are not HTTP errors: the turn comes back with
//! `complete: false` and an `error` message.
//!
//! [`run_server`] also drops sessions left idle for
//! `[server] session_idle_secs`.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::ContextMode;
use crate::corpus::IngestReport;
use crate::error::SessionError;
use crate::models::Message;
use crate::session::{ChatTurn, Services, Session};

/// How often [`run_server`] looks for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    last_used: std::sync::Mutex<Instant>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionSlot>>>,
}

impl AppState {
    fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn insert(&self, session: Session) -> Uuid {
        let id = session.id();
        self.sessions
            .write()
            .await
            .insert(id, SessionSlot::new(session));
        id
    }

    async fn lookup(&self, id: &str) -> Result<Arc<Mutex<Session>>, AppError> {
        let parsed = Uuid::parse_str(id).map_err(|_| not_found(format!("no session with id {}", id)))?;
        let sessions = self.sessions.read().await;
        let slot = sessions
            .get(&parsed)
            .ok_or_else(|| not_found(format!("no session with id {}", id)))?;
        slot.touch();
        Ok(slot.session.clone())
    }

    /// Drop sessions idle for at least `max_idle`. A session in the middle
    /// of a turn is kept. Returns how many were dropped.
    async fn expire_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.idle_for() < max_idle || slot.session.try_lock().is_err());
        before - sessions.len()
    }
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// drive it without a socket.
pub fn router(services: Arc<Services>) -> Router {
    app(AppState::new(services))
}

fn app(state: AppState) -> Router {
    let body_limit = state.services.config.server.max_body_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/models", get(handle_models))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route("/sessions/{id}/reset", post(handle_reset))
        .route("/sessions/{id}/settings", put(handle_settings))
        .route("/sessions/{id}/documents", post(handle_upload))
        .route("/sessions/{id}/messages", post(handle_message))
        .route("/sessions/{id}/history", get(handle_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `[server].bind` until Ctrl-C.
pub async fn run_server(services: Arc<Services>) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let idle_secs = services.config.server.session_idle_secs;
    let state = AppState::new(services);
    if idle_secs > 0 {
        spawn_sweeper(state.clone(), Duration::from_secs(idle_secs));
    }
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("chat server listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

fn spawn_sweeper(state: AppState, max_idle: Duration) {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticks.tick().await;
            let expired = state.expire_idle(max_idle).await;
            if expired > 0 {
                tracing::info!(expired, "dropped idle sessions");
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownModel(_) => bad_request(err.to_string()),
            SessionError::Document(_) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "unsupported_document",
                message: err.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                code: "payload_too_large",
                message: rejection.body_text(),
            };
        }
        bad_request(rejection.body_text())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn busy() -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "session_busy",
        message: "a message is already being processed for this session".to_string(),
    }
}

// ============ GET /health, GET /models ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct ModelInfo {
    name: String,
    tag: String,
    default: bool,
}

#[derive(Serialize)]
struct ModelListResponse {
    models: Vec<ModelInfo>,
}

async fn handle_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    let catalog = &state.services.catalog;
    let models = catalog
        .entries()
        .iter()
        .map(|e| ModelInfo {
            name: e.name.clone(),
            tag: e.tag.clone(),
            default: e.name == catalog.default_name(),
        })
        .collect();
    Json(ModelListResponse { models })
}

// ============ Session lifecycle ============

#[derive(Serialize)]
struct SessionInfo {
    id: Uuid,
    model: String,
    mode: ContextMode,
    documents: Vec<String>,
    messages: usize,
}

impl SessionInfo {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id(),
            model: session.model().to_string(),
            mode: session.mode(),
            documents: session
                .corpus()
                .documents()
                .iter()
                .map(|d| d.source_id.clone())
                .collect(),
            messages: session.history().len(),
        }
    }
}

/// Body of `POST /sessions` and `PUT /sessions/{id}/settings`.
#[derive(Deserialize)]
struct SettingsRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    mode: Option<ContextMode>,
}

fn apply_settings(session: &mut Session, req: SettingsRequest) -> Result<(), AppError> {
    if let Some(model) = req.model {
        session.set_model(&model)?;
    }
    if let Some(mode) = req.mode {
        session.set_mode(mode);
    }
    Ok(())
}

async fn handle_create_session(
    State(state): State<AppState>,
    payload: Result<Json<SettingsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionInfo>), AppError> {
    let Json(req) = payload?;
    let mut session = Session::new(state.services.clone());
    apply_settings(&mut session, req)?;
    let info = SessionInfo::of(&session);
    state.insert(session).await;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let parsed = Uuid::parse_str(&id).map_err(|_| not_found(format!("no session with id {}", id)))?;
    // An in-flight turn keeps its own handle and finishes undisturbed.
    match state.sessions.write().await.remove(&parsed) {
        Some(_) => {
            tracing::info!(session = %id, "session closed");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(not_found(format!("no session with id {}", id))),
    }
}

async fn handle_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, AppError> {
    let session = state.lookup(&id).await?;
    let mut session = session.try_lock().map_err(|_| busy())?;
    session.reset().await;
    Ok(Json(SessionInfo::of(&session)))
}

async fn handle_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<SettingsRequest>, JsonRejection>,
) -> Result<Json<SessionInfo>, AppError> {
    let Json(req) = payload?;
    let session = state.lookup(&id).await?;
    let mut session = session.try_lock().map_err(|_| busy())?;
    apply_settings(&mut session, req)?;
    Ok(Json(SessionInfo::of(&session)))
}

// ============ POST /sessions/{id}/documents ============

#[derive(Deserialize)]
struct UploadRequest {
    name: String,
    content_base64: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let Json(req) = payload?;
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;

    let session = state.lookup(&id).await?;
    let mut session = session.try_lock().map_err(|_| busy())?;
    let report = session.upload(&req.name, &bytes).await?;
    Ok(Json(report))
}

// ============ POST /sessions/{id}/messages ============

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

async fn handle_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<ChatTurn>, AppError> {
    let Json(req) = payload?;
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let session = state.lookup(&id).await?;
    let mut session = session.try_lock().map_err(|_| busy())?;
    let turn = session.submit(&req.text, |_| {}).await;
    Ok(Json(turn))
}

// ============ GET /sessions/{id}/history ============

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<Message>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = state.lookup(&id).await?;
    let session = session.try_lock().map_err(|_| busy())?;
    Ok(Json(HistoryResponse {
        messages: session.history().iter().cloned().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::DisabledEmbedder;
    use crate::error::GenerationError;
    use crate::generation::{Generator, TextStream};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct SilentGenerator;

    #[async_trait]
    impl Generator for SilentGenerator {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<TextStream, GenerationError> {
            Ok(futures::stream::empty().boxed())
        }
    }

    fn state() -> AppState {
        let mut config = Config::default();
        config.embedding.provider = "disabled".to_string();
        let services =
            Services::new(config, Arc::new(DisabledEmbedder), Arc::new(SilentGenerator)).unwrap();
        AppState::new(Arc::new(services))
    }

    #[tokio::test]
    async fn test_idle_sessions_expire_unless_busy() {
        let state = state();
        let idle = state.insert(Session::new(state.services.clone())).await;
        let busy = state.insert(Session::new(state.services.clone())).await;

        let handle = state.lookup(&busy.to_string()).await.unwrap();
        let guard = handle.lock().await;
        assert_eq!(state.expire_idle(Duration::ZERO).await, 1);
        drop(guard);

        assert!(state.lookup(&idle.to_string()).await.is_err());
        assert!(state.lookup(&busy.to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_recent_sessions_survive_sweep() {
        let state = state();
        let id = state.insert(Session::new(state.services.clone())).await;
        assert_eq!(state.expire_idle(Duration::from_secs(3600)).await, 0);
        assert!(state.lookup(&id.to_string()).await.is_ok());
    }
}
