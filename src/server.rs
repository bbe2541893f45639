//! HTTP chat host.
//!
//! Exposes the session lifecycle as a JSON API so a browser chat UI can
//! drive it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/sessions` | Start a session: greeting, upload policy, tag options |
//! | `POST` | `/sessions/{id}/files` | Upload a file batch (base64 content) |
//! | `POST` | `/sessions/{id}/settings` | Submit departments; indexes the files |
//! | `POST` | `/sessions/{id}/messages` | Ask a question (`stream: true` for SSE) |
//! | `DELETE` | `/sessions/{id}` | End the session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_active_chain", "message": "No active retrieval chain. ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upload_timeout` (408),
//! `no_active_chain` (409), `payload_too_large` (413),
//! `unsupported_file_type` (415), `internal` (500).
//!
//! # Streaming
//!
//! With `stream: true` the answer is sent as server-sent events: `token`
//! events carrying `{"text": ...}` as the answer is generated, then one
//! `answer` event with the final answer and its citations. A failure after
//! the stream has started is reported as an `error` event with the error
//! body above.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use docqa_core::models::{SourcedAnswer, UploadedFile};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::QaError;
use crate::flow::{self, SettingsOutcome, UploadPolicy, UploadReceipt, Welcome};
use crate::query::{self, AnswerEvent};
use crate::services::Services;
use crate::session::SessionStore;

/// Slack on top of the base64-encoded upload limit for the JSON envelope.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
    sessions: Arc<SessionStore>,
}

/// Build the router. Used by [`run_server`] and by tests.
pub fn router(services: Arc<Services>) -> Router {
    let upload = &services.config.upload;
    let body_limit = upload.max_size_bytes() * upload.max_files * 4 / 3 + BODY_LIMIT_SLACK;
    let sessions = Arc::new(SessionStore::new(upload.timeout()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_start))
        .route("/sessions/{id}", delete(handle_end))
        .route("/sessions/{id}/files", post(handle_upload))
        .route("/sessions/{id}/settings", post(handle_settings))
        .route("/sessions/{id}/messages", post(handle_message))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { services, sessions })
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(services: Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "docqa server listening");
    axum::serve(listener, app).await?;

    Ok(())
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

struct AppError(QaError);

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        Self(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            QaError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            QaError::NoActiveChain => StatusCode::CONFLICT,
            QaError::MetadataNotSet | QaError::NoFilesUploaded | QaError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            QaError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            QaError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            QaError::UploadTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            QaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_body(err: &QaError) -> ErrorBody {
    if let QaError::Internal(inner) = err {
        tracing::error!(error = ?inner, "request failed");
    }
    ErrorBody {
        error: ErrorDetail {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(error_body(&self.0))).into_response()
    }
}

// ============ GET /health ============

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

// ============ POST /sessions ============

#[derive(Serialize)]
struct StartResponse {
    session_id: String,
    started_at: DateTime<Utc>,
    #[serde(flatten)]
    welcome: Welcome,
}

async fn handle_start(State(state): State<AppState>) -> Json<StartResponse> {
    let (session_id, handle) = state.sessions.start().await;
    let started_at = handle.lock().await.started_at();
    Json(StartResponse {
        session_id,
        started_at,
        welcome: flow::welcome(&state.services.config),
    })
}

// ============ DELETE /sessions/{id} ============

async fn handle_end(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.sessions.end(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /sessions/{id}/files ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadFile>,
}

#[derive(Deserialize)]
struct UploadFile {
    name: String,
    mime_type: String,
    /// Standard base64 of the raw file bytes.
    content: String,
}

impl UploadFile {
    fn decode(self) -> Result<UploadedFile, QaError> {
        let content = base64::engine::general_purpose::STANDARD
            .decode(self.content.as_bytes())
            .map_err(|e| {
                QaError::InvalidRequest(format!("file '{}' is not valid base64: {}", self.name, e))
            })?;
        Ok(UploadedFile::new(self.name, self.mime_type, content))
    }
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadReceipt>, AppError> {
    let handle = state.sessions.get(&id).await?;
    let files = request
        .files
        .into_iter()
        .map(UploadFile::decode)
        .collect::<Result<Vec<_>, _>>()?;

    let policy = UploadPolicy::from(&state.services.config.upload);
    let mut session = handle.lock().await;
    let receipt = flow::receive_upload(&policy, &mut session, files)?;
    Ok(Json(receipt))
}

// ============ POST /sessions/{id}/settings ============

#[derive(Deserialize)]
struct SettingsRequest {
    #[serde(default)]
    departments: Vec<String>,
}

async fn handle_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SettingsRequest>,
) -> Result<Json<SettingsOutcome>, AppError> {
    let handle = state.sessions.get(&id).await?;
    let mut session = handle.lock().await;
    let outcome = flow::apply_settings(&state.services, &mut session, request.departments.as_slice()).await?;
    Ok(Json(outcome))
}

// ============ POST /sessions/{id}/messages ============

#[derive(Deserialize)]
struct MessageRequest {
    question: String,
    #[serde(default)]
    stream: bool,
}

#[derive(Serialize)]
struct TokenPayload<'a> {
    text: &'a str,
}

async fn handle_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Response, AppError> {
    let handle = state.sessions.get(&id).await?;

    if !request.stream {
        let session = handle.lock().await;
        let answer: SourcedAnswer = query::answer(&session, &request.question).await?;
        return Ok(Json(answer).into_response());
    }

    let answers = {
        let session = handle.lock().await;
        query::answer_streaming(&session, &request.question)?
    };

    let events = answers.map(|event| {
        let event = match event {
            Ok(AnswerEvent::Token(text)) => Event::default()
                .event("token")
                .json_data(TokenPayload { text: &text }),
            Ok(AnswerEvent::Done(answer)) => Event::default().event("answer").json_data(&answer),
            Err(err) => Event::default().event("error").json_data(error_body(&err)),
        };
        Ok::<_, Infallible>(event.unwrap_or_else(|_| Event::default().event("error")))
    });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
