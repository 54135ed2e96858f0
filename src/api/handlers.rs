//! HTTP request handlers

use super::assets::{index_template, serve_static};
use super::cookie::{CurrentSession, SessionCookie};
use super::page::render_page;
use super::sse::sse_stream;
use super::types::{ChatRequest, ErrorResponse, SatisfactionRequest, SuccessResponse};
use super::AppState;
use crate::conversation::Message;
use crate::spans::{Carrier, PendingSpanError, TraceContext};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Response header carrying the id of the span recorded for a stream
pub const SPAN_ID_HEADER: &str = "x-span-id";
const TRACEPARENT_HEADER: &str = "traceparent";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/assets/*path", get(serve_static))
        .route("/chat", post(chat))
        .route("/stream", get(stream))
        .route("/satisfaction", post(satisfaction))
        .route("/reset", post(reset))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Page
// ============================================================

async fn index(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<(SessionCookie, Html<String>), AppError> {
    let template = index_template()
        .ok_or_else(|| AppError::Internal("Page template missing".to_string()))?;

    let html = {
        let session = current.session.lock().await;
        render_page(
            &template,
            session.conversation.messages(),
            &state.config.models,
            &session.model.model_name,
        )
    };

    Ok((current.cookie, Html(html)))
}

// ============================================================
// Chat
// ============================================================

async fn chat(
    current: CurrentSession,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<(SessionCookie, Json<SuccessResponse>), AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let model = req.model.trim();
    if model.is_empty() {
        return Err(AppError::BadRequest("model must not be empty".to_string()));
    }
    if let Some(t) = req.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(AppError::BadRequest(
                "temperature must be between 0 and 2".to_string(),
            ));
        }
    }
    if let Some(p) = req.top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err(AppError::BadRequest(
                "top_p must be between 0 and 1".to_string(),
            ));
        }
    }

    {
        let mut session = current.session.lock().await;
        session.model.model_name = model.to_string();
        if let Some(t) = req.temperature {
            session.model.temperature = t;
        }
        if let Some(p) = req.top_p {
            session.model.top_p = p;
        }
        session.conversation.append(Message::user(req.message));
    }

    tracing::debug!(session_id = %current.session.id(), model = %model, "Message queued");
    Ok((current.cookie, Json(SuccessResponse::ok())))
}

// ============================================================
// Streaming
// ============================================================

async fn stream(
    State(state): State<AppState>,
    current: CurrentSession,
    headers: HeaderMap,
) -> impl IntoResponse {
    let parent = incoming_trace_context(&state, &headers);
    let turn = state.relay.start(current.session, parent).await;

    let task = turn.task;
    tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Relay task aborted");
        }
    });

    (
        current.cookie,
        [(SPAN_ID_HEADER, turn.span_id.to_string())],
        sse_stream(turn.frames),
    )
}

/// Continue the caller's trace when it sent a valid `traceparent`
fn incoming_trace_context(state: &AppState, headers: &HeaderMap) -> Option<TraceContext> {
    let raw = headers.get(TRACEPARENT_HEADER)?.to_str().ok()?;
    match state.recorder.resume(&Carrier::from(raw.to_string())) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring invalid traceparent");
            None
        }
    }
}

// ============================================================
// Satisfaction
// ============================================================

async fn satisfaction(
    State(state): State<AppState>,
    current: CurrentSession,
    payload: Result<Json<SatisfactionRequest>, JsonRejection>,
) -> Result<(SessionCookie, Json<SuccessResponse>), AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if !req.score.is_finite() {
        return Err(AppError::BadRequest("score must be a finite number".to_string()));
    }

    let pending = state
        .recorder
        .take_pending(current.session.id(), req.span_id)
        .map_err(|e| match e {
            PendingSpanError::NotFound => AppError::NotFound(e.to_string()),
            PendingSpanError::Ambiguous(_) => AppError::BadRequest(e.to_string()),
        })?;

    let mut span = pending.span;
    match state.recorder.resume(&pending.carrier) {
        Ok(ctx) => {
            tracing::info_span!(
                "record_satisfaction",
                trace_id = %ctx.trace_id,
                parent_span_id = %ctx.span_id,
            )
            .in_scope(|| tracing::info!(score = req.score, "Satisfaction recorded"));
        }
        Err(e) => {
            tracing::warn!(error = %e, carrier = %pending.carrier, "Stored carrier did not resume");
        }
    }

    span.set_attribute("satisfaction_score", req.score);
    state.recorder.end(span);

    Ok((current.cookie, Json(SuccessResponse::ok())))
}

// ============================================================
// Reset
// ============================================================

async fn reset(current: CurrentSession) -> (SessionCookie, Json<SuccessResponse>) {
    current.session.lock().await.conversation.reset();
    tracing::debug!(session_id = %current.session.id(), "Conversation reset");
    (current.cookie, Json(SuccessResponse::ok()))
}

async fn get_version() -> &'static str {
    concat!("shelli-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
