//! Session management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use wizsearch_common::errors::{AppError, Result};
use wizsearch_context::{Session, Turn};

/// Session state response
#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub history: Vec<Turn>,
    /// New queries are refused until the chat is reset
    pub aborted: bool,
    pub followups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trace_id: Option<Uuid>,
    pub created_at: String,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            history: session.history().to_vec(),
            aborted: session.is_aborted(),
            followups: session.followups().to_vec(),
            last_trace_id: session.last_trace_id(),
            created_at: session.created_at.to_rfc3339(),
        }
    }
}

/// Feedback on the last answer
#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    /// 1 for thumbs up, 0 for thumbs down
    #[validate(range(min = 0.0, max = 1.0))]
    pub score: f64,

    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub trace_id: Uuid,
}

/// Create a new session
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    let session = state.sessions.create(&state.config.pipeline.greeting).await;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))))
}

/// Get session state
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let session = state.sessions.get(session_id).await?;
    let session = session.lock().await;
    Ok(Json(SessionResponse::from(&*session)))
}

/// Start a new chat: history back to the greeting, abort flag cleared
pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let mut session = state.sessions.acquire(session_id).await?;
    session.reset();

    tracing::info!(session_id = %session_id, "Session reset");
    Ok(Json(SessionResponse::from(&*session)))
}

/// Record user feedback on the last turn's trace
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let session = state.sessions.acquire(session_id).await?;
    let trace_id = state
        .runner
        .feedback(&session, request.score, request.comment)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(FeedbackResponse { trace_id })))
}
