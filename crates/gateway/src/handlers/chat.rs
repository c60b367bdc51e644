//! Chat turn handler
//!
//! A turn is streamed as server-sent events while it runs: progress lines,
//! search results, answer chunks, follow-up suggestions, then `done`.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use wizsearch_common::errors::{AppError, Result};
use wizsearch_context::{Progress, TurnEvent};

/// Turn request
#[derive(Debug, Deserialize, Validate)]
pub struct TurnRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,
}

/// Run one turn and stream its events
pub async fn create_turn(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    let mut session = state.sessions.acquire(session_id).await?;
    // Refuse before the stream opens so the client sees a plain 409
    if session.is_aborted() {
        return Err(AppError::SessionAborted {
            id: session_id.to_string(),
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let runner = state.runner.clone();

    tokio::spawn(async move {
        let progress = Progress::new(tx);
        if let Err(e) = runner.run(&mut session, &request.query, &progress).await {
            tracing::warn!(session_id = %session_id, error = %e, "Turn rejected");
            progress.emit(TurnEvent::Error {
                message: e.to_string(),
            });
        }
    });

    let stream = UnboundedReceiverStream::new(rx)
        .map(|event: TurnEvent| Event::default().event(event.name()).json_data(&event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
