//! Events surfaced to the presentation layer while a turn runs

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;
use wizsearch_common::RetrievalResult;

/// One presentation-layer event, in emission order
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Human-readable progress line
    Status { message: String },
    /// Retrieved context, shown alongside the answer
    SearchResults { results: RetrievalResult },
    /// Next piece of the answer
    Chunk { text: String },
    /// Suggested next queries
    Followups { queries: Vec<String> },
    /// The turn stopped; the session needs a new chat
    Aborted { message: String },
    /// Request-level error outside the pipeline
    Error { message: String },
    Done { trace_id: Uuid },
}

impl TurnEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::Status { .. } => "status",
            TurnEvent::SearchResults { .. } => "search_results",
            TurnEvent::Chunk { .. } => "chunk",
            TurnEvent::Followups { .. } => "followups",
            TurnEvent::Aborted { .. } => "aborted",
            TurnEvent::Error { .. } => "error",
            TurnEvent::Done { .. } => "done",
        }
    }
}

/// Sink for turn events. Events sent after the receiver is gone are dropped.
#[derive(Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl Progress {
    pub fn new(tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Progress that goes nowhere
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(TurnEvent::Status {
            message: message.into(),
        });
    }
}
