//! Per-turn trace recording
//!
//! One trace is opened per user turn. Every pipeline stage opens a span (or a
//! generation, for language model calls) on it and closes it with exactly one
//! output or error. Finished traces are handed to a [`TraceExporter`].

mod exporter;

pub use exporter::{LangfuseExporter, LogExporter, MemoryExporter, NoopExporter, TraceExporter};

use crate::config::TraceConfig;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Severity attached to a trace update or a closed span
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl TraceLevel {
    /// Level name as understood by Langfuse
    pub fn as_langfuse(&self) -> &'static str {
        match self {
            TraceLevel::Info => "DEFAULT",
            TraceLevel::Warning => "WARNING",
            TraceLevel::Error => "ERROR",
        }
    }
}

/// Kind of observation recorded on a trace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// A plain pipeline stage (retrieval, ...)
    Span,
    /// A language model call
    Generation,
}

/// A single stage recorded on a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: Uuid,
    pub name: String,
    pub kind: ObservationKind,
    pub model: Option<String>,
    pub metadata: Value,
    pub input: Value,
    pub output: Option<Value>,
    pub level: TraceLevel,
    pub status_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SpanRecord {
    /// Whether the span has been closed
    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// A complete trace for one user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub name: String,
    pub session_id: Option<String>,
    pub input: Value,
    pub output: Option<Value>,
    pub level: TraceLevel,
    pub spans: Vec<SpanRecord>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TraceRecord {
    /// Spans with the given name, in the order they were opened
    pub fn spans_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SpanRecord> + 'a {
        self.spans.iter().filter(move |s| s.name == name)
    }

    /// Number of spans that have not been closed yet
    pub fn open_span_count(&self) -> usize {
        self.spans.iter().filter(|s| !s.is_closed()).count()
    }
}

/// User feedback attached to a finished trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceScore {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub name: String,
    pub value: f64,
    pub comment: Option<String>,
}

/// Serialize anything into a JSON value for trace input/output
pub fn to_trace_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| Value::String(format!("<unserializable: {}>", e)))
}

fn lock(inner: &Mutex<TraceRecord>) -> MutexGuard<'_, TraceRecord> {
    // A panic while holding the lock leaves the record readable
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to the trace of one turn.
///
/// Cloning is cheap; the follow-up task holds a clone while the main stage
/// keeps writing.
#[derive(Clone)]
pub struct TraceHandle {
    inner: Arc<Mutex<TraceRecord>>,
}

impl TraceHandle {
    fn new(name: &str, input: Value) -> Self {
        let record = TraceRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            session_id: None,
            input,
            output: None,
            level: TraceLevel::Info,
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        };
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    /// Trace identifier
    pub fn id(&self) -> Uuid {
        lock(&self.inner).id
    }

    /// Attach the conversation this turn belongs to
    pub fn set_session(&self, session_id: impl Into<String>) {
        lock(&self.inner).session_id = Some(session_id.into());
    }

    /// Open a stage span
    pub fn span<T: Serialize + ?Sized>(&self, name: &str, metadata: Value, input: &T) -> SpanHandle {
        self.open(name, ObservationKind::Span, None, metadata, to_trace_value(input))
    }

    /// Open a language model generation
    pub fn generation<T: Serialize + ?Sized>(&self, name: &str, model: &str, input: &T) -> SpanHandle {
        self.open(
            name,
            ObservationKind::Generation,
            Some(model.to_string()),
            Value::Null,
            to_trace_value(input),
        )
    }

    /// Set the trace-level output and severity
    pub fn update<T: Serialize + ?Sized>(&self, output: &T, level: TraceLevel) {
        let mut record = lock(&self.inner);
        record.output = Some(to_trace_value(output));
        // Never downgrade a warning or error back to info
        if level_rank(level) >= level_rank(record.level) {
            record.level = level;
        }
    }

    /// Copy of the current trace state
    pub fn snapshot(&self) -> TraceRecord {
        lock(&self.inner).clone()
    }

    fn open(
        &self,
        name: &str,
        kind: ObservationKind,
        model: Option<String>,
        metadata: Value,
        input: Value,
    ) -> SpanHandle {
        let id = Uuid::now_v7();
        lock(&self.inner).spans.push(SpanRecord {
            id,
            name: name.to_string(),
            kind,
            model,
            metadata,
            input,
            output: None,
            level: TraceLevel::Info,
            status_message: None,
            started_at: Utc::now(),
            ended_at: None,
        });
        debug!(span = name, span_id = %id, "Span opened");
        SpanHandle {
            trace: self.clone(),
            id,
            closed: false,
        }
    }

    fn close(&self, span_id: Uuid, output: Value, level: TraceLevel, status: Option<String>) {
        let mut record = lock(&self.inner);
        if let Some(span) = record.spans.iter_mut().find(|s| s.id == span_id) {
            if span.is_closed() {
                return;
            }
            span.output = Some(output);
            span.level = level;
            span.status_message = status;
            span.ended_at = Some(Utc::now());
        }
    }

    /// Close every span still open with an error marker; returns how many were closed
    fn close_dangling(&self, reason: &str) -> usize {
        let mut record = lock(&self.inner);
        let now = Utc::now();
        let mut closed = 0;
        for span in record.spans.iter_mut().filter(|s| !s.is_closed()) {
            span.output = Some(Value::Null);
            span.level = TraceLevel::Error;
            span.status_message = Some(reason.to_string());
            span.ended_at = Some(now);
            closed += 1;
        }
        record.ended_at = Some(now);
        closed
    }
}

fn level_rank(level: TraceLevel) -> u8 {
    match level {
        TraceLevel::Info => 0,
        TraceLevel::Warning => 1,
        TraceLevel::Error => 2,
    }
}

/// An open span. Closing consumes the handle, so a span ends at most once.
///
/// A handle dropped without being ended (e.g. its task was aborted) closes the
/// span with an error marker.
pub struct SpanHandle {
    trace: TraceHandle,
    id: Uuid,
    closed: bool,
}

impl SpanHandle {
    /// Close the span successfully
    pub fn end<T: Serialize + ?Sized>(mut self, output: &T) {
        self.closed = true;
        self.trace.close(self.id, to_trace_value(output), TraceLevel::Info, None);
    }

    /// Close the span with an error
    pub fn fail(mut self, error: &str) {
        self.closed = true;
        self.trace.close(
            self.id,
            Value::String(error.to_string()),
            TraceLevel::Error,
            Some(error.to_string()),
        );
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!(span_id = %self.id, "Span dropped before completion");
            self.trace.close(
                self.id,
                Value::Null,
                TraceLevel::Error,
                Some("span dropped before completion".to_string()),
            );
        }
    }
}

/// Opens traces and hands finished ones to the exporter
pub struct TraceRecorder {
    exporter: Arc<dyn TraceExporter>,
}

impl TraceRecorder {
    /// Create a recorder exporting through the given exporter
    pub fn new(exporter: Arc<dyn TraceExporter>) -> Self {
        Self { exporter }
    }

    /// Build the recorder described by configuration
    pub fn from_config(config: &TraceConfig) -> Result<Self> {
        let exporter: Arc<dyn TraceExporter> = match config.exporter.as_str() {
            "langfuse" => Arc::new(LangfuseExporter::from_config(config)?),
            "none" => Arc::new(NoopExporter),
            "log" => Arc::new(LogExporter),
            other => {
                warn!(exporter = other, "Unknown trace exporter, using log");
                Arc::new(LogExporter)
            }
        };
        Ok(Self::new(exporter))
    }

    /// Name of the active exporter
    pub fn exporter_name(&self) -> &str {
        self.exporter.name()
    }

    /// Open the trace for a new turn
    pub fn begin_turn<T: Serialize + ?Sized>(&self, name: &str, input: &T) -> TraceHandle {
        TraceHandle::new(name, to_trace_value(input))
    }

    /// Seal the trace and export it.
    ///
    /// Spans still open at this point are closed with an error marker. Export
    /// failures are logged and never surface to the turn.
    pub async fn finish(&self, trace: &TraceHandle) -> TraceRecord {
        let dangling = trace.close_dangling("span still open at end of turn");
        if dangling > 0 {
            warn!(trace_id = %trace.id(), dangling, "Closed spans left open at end of turn");
        }

        let record = trace.snapshot();
        if let Err(e) = self.exporter.export(&record).await {
            warn!(trace_id = %record.id, exporter = self.exporter.name(), error = %e, "Trace export failed");
        }
        record
    }

    /// Attach user feedback to a finished trace
    pub async fn score(
        &self,
        trace_id: Uuid,
        name: &str,
        value: f64,
        comment: Option<String>,
    ) -> Result<()> {
        let score = TraceScore {
            id: Uuid::now_v7(),
            trace_id,
            name: name.to_string(),
            value,
            comment,
        };
        self.exporter.score(&score).await
    }
}
