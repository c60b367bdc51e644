//! Trace exporters
//!
//! - `LogExporter`: structured log records through `tracing`
//! - `LangfuseExporter`: Langfuse public ingestion API
//! - `MemoryExporter`: keeps traces in memory (tests, local debugging)
//! - `NoopExporter`: discards everything

use super::{ObservationKind, TraceRecord, TraceScore};
use crate::config::TraceConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Destination for finished traces
#[async_trait]
pub trait TraceExporter: Send + Sync {
    /// Export a finished trace
    async fn export(&self, trace: &TraceRecord) -> Result<()>;

    /// Export a user feedback score
    async fn score(&self, score: &TraceScore) -> Result<()>;

    /// Exporter name for logs
    fn name(&self) -> &str;
}

/// Writes each finished trace as structured log records
pub struct LogExporter;

#[async_trait]
impl TraceExporter for LogExporter {
    async fn export(&self, trace: &TraceRecord) -> Result<()> {
        for span in &trace.spans {
            let duration_ms = span
                .ended_at
                .map(|end| (end - span.started_at).num_milliseconds())
                .unwrap_or_default();
            info!(
                trace_id = %trace.id,
                span_id = %span.id,
                span = %span.name,
                kind = ?span.kind,
                level = ?span.level,
                duration_ms,
                status = span.status_message.as_deref().unwrap_or(""),
                "Trace span"
            );
        }
        info!(
            trace_id = %trace.id,
            trace = %trace.name,
            session_id = trace.session_id.as_deref().unwrap_or(""),
            level = ?trace.level,
            spans = trace.spans.len(),
            "Trace finished"
        );
        Ok(())
    }

    async fn score(&self, score: &TraceScore) -> Result<()> {
        info!(
            trace_id = %score.trace_id,
            name = %score.name,
            value = score.value,
            comment = score.comment.as_deref().unwrap_or(""),
            "Trace scored"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Discards traces
pub struct NoopExporter;

#[async_trait]
impl TraceExporter for NoopExporter {
    async fn export(&self, _trace: &TraceRecord) -> Result<()> {
        Ok(())
    }

    async fn score(&self, _score: &TraceScore) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Keeps exported traces and scores in memory
#[derive(Default)]
pub struct MemoryExporter {
    traces: Mutex<Vec<TraceRecord>>,
    scores: Mutex<Vec<TraceScore>>,
}

impl MemoryExporter {
    /// All exported traces, oldest first
    pub fn traces(&self) -> Vec<TraceRecord> {
        self.traces
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// All exported scores, oldest first
    pub fn scores(&self) -> Vec<TraceScore> {
        self.scores
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TraceExporter for MemoryExporter {
    async fn export(&self, trace: &TraceRecord) -> Result<()> {
        self.traces
            .lock()
            .map_err(|e| AppError::TraceExport { message: e.to_string() })?
            .push(trace.clone());
        Ok(())
    }

    async fn score(&self, score: &TraceScore) -> Result<()> {
        self.scores
            .lock()
            .map_err(|e| AppError::TraceExport { message: e.to_string() })?
            .push(score.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// One event of a Langfuse ingestion batch
#[derive(Serialize)]
struct IngestionEvent {
    id: Uuid,
    timestamp: String,
    #[serde(rename = "type")]
    event_type: &'static str,
    body: Value,
}

#[derive(Serialize)]
struct IngestionBatch {
    batch: Vec<IngestionEvent>,
}

/// Sends traces to the Langfuse ingestion API
pub struct LangfuseExporter {
    client: reqwest::Client,
    host: String,
    public_key: String,
    secret_key: String,
}

impl LangfuseExporter {
    /// Create a new exporter
    pub fn new(
        host: String,
        public_key: String,
        secret_key: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            public_key,
            secret_key,
        })
    }

    /// Create from trace configuration
    pub fn from_config(config: &TraceConfig) -> Result<Self> {
        let public_key = config.langfuse_public_key.clone().ok_or_else(|| AppError::Configuration {
            message: "tracing.langfuse_public_key is not set".to_string(),
        })?;
        let secret_key = config.langfuse_secret_key.clone().ok_or_else(|| AppError::Configuration {
            message: "tracing.langfuse_secret_key is not set".to_string(),
        })?;

        Self::new(
            config.langfuse_host.clone(),
            public_key,
            secret_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Translate a trace into ingestion events
    fn trace_events(trace: &TraceRecord) -> Vec<IngestionEvent> {
        let now = Utc::now().to_rfc3339();
        let mut events = Vec::with_capacity(trace.spans.len() + 1);

        events.push(IngestionEvent {
            id: Uuid::now_v7(),
            timestamp: now.clone(),
            event_type: "trace-create",
            body: json!({
                "id": trace.id,
                "name": trace.name,
                "sessionId": trace.session_id,
                "timestamp": trace.started_at.to_rfc3339(),
                "input": trace.input,
                "output": trace.output,
                "metadata": { "level": trace.level.as_langfuse() },
            }),
        });

        for span in &trace.spans {
            let mut body = json!({
                "id": span.id,
                "traceId": trace.id,
                "name": span.name,
                "startTime": span.started_at.to_rfc3339(),
                "endTime": span.ended_at.map(|t| t.to_rfc3339()),
                "input": span.input,
                "output": span.output,
                "metadata": span.metadata,
                "level": span.level.as_langfuse(),
                "statusMessage": span.status_message,
            });

            let event_type = match span.kind {
                ObservationKind::Span => "span-create",
                ObservationKind::Generation => {
                    body["model"] = json!(span.model);
                    "generation-create"
                }
            };

            events.push(IngestionEvent {
                id: Uuid::now_v7(),
                timestamp: now.clone(),
                event_type,
                body,
            });
        }

        events
    }

    async fn send(&self, batch: IngestionBatch) -> Result<()> {
        let url = format!("{}/api/public/ingestion", self.host);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&batch)
            .send()
            .await
            .map_err(|e| AppError::TraceExport {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TraceExport {
                message: format!("Langfuse error {}: {}", status, body),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl TraceExporter for LangfuseExporter {
    async fn export(&self, trace: &TraceRecord) -> Result<()> {
        let batch = IngestionBatch {
            batch: Self::trace_events(trace),
        };
        debug!(trace_id = %trace.id, events = batch.batch.len(), "Exporting trace to Langfuse");
        self.send(batch).await
    }

    async fn score(&self, score: &TraceScore) -> Result<()> {
        let batch = IngestionBatch {
            batch: vec![IngestionEvent {
                id: Uuid::now_v7(),
                timestamp: Utc::now().to_rfc3339(),
                event_type: "score-create",
                body: json!({
                    "id": score.id,
                    "traceId": score.trace_id,
                    "name": score.name,
                    "value": score.value,
                    "comment": score.comment,
                }),
            }],
        };
        self.send(batch).await
    }

    fn name(&self) -> &str {
        "langfuse"
    }
}
