//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub retrieval: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    /// Configured variant: document or web
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: wizsearch_common::VERSION.to_string(),
    })
}

/// Readiness check - checks the retrieval source
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let start = std::time::Instant::now();
    let source = state.source.kind().label().to_string();

    let retrieval = match state.source.health_check().await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            source,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            source,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let all_healthy = retrieval.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks { retrieval },
        active_sessions: state.sessions.len().await,
    })
}
