//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the search pipeline with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all WizSearch metrics
pub const METRICS_PREFIX: &str = "wizsearch";

/// Histogram buckets for language model and search latency (in seconds)
pub const STAGE_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Total conversation turns by outcome"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total language model requests"
    );

    describe_counter!(
        format!("{}_retrieval_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval requests by source"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of passages returned by the last retrieval"
    );

    describe_counter!(
        format!("{}_followup_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Follow-up suggestion tasks that failed"
    );

    tracing::info!("Metrics registered");
}

/// Times one pipeline stage
pub struct StageTimer {
    start: Instant,
    stage: String,
}

impl StageTimer {
    /// Start timing a stage
    pub fn start(stage: &str) -> Self {
        Self {
            start: Instant::now(),
            stage: stage.to_string(),
        }
    }

    /// Seconds since the timer started
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record stage completion
    pub fn finish(self) {
        histogram!(
            format!("{}_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Helper to record language model calls
pub fn record_llm(stage: &str, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(source: &str, result_count: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_retrieval_requests_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        gauge!(
            format!("{}_retrieval_results_count", METRICS_PREFIX),
            "source" => source.to_string()
        )
        .set(result_count as f64);
    }
}

/// Helper to record a finished turn
pub fn record_turn(outcome: &str) {
    counter!(
        format!("{}_turns_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record a failed follow-up task
pub fn record_followup_failure() {
    counter!(format!("{}_followup_failures_total", METRICS_PREFIX)).increment(1);
}
