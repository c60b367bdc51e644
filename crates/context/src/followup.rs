//! Follow-up suggestion task
//!
//! Spawned once retrieval returns results and owned by the turn: either joined
//! after the answer stream or aborted when the turn ends without it.

use crate::error::PipelineError;
use crate::prompts;
use regex_lite::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tokio::task::JoinHandle;
use tracing::debug;
use wizsearch_common::{AppError, LanguageModelClient, TraceHandle};

/// Most suggestions kept from one generation
const MAX_SUGGESTIONS: usize = 5;

type FollowupResult = Result<Vec<String>, PipelineError>;

/// Handle to the concurrent follow-up generation of one turn
#[derive(Debug)]
pub struct FollowupTask {
    handle: Option<JoinHandle<FollowupResult>>,
}

impl FollowupTask {
    /// Start generating suggestions for the formatted search query
    pub fn spawn(llm: LanguageModelClient, query: String, trace: TraceHandle) -> Self {
        let handle = tokio::spawn(async move {
            let raw = llm
                .generate(&prompts::followup_query(&query), &trace, "Follow-up Query")
                .await
                .map_err(PipelineError::Followup)?;

            parse_suggestions(&raw).map_err(|e| {
                // Generation succeeded, so record the parse failure separately
                trace
                    .span("Follow-up Parse", Value::Null, &raw)
                    .fail(&e.to_string());
                e
            })
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Wait for the suggestions
    pub async fn join(mut self) -> FollowupResult {
        let Some(handle) = self.handle.take() else {
            return Ok(Vec::new());
        };

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Followup(AppError::Internal {
                message: format!("follow-up task did not complete: {}", e),
            })),
        }
    }

    /// Cancel without waiting
    pub fn abort(mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Aborting follow-up task");
            handle.abort();
        }
    }
}

impl Drop for FollowupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence pattern compiles"))
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::Followup(AppError::InvalidFormat {
        message: message.into(),
    })
}

/// Parse model output into suggestions.
///
/// Accepts a JSON array of strings, optionally inside a code fence, or an
/// object whose only array field holds them.
pub fn parse_suggestions(raw: &str) -> Result<Vec<String>, PipelineError> {
    let body = fence_pattern()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str())
        .trim();

    let value: Value = serde_json::from_str(body)
        .map_err(|e| invalid(format!("follow-up output is not JSON: {}", e)))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => return Err(invalid("expected an object with exactly one array")),
            }
        }
        other => return Err(invalid(format!("unexpected follow-up output: {}", json!(other)))),
    };

    let suggestions: Vec<String> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .take(MAX_SUGGESTIONS)
        .collect();

    if suggestions.is_empty() {
        return Err(invalid("no follow-up suggestions in output"));
    }
    Ok(suggestions)
}
