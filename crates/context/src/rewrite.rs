//! Query rewriting stages: standalone resolution and search formatting

use crate::error::PipelineError;
use crate::prompts;
use crate::session::Turn;
use wizsearch_common::{LanguageModelClient, TraceHandle};

/// Strip the quotes and labels models like to wrap a one-line answer in
fn clean_query(raw: &str) -> String {
    let line = raw.trim();
    let line = line
        .strip_prefix("Query:")
        .or_else(|| line.strip_prefix("Question:"))
        .unwrap_or(line);
    line.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim().to_string()
}

/// Rewrites the query against the history once the conversation is long enough
pub struct StandaloneResolver {
    llm: LanguageModelClient,
    threshold: usize,
}

impl StandaloneResolver {
    pub fn new(llm: LanguageModelClient, threshold: usize) -> Self {
        Self { llm, threshold }
    }

    /// Whether a history of `len` turns gets a rewrite
    pub fn applies_to(&self, len: usize) -> bool {
        len > self.threshold
    }

    /// Standalone form of the latest question, or `None` below the threshold.
    ///
    /// `history` already ends with the current user turn.
    pub async fn resolve(
        &self,
        history: &[Turn],
        trace: &TraceHandle,
    ) -> Result<Option<String>, PipelineError> {
        if !self.applies_to(history.len()) {
            return Ok(None);
        }

        let raw = self
            .llm
            .generate(&prompts::standalone_query(history), trace, "Standalone Query")
            .await
            .map_err(PipelineError::Rewrite)?;
        Ok(Some(clean_query(&raw)))
    }
}

/// Normalizes a question into a search query
pub struct QueryFormatter {
    llm: LanguageModelClient,
}

impl QueryFormatter {
    pub fn new(llm: LanguageModelClient) -> Self {
        Self { llm }
    }

    pub async fn format(&self, query: &str, trace: &TraceHandle) -> Result<String, PipelineError> {
        let raw = self
            .llm
            .generate(&prompts::query_formatting(query), trace, "Query Formatting")
            .await
            .map_err(PipelineError::Rewrite)?;

        let formatted = clean_query(&raw);
        // An empty rewrite would search for nothing
        if formatted.is_empty() {
            Ok(query.trim().to_string())
        } else {
            Ok(formatted)
        }
    }
}
