//! Intent classification

use crate::error::PipelineError;
use crate::prompts;
use serde::Serialize;
use tracing::debug;
use wizsearch_common::{LanguageModelClient, TraceHandle};

/// Label the classifier returns for messages that need a search
pub const VALID_QUERY: &str = "valid_query";

/// Classified intent of a user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Search,
    /// Any non-search label (greeting, chit_chat, ...)
    Other(String),
}

impl Intent {
    /// Interpret a raw model label
    pub fn from_label(raw: &str) -> Self {
        let label = normalize_label(raw);
        if label == VALID_QUERY {
            Intent::Search
        } else {
            Intent::Other(label)
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Intent::Search => VALID_QUERY,
            Intent::Other(label) => label,
        }
    }

    pub fn is_search(&self) -> bool {
        matches!(self, Intent::Search)
    }
}

/// Lowercase, collapse whitespace and strip surrounding quotes or punctuation
fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_string()
}

pub struct IntentClassifier {
    llm: LanguageModelClient,
}

impl IntentClassifier {
    pub fn new(llm: LanguageModelClient) -> Self {
        Self { llm }
    }

    /// Classify the raw query; recorded as the "Intent" generation
    pub async fn classify(&self, query: &str, trace: &TraceHandle) -> Result<Intent, PipelineError> {
        let raw = self
            .llm
            .generate(&prompts::intent(query), trace, "Intent")
            .await
            .map_err(PipelineError::Classification)?;

        let intent = Intent::from_label(&raw);
        debug!(intent = intent.label(), "Intent classified");
        Ok(intent)
    }
}
