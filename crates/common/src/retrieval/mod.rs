//! Retrieval sources
//!
//! Two interchangeable variants behind one contract:
//! - `DocumentIndex`: semantic search over a pre-ingested pgvector corpus
//! - `WebSearchProvider`: external web search API
//!
//! "No results" is a valid outcome (an empty [`RetrievalResult`]), distinct
//! from a fetch error.

mod document;
mod web;

pub use document::DocumentIndex;
pub use web::WebSearchProvider;

use crate::config::RetrievalConfig;
use crate::errors::Result;
use crate::metrics;
use crate::trace::TraceHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Which variant produced a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Document,
    Web,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Document => "document",
            SourceKind::Web => "web",
        }
    }
}

/// One retrieved passage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    /// URL or document reference
    pub source_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Ordered passages from exactly one source. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub source: SourceKind,
    pub passages: Vec<Passage>,
    /// Provider metadata passed through to the presentation layer untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Value>,
}

impl RetrievalResult {
    /// Result with no passages
    pub fn empty(source: SourceKind) -> Self {
        Self {
            source,
            passages: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

/// Common trait for retrieval sources
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Fetch passages relevant to the query
    async fn fetch(&self, query: &str) -> Result<RetrievalResult>;

    /// Get the source variant
    fn kind(&self) -> SourceKind;

    /// Check the backing service is reachable
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Create the retrieval source selected by configuration
pub async fn create_source(config: &RetrievalConfig) -> Result<Arc<dyn RetrievalSource>> {
    let source: Arc<dyn RetrievalSource> = match config {
        RetrievalConfig::DocumentIndex(doc) => Arc::new(DocumentIndex::connect(doc).await?),
        RetrievalConfig::WebSearch(web) => Arc::new(WebSearchProvider::new(web)?),
    };
    info!(source = source.kind().label(), "Retrieval source ready");
    Ok(source)
}

/// Fetch wrapped in exactly one "Retrieval" span.
///
/// The span is closed once, with the results or with the error.
pub async fn traced_fetch(
    source: &dyn RetrievalSource,
    query: &str,
    trace: &TraceHandle,
) -> Result<RetrievalResult> {
    let label = source.kind().label();
    let span = trace.span("Retrieval", json!({ "search": label }), query);
    let timer = metrics::StageTimer::start("Retrieval");

    match source.fetch(query).await {
        Ok(result) => {
            info!(source = label, results = result.len(), "Retrieval finished");
            span.end(&result);
            metrics::record_retrieval(label, result.len(), true);
            timer.finish();
            Ok(result)
        }
        Err(e) => {
            warn!(source = label, error = %e, "Retrieval failed");
            span.fail(&e.to_string());
            metrics::record_retrieval(label, 0, false);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::trace::{NoopExporter, TraceLevel, TraceRecorder};

    struct StaticSource(Option<RetrievalResult>);

    #[async_trait]
    impl RetrievalSource for StaticSource {
        async fn fetch(&self, _query: &str) -> Result<RetrievalResult> {
            self.0.clone().ok_or_else(|| AppError::SearchProvider {
                message: "connection refused".to_string(),
            })
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Web
        }
    }

    #[tokio::test]
    async fn test_traced_fetch_opens_and_closes_one_span() {
        let recorder = TraceRecorder::new(Arc::new(NoopExporter));
        let trace = recorder.begin_turn("AI Search", "q");
        let source = StaticSource(Some(RetrievalResult::empty(SourceKind::Web)));

        let result = traced_fetch(&source, "rust", &trace).await.unwrap();
        assert!(result.is_empty());

        let record = trace.snapshot();
        let spans: Vec<_> = record.spans_named("Retrieval").collect();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_closed());
        assert_eq!(spans[0].input, json!("rust"));
        assert_eq!(spans[0].metadata["search"], "web");
    }

    #[tokio::test]
    async fn test_traced_fetch_failure_still_closes_span() {
        let recorder = TraceRecorder::new(Arc::new(NoopExporter));
        let trace = recorder.begin_turn("AI Search", "q");
        let source = StaticSource(None);

        assert!(traced_fetch(&source, "rust", &trace).await.is_err());

        let record = trace.snapshot();
        assert_eq!(record.spans.len(), 1);
        assert!(record.spans[0].is_closed());
        assert_eq!(record.spans[0].level, TraceLevel::Error);
    }
}
