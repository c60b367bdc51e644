//! Query pipeline
//!
//! Sequences the stages of one turn:
//!
//! ```text
//! Start -> IntentClassified -> NonSearch ------------------------------> AnswerReady
//!                           -> SearchFormatted -> Retrieved -> Grounded -> AnswerReady
//!                                                           -> NoResults -> Aborted
//! ```
//!
//! Any stage failure moves straight to `Aborted`. Abort is a returned outcome,
//! never an early exit the caller has to catch.

use crate::error::PipelineError;
use crate::events::Progress;
use crate::followup::FollowupTask;
use crate::intent::IntentClassifier;
use crate::prompts;
use crate::rewrite::{QueryFormatter, StandaloneResolver};
use crate::session::Turn;
use std::sync::Arc;
use tracing::{error, info, warn};
use wizsearch_common::config::PipelineConfig;
use wizsearch_common::retrieval::{traced_fetch, SourceKind};
use wizsearch_common::trace::TraceLevel;
use wizsearch_common::{LanguageModelClient, RetrievalResult, RetrievalSource, TraceHandle};

/// Apology shown when retrieval comes back empty
pub const NO_RESULTS_MESSAGE: &str = "I'm sorry, There was an error in search. Please try again.";

/// Why a turn stopped before an answer
#[derive(Debug)]
pub enum AbortReason {
    NoResults,
    Failure(PipelineError),
}

impl AbortReason {
    /// Message shown to the user in place of an answer
    pub fn user_message(&self) -> String {
        match self {
            AbortReason::NoResults => NO_RESULTS_MESSAGE.to_string(),
            AbortReason::Failure(e) => format!("An error occurred: {}", e.detail()),
        }
    }
}

/// Result of running the pipeline for one turn
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Answer from retrieved context; follow-up generation is already running
    Grounded {
        prompt: String,
        results: RetrievalResult,
        followups: FollowupTask,
    },
    /// Answer without search
    Ungrounded { prompt: String },
    Aborted(AbortReason),
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Grounded { .. } => "grounded",
            PipelineOutcome::Ungrounded { .. } => "ungrounded",
            PipelineOutcome::Aborted(AbortReason::NoResults) => "no_results",
            PipelineOutcome::Aborted(AbortReason::Failure(_)) => "failed",
        }
    }
}

pub struct QueryPipeline {
    llm: LanguageModelClient,
    source: Arc<dyn RetrievalSource>,
    classifier: IntentClassifier,
    resolver: StandaloneResolver,
    formatter: QueryFormatter,
}

impl QueryPipeline {
    pub fn new(llm: LanguageModelClient, source: Arc<dyn RetrievalSource>, config: &PipelineConfig) -> Self {
        Self {
            classifier: IntentClassifier::new(llm.clone()),
            resolver: StandaloneResolver::new(llm.clone(), config.standalone_history_threshold),
            formatter: QueryFormatter::new(llm.clone()),
            llm,
            source,
        }
    }

    /// Variant this pipeline retrieves from
    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Run every stage for `query`.
    ///
    /// `history` is the full conversation, ending with the current user turn.
    /// Failures and the empty-results branch are recorded on the trace before
    /// the aborted outcome is returned.
    pub async fn run(
        &self,
        query: &str,
        history: &[Turn],
        trace: &TraceHandle,
        progress: &Progress,
    ) -> PipelineOutcome {
        match self.try_run(query, history, trace, progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stage = e.stage(), error = %e, "Pipeline aborted");
                trace.update(&e.detail(), TraceLevel::Error);
                PipelineOutcome::Aborted(AbortReason::Failure(e))
            }
        }
    }

    async fn try_run(
        &self,
        query: &str,
        history: &[Turn],
        trace: &TraceHandle,
        progress: &Progress,
    ) -> Result<PipelineOutcome, PipelineError> {
        progress.status("Processing your query...");
        let intent = self.classifier.classify(query, trace).await?;
        progress.status("Intent validated...");

        if !intent.is_search() {
            info!(intent = intent.label(), "Non-search intent, answering without retrieval");
            return Ok(PipelineOutcome::Ungrounded {
                prompt: prompts::ungrounded_answer(intent.label(), query),
            });
        }

        let mut search_query = query.to_string();
        if let Some(standalone) = self.resolver.resolve(history, trace).await? {
            progress.status(format!("Standalone query: {}", standalone));
            search_query = standalone;
        }

        search_query = self.formatter.format(&search_query, trace).await?;
        progress.status(format!("Search query: {}", search_query));

        progress.status(match self.source.kind() {
            SourceKind::Document => "Searching the document...",
            SourceKind::Web => "Searching the web...",
        });
        let results = traced_fetch(self.source.as_ref(), &search_query, trace)
            .await
            .map_err(PipelineError::Retrieval)?;

        if results.is_empty() {
            warn!(query = %search_query, "No search results found");
            trace.update("No search results found", TraceLevel::Warning);
            return Ok(PipelineOutcome::Aborted(AbortReason::NoResults));
        }

        let followups = FollowupTask::spawn(self.llm.clone(), search_query.clone(), trace.clone());
        let prompt = prompts::grounded_answer(&results.passages, history);

        info!(query = %search_query, passages = results.len(), "Grounded prompt ready");
        Ok(PipelineOutcome::Grounded {
            prompt,
            results,
            followups,
        })
    }
}
