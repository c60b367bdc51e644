//! One conversation turn, end to end
//!
//! Opens the trace, runs the pipeline, streams the answer, joins the follow-up
//! task and exports the trace. The session is updated with the outcome.

use crate::error::PipelineError;
use crate::events::{Progress, TurnEvent};
use crate::followup::FollowupTask;
use crate::pipeline::{PipelineOutcome, QueryPipeline};
use crate::session::Session;
use crate::streamer::AnswerStreamer;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use wizsearch_common::config::PipelineConfig;
use wizsearch_common::metrics::{self, StageTimer};
use wizsearch_common::retrieval::SourceKind;
use wizsearch_common::trace::TraceLevel;
use wizsearch_common::{
    AppError, LanguageModelClient, Result, RetrievalSource, TraceHandle, TraceRecorder,
};

/// Name of every turn's trace
pub const TRACE_NAME: &str = "AI Search";

/// Score name used for user feedback
pub const FEEDBACK_SCORE: &str = "user-feedback";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Grounded,
    Ungrounded,
    Aborted,
}

/// Summary of a finished turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub trace_id: Uuid,
    pub outcome: TurnOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub followups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_message: Option<String>,
}

pub struct TurnRunner {
    pipeline: QueryPipeline,
    streamer: AnswerStreamer,
    recorder: Arc<TraceRecorder>,
}

impl TurnRunner {
    pub fn new(
        llm: LanguageModelClient,
        source: Arc<dyn RetrievalSource>,
        recorder: Arc<TraceRecorder>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            pipeline: QueryPipeline::new(llm.clone(), source, config),
            streamer: AnswerStreamer::new(llm),
            recorder,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.pipeline.source_kind()
    }

    /// Answer `query` within `session`.
    ///
    /// Errors only when the turn cannot start: the session is aborted or the
    /// query is blank. Pipeline failures end the turn as [`TurnOutcome::Aborted`].
    pub async fn run(&self, session: &mut Session, query: &str, progress: &Progress) -> Result<TurnReport> {
        if session.is_aborted() {
            return Err(AppError::SessionAborted {
                id: session.id.to_string(),
            });
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation {
                message: "query must not be empty".to_string(),
                field: Some("query".to_string()),
            });
        }

        session.push_user(query);
        session.set_followups(Vec::new());

        let trace = self.recorder.begin_turn(TRACE_NAME, query);
        trace.set_session(session.id.to_string());
        session.set_last_trace(trace.id());
        let timer = StageTimer::start("Turn");

        let outcome = self.pipeline.run(query, session.history(), &trace, progress).await;
        let label = outcome.label();

        let (prompt, followups, turn_outcome) = match outcome {
            PipelineOutcome::Grounded {
                prompt,
                results,
                followups,
            } => {
                progress.emit(TurnEvent::SearchResults { results });
                (prompt, Some(followups), TurnOutcome::Grounded)
            }
            PipelineOutcome::Ungrounded { prompt } => (prompt, None, TurnOutcome::Ungrounded),
            PipelineOutcome::Aborted(reason) => {
                let report = self
                    .abort(session, &trace, progress, reason.user_message(), label)
                    .await;
                timer.finish();
                return Ok(report);
            }
        };

        let answer = match self.stream_answer(&prompt, &trace, progress).await {
            Ok(answer) => answer,
            Err(e) => {
                if let Some(task) = followups {
                    task.abort();
                }
                trace.update(&e.detail(), TraceLevel::Error);
                let message = format!("An error occurred: {}", e.detail());
                let report = self
                    .abort(session, &trace, progress, message, "stream_failed")
                    .await;
                timer.finish();
                return Ok(report);
            }
        };
        session.push_assistant(&answer);

        let suggestions = match followups {
            Some(task) => self.join_followups(task, progress).await,
            None => Vec::new(),
        };
        session.set_followups(suggestions.clone());

        let record = self.recorder.finish(&trace).await;
        timer.finish();
        metrics::record_turn(label);
        progress.emit(TurnEvent::Done { trace_id: record.id });

        info!(
            session_id = %session.id,
            trace_id = %record.id,
            outcome = label,
            answer_chars = answer.len(),
            followups = suggestions.len(),
            "Turn complete"
        );

        Ok(TurnReport {
            trace_id: record.id,
            outcome: turn_outcome,
            answer: Some(answer),
            followups: suggestions,
            abort_message: None,
        })
    }

    /// Attach user feedback to the session's last turn
    pub async fn feedback(&self, session: &Session, value: f64, comment: Option<String>) -> Result<Uuid> {
        let trace_id = session.last_trace_id().ok_or_else(|| AppError::Validation {
            message: "no turn to give feedback on".to_string(),
            field: None,
        })?;

        self.recorder
            .score(trace_id, FEEDBACK_SCORE, value, comment)
            .await?;
        info!(session_id = %session.id, trace_id = %trace_id, value, "Feedback recorded");
        Ok(trace_id)
    }

    async fn stream_answer(
        &self,
        prompt: &str,
        trace: &TraceHandle,
        progress: &Progress,
    ) -> std::result::Result<String, PipelineError> {
        let mut stream = self.streamer.stream(prompt, trace).await?;
        while let Some(chunk) = stream.next().await {
            progress.emit(TurnEvent::Chunk { text: chunk? });
        }
        Ok(stream.into_text())
    }

    /// Suggestions, or none when the task failed. Never fails the turn.
    async fn join_followups(&self, task: FollowupTask, progress: &Progress) -> Vec<String> {
        match task.join().await {
            Ok(suggestions) => {
                progress.emit(TurnEvent::Followups {
                    queries: suggestions.clone(),
                });
                suggestions
            }
            Err(e) => {
                warn!(error = %e, "Follow-up suggestions unavailable");
                metrics::record_followup_failure();
                Vec::new()
            }
        }
    }

    async fn abort(
        &self,
        session: &mut Session,
        trace: &TraceHandle,
        progress: &Progress,
        message: String,
        label: &str,
    ) -> TurnReport {
        warn!(session_id = %session.id, outcome = label, message = %message, "Turn aborted");
        session.abort(&message);
        progress.emit(TurnEvent::Aborted {
            message: message.clone(),
        });

        let record = self.recorder.finish(trace).await;
        metrics::record_turn(label);
        progress.emit(TurnEvent::Done { trace_id: record.id });

        TurnReport {
            trace_id: record.id,
            outcome: TurnOutcome::Aborted,
            answer: None,
            followups: Vec::new(),
            abort_message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NO_RESULTS_MESSAGE;
    use crate::session::Turn;
    use crate::testing::{memory_recorder, RoutedModel, StaticSource};
    use tokio::sync::mpsc;
    use wizsearch_common::trace::MemoryExporter;

    fn runner(model: &RoutedModel, source: StaticSource) -> (TurnRunner, Arc<MemoryExporter>) {
        let (recorder, exporter) = memory_recorder();
        let runner = TurnRunner::new(
            model.client(),
            Arc::new(source),
            recorder,
            &PipelineConfig::default(),
        );
        (runner, exporter)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_greeting_turn_streams_ungrounded_answer() {
        let model = RoutedModel::new()
            .route(RoutedModel::INTENT, "greeting")
            .route(RoutedModel::UNGROUNDED, "Hello! Ask me anything.");
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Web, 2));
        let mut session = Session::new("Hi");

        let report = runner.run(&mut session, "hello", &Progress::silent()).await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Ungrounded);
        assert_eq!(report.answer.as_deref(), Some("Hello! Ask me anything."));
        assert!(report.followups.is_empty());
        assert_eq!(
            session.history(),
            &[
                Turn::assistant("Hi"),
                Turn::user("hello"),
                Turn::assistant("Hello! Ask me anything.")
            ]
        );

        let traces = exporter.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].name, TRACE_NAME);
        assert_eq!(traces[0].spans_named("Retrieval").count(), 0);
        assert_eq!(traces[0].output, Some(serde_json::json!("Hello! Ask me anything.")));
    }

    #[tokio::test]
    async fn test_grounded_turn_emits_results_chunks_and_followups() {
        let model = RoutedModel::search("Rust was created by Graydon Hoare.");
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Document, 3));
        let mut session = Session::new("Hi");
        session.push_user("what is rust");
        session.push_assistant("A systems language.");
        session.push_user("is it fast");
        session.push_assistant("Yes.");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = runner
            .run(&mut session, "who made it", &Progress::new(tx))
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Grounded);
        assert_eq!(report.followups, vec!["next one", "next two"]);
        assert_eq!(session.followups(), &["next one", "next two"]);
        assert_eq!(session.last_trace_id(), Some(report.trace_id));
        assert_eq!(model.calls(RoutedModel::STANDALONE), 1);

        let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.name()).collect();
        let first_chunk = names.iter().position(|n| *n == "chunk").unwrap();
        let results = names.iter().position(|n| *n == "search_results").unwrap();
        let followups = names.iter().position(|n| *n == "followups").unwrap();
        assert!(results < first_chunk);
        assert!(first_chunk < followups);
        assert_eq!(names.last(), Some(&"done"));

        let trace = &exporter.traces()[0];
        assert_eq!(trace.open_span_count(), 0);
        assert_eq!(trace.spans_named("Follow-up Query").count(), 1);
        assert_eq!(trace.spans_named("Final Answer").count(), 1);
    }

    #[tokio::test]
    async fn test_empty_results_abort_session_until_reset() {
        let model = RoutedModel::search("unused");
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Web, 0));
        let mut session = Session::new("Hi");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = runner
            .run(&mut session, "something obscure", &Progress::new(tx))
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Aborted);
        assert_eq!(report.abort_message.as_deref(), Some(NO_RESULTS_MESSAGE));
        assert!(session.is_aborted());
        assert_eq!(model.calls(RoutedModel::GROUNDED), 0);
        assert!(!drain(&mut rx).iter().any(|e| e.name() == "chunk"));
        assert_eq!(exporter.traces()[0].level, TraceLevel::Warning);

        let err = runner
            .run(&mut session, "try again", &Progress::silent())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionAborted { .. }));

        session.reset();
        let retried = runner.run(&mut session, "try again", &Progress::silent()).await;
        assert!(retried.is_ok());
    }

    #[tokio::test]
    async fn test_retrieval_failure_message_includes_detail() {
        let model = RoutedModel::search("unused");
        let (runner, exporter) = runner(&model, StaticSource::failing(SourceKind::Web));
        let mut session = Session::new("Hi");

        let report = runner.run(&mut session, "q", &Progress::silent()).await.unwrap();

        let message = report.abort_message.unwrap();
        assert!(message.starts_with("An error occurred: "));
        assert!(message.contains("connection refused"));
        assert_eq!(session.history().last(), Some(&Turn::assistant(message)));

        let trace = &exporter.traces()[0];
        assert_eq!(trace.level, TraceLevel::Error);
        assert_eq!(trace.open_span_count(), 0);
    }

    #[tokio::test]
    async fn test_followup_failure_does_not_fail_turn() {
        let model = RoutedModel::search("The answer.").fail(RoutedModel::FOLLOWUP, "quota exceeded");
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Web, 2));
        let mut session = Session::new("Hi");

        let report = runner.run(&mut session, "q", &Progress::silent()).await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Grounded);
        assert_eq!(report.answer.as_deref(), Some("The answer."));
        assert!(report.followups.is_empty());
        assert!(!session.is_aborted());

        let trace = &exporter.traces()[0];
        let followup = trace.spans_named("Follow-up Query").next().unwrap();
        assert_eq!(followup.level, TraceLevel::Error);
        assert_eq!(trace.level, TraceLevel::Info);
    }

    #[tokio::test]
    async fn test_stream_failure_aborts_and_cancels_followups() {
        let model = RoutedModel::search("unused")
            .fail(RoutedModel::GROUNDED, "model overloaded")
            .hang(RoutedModel::FOLLOWUP);
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Web, 1));
        let mut session = Session::new("Hi");

        let report = runner.run(&mut session, "q", &Progress::silent()).await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Aborted);
        assert!(report.abort_message.unwrap().contains("model overloaded"));
        assert!(session.is_aborted());
        assert_eq!(exporter.traces()[0].open_span_count(), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_error_aborts_turn() {
        let model = RoutedModel::search("unused").interrupt(
            RoutedModel::GROUNDED,
            "Partial answer ",
            "Stream error: upstream reset",
        );
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Document, 2));
        let mut session = Session::new("Hi");

        let report = runner.run(&mut session, "q", &Progress::silent()).await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Aborted);
        assert!(report.abort_message.unwrap().contains("upstream reset"));
        assert!(session.is_aborted());

        let trace = &exporter.traces()[0];
        assert_eq!(trace.level, TraceLevel::Error);
        let answer = trace.spans_named("Final Answer").next().unwrap();
        assert_eq!(answer.level, TraceLevel::Error);
    }

    #[tokio::test]
    async fn test_feedback_scores_last_trace() {
        let model = RoutedModel::new()
            .route(RoutedModel::INTENT, "thanks")
            .route(RoutedModel::UNGROUNDED, "You're welcome!");
        let (runner, exporter) = runner(&model, StaticSource::passages(SourceKind::Web, 1));
        let mut session = Session::new("Hi");

        assert!(runner.feedback(&session, 1.0, None).await.is_err());

        let report = runner.run(&mut session, "thanks", &Progress::silent()).await.unwrap();
        let scored = runner
            .feedback(&session, 1.0, Some("helpful".to_string()))
            .await
            .unwrap();

        assert_eq!(scored, report.trace_id);
        let scores = exporter.scores();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].name, FEEDBACK_SCORE);
        assert_eq!(scores[0].trace_id, report.trace_id);
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let model = RoutedModel::new();
        let (runner, _) = runner(&model, StaticSource::passages(SourceKind::Web, 1));
        let mut session = Session::new("Hi");

        let err = runner.run(&mut session, "   ", &Progress::silent()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(session.history().len(), 1);
    }
}
