//! Answer streaming

use crate::error::PipelineError;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;
use wizsearch_common::llm::TextStream;
use wizsearch_common::trace::TraceLevel;
use wizsearch_common::{LanguageModelClient, TraceHandle};

pub struct AnswerStreamer {
    llm: LanguageModelClient,
}

impl AnswerStreamer {
    pub fn new(llm: LanguageModelClient) -> Self {
        Self { llm }
    }

    /// Start the "Final Answer" generation for the selected prompt
    pub async fn stream(&self, prompt: &str, trace: &TraceHandle) -> Result<AnswerStream, PipelineError> {
        let inner = self
            .llm
            .stream(prompt, trace, "Final Answer")
            .await
            .map_err(PipelineError::Stream)?;

        Ok(AnswerStream {
            inner,
            text: String::new(),
            trace: trace.clone(),
            finished: false,
        })
    }
}

/// Lazy, finite, non-restartable answer chunks in generation order.
///
/// When the model finishes, the trace output becomes the full message. A
/// failed chunk ends the stream.
pub struct AnswerStream {
    inner: TextStream,
    text: String,
    trace: TraceHandle,
    finished: bool,
}

impl AnswerStream {
    /// Everything emitted so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl Stream for AnswerStream {
    type Item = Result<String, PipelineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.text.push_str(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                warn!(error = %e, emitted = this.text.len(), "Answer stream interrupted");
                this.trace.update(&e.to_string(), TraceLevel::Error);
                Poll::Ready(Some(Err(PipelineError::Stream(e))))
            }
            Poll::Ready(None) => {
                this.finished = true;
                this.trace.update(&this.text, TraceLevel::Info);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{recorder, RoutedModel};
    use serde_json::json;

    #[tokio::test]
    async fn test_stream_updates_trace_with_full_message() {
        let model = RoutedModel::new().route(RoutedModel::UNGROUNDED, "Hello there, friend");
        let streamer = AnswerStreamer::new(model.client());
        let trace = recorder().begin_turn("AI Search", "hi");

        let mut stream = streamer
            .stream("Respond to the user's message.", &trace)
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }

        assert_eq!(chunks, vec!["Hello ", "there, ", "friend"]);
        assert_eq!(stream.text(), "Hello there, friend");
        assert!(stream.next().await.is_none());

        let record = trace.snapshot();
        assert_eq!(record.output, Some(json!("Hello there, friend")));
        assert_eq!(record.level, TraceLevel::Info);
    }

    #[tokio::test]
    async fn test_stream_start_failure_is_stream_error() {
        let model = RoutedModel::new().fail(RoutedModel::GROUNDED, "overloaded");
        let streamer = AnswerStreamer::new(model.client());
        let trace = recorder().begin_turn("AI Search", "q");

        let result = streamer
            .stream("Answer the user's question using only the search results below.", &trace)
            .await;
        assert!(matches!(result, Err(PipelineError::Stream(_))));
        assert_eq!(trace.snapshot().open_span_count(), 0);
    }
}
