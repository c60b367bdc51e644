//! Language model abstraction
//!
//! Provides a unified interface for chat-completion providers:
//! - OpenAI and any OpenAI-compatible endpoint (single completion + SSE streaming)
//! - A mock provider used when no API key is configured
//!
//! [`LanguageModelClient`] wraps a provider and records every call as a
//! generation on the turn's trace.

mod mock;
mod openai;

pub use mock::MockChatModel;
pub use openai::OpenAIChatModel;

use crate::config::LlmConfig;
use crate::errors::Result;
use crate::metrics;
use crate::trace::{SpanHandle, TraceHandle};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Incremental completion output, in generation order
pub type TextStream = BoxStream<'static, Result<String>>;

/// Trait for chat-completion providers
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a full completion for a single user prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Generate a completion as a stream of text chunks
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a chat model based on configuration
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "mock" => Ok(Arc::new(MockChatModel::new())),
        other => {
            warn!(provider = other, "Unknown language model provider, using mock");
            Ok(Arc::new(MockChatModel::new()))
        }
    }
}

/// Traced access to a chat model
#[derive(Clone)]
pub struct LanguageModelClient {
    model: Arc<dyn ChatModel>,
}

impl LanguageModelClient {
    /// Wrap a provider
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Build the provider described by configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(create_chat_model(config)?))
    }

    /// Get the model name
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Single completion, recorded as a `stage` generation on the trace
    pub async fn generate(&self, prompt: &str, trace: &TraceHandle, stage: &str) -> Result<String> {
        let generation = trace.generation(stage, self.model.model_name(), prompt);
        let timer = metrics::StageTimer::start(stage);

        match self.model.complete(prompt).await {
            Ok(text) => {
                debug!(stage, chars = text.len(), "Completion received");
                generation.end(&text);
                metrics::record_llm(stage, self.model.model_name(), true);
                timer.finish();
                Ok(text)
            }
            Err(e) => {
                generation.fail(&e.to_string());
                metrics::record_llm(stage, self.model.model_name(), false);
                Err(e)
            }
        }
    }

    /// Streamed completion.
    ///
    /// The generation closes with the concatenated text once the stream is
    /// exhausted, or with the error if the stream fails.
    pub async fn stream(&self, prompt: &str, trace: &TraceHandle, stage: &str) -> Result<TextStream> {
        let generation = trace.generation(stage, self.model.model_name(), prompt);

        let inner = match self.model.complete_stream(prompt).await {
            Ok(inner) => inner,
            Err(e) => {
                generation.fail(&e.to_string());
                metrics::record_llm(stage, self.model.model_name(), false);
                return Err(e);
            }
        };
        metrics::record_llm(stage, self.model.model_name(), true);

        Ok(traced_stream(inner, generation))
    }
}

struct TracedStreamState {
    inner: TextStream,
    text: String,
    generation: Option<SpanHandle>,
}

fn traced_stream(inner: TextStream, generation: SpanHandle) -> TextStream {
    let state = TracedStreamState {
        inner,
        text: String::new(),
        generation: Some(generation),
    };

    stream::unfold(state, |mut state| async move {
        // Generation already closed: the stream is over
        state.generation.as_ref()?;

        match state.inner.next().await {
            Some(Ok(chunk)) => {
                state.text.push_str(&chunk);
                Some((Ok(chunk), state))
            }
            Some(Err(e)) => {
                if let Some(generation) = state.generation.take() {
                    generation.fail(&e.to_string());
                }
                Some((Err(e), state))
            }
            None => {
                if let Some(generation) = state.generation.take() {
                    generation.end(&state.text);
                }
                None
            }
        }
    })
    .boxed()
}
