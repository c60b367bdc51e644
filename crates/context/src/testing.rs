//! Test doubles shared by the pipeline tests

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wizsearch_common::errors::{AppError, Result};
use wizsearch_common::llm::{ChatModel, TextStream};
use wizsearch_common::retrieval::{Passage, RetrievalResult, RetrievalSource, SourceKind};
use wizsearch_common::trace::{MemoryExporter, NoopExporter};
use wizsearch_common::{LanguageModelClient, TraceRecorder};

pub fn recorder() -> TraceRecorder {
    TraceRecorder::new(Arc::new(NoopExporter))
}

pub fn memory_recorder() -> (Arc<TraceRecorder>, Arc<MemoryExporter>) {
    let exporter = Arc::new(MemoryExporter::default());
    (Arc::new(TraceRecorder::new(exporter.clone())), exporter)
}

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(String),
    /// Streams the text, then breaks
    Interrupt(String, String),
    Hang,
}

/// Chat model answering by prompt kind.
///
/// The follow-up task races the answer stream, so responses are keyed on the
/// prompt's opening line rather than call order.
#[derive(Clone, Default)]
pub struct RoutedModel {
    routes: Arc<Mutex<HashMap<&'static str, Reply>>>,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl RoutedModel {
    pub const INTENT: &'static str = "Classify the intent";
    pub const STANDALONE: &'static str = "Rewrite the latest user question";
    pub const FORMAT: &'static str = "Convert the question into a concise search engine query";
    pub const FOLLOWUP: &'static str = "Suggest follow-up questions";
    pub const GROUNDED: &'static str = "Answer the user's question using only";
    pub const UNGROUNDED: &'static str = "Respond to the user's message";

    const ALL: [&'static str; 6] = [
        Self::INTENT,
        Self::STANDALONE,
        Self::FORMAT,
        Self::FOLLOWUP,
        Self::GROUNDED,
        Self::UNGROUNDED,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, marker: &'static str, reply: Reply) -> Self {
        self.routes.lock().unwrap().insert(marker, reply);
        self
    }

    pub fn route(self, marker: &'static str, text: &str) -> Self {
        self.with(marker, Reply::Text(text.to_string()))
    }

    pub fn fail(self, marker: &'static str, message: &str) -> Self {
        self.with(marker, Reply::Fail(message.to_string()))
    }

    /// Streams `partial`, then fails with `message`
    pub fn interrupt(self, marker: &'static str, partial: &str, message: &str) -> Self {
        self.with(marker, Reply::Interrupt(partial.to_string(), message.to_string()))
    }

    /// Never answers
    pub fn hang(self, marker: &'static str) -> Self {
        self.with(marker, Reply::Hang)
    }

    /// Search-intent model answering every stage
    pub fn search(answer: &str) -> Self {
        Self::new()
            .route(Self::INTENT, "valid_query")
            .route(Self::STANDALONE, "standalone question")
            .route(Self::FORMAT, "formatted query")
            .route(Self::FOLLOWUP, r#"["next one", "next two"]"#)
            .route(Self::GROUNDED, answer)
    }

    pub fn client(&self) -> LanguageModelClient {
        LanguageModelClient::new(Arc::new(self.clone()))
    }

    pub fn calls(&self, marker: &'static str) -> usize {
        self.calls.lock().unwrap().get(marker).copied().unwrap_or(0)
    }

    async fn reply(&self, prompt: &str) -> Result<String> {
        match self.reply_raw(prompt).await? {
            Reply::Text(text) => Ok(text),
            Reply::Interrupt(_, message) => Err(AppError::LanguageModel { message }),
            Reply::Fail(_) | Reply::Hang => unreachable!("resolved by reply_raw"),
        }
    }

    async fn reply_raw(&self, prompt: &str) -> Result<Reply> {
        let marker = Self::ALL
            .into_iter()
            .find(|m| prompt.starts_with(*m))
            .unwrap_or("unknown");
        *self.calls.lock().unwrap().entry(marker).or_default() += 1;

        let reply = self.routes.lock().unwrap().get(marker).cloned();
        match reply {
            Some(reply @ (Reply::Text(_) | Reply::Interrupt(..))) => Ok(reply),
            Some(Reply::Fail(message)) => Err(AppError::LanguageModel { message }),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(AppError::LanguageModel {
                message: format!("no route for {}", marker),
            }),
        }
    }
}

#[async_trait]
impl ChatModel for RoutedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.reply(prompt).await
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let (text, failure) = match self.reply_raw(prompt).await? {
            Reply::Text(text) => (text, None),
            Reply::Interrupt(text, message) => (text, Some(message)),
            Reply::Fail(_) | Reply::Hang => unreachable!("resolved by reply_raw"),
        };
        let mut chunks: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        if let Some(message) = failure {
            chunks.push(Err(AppError::LanguageModel { message }));
        }
        Ok(stream::iter(chunks).boxed())
    }

    fn model_name(&self) -> &str {
        "routed"
    }
}

/// Source returning a fixed result, or failing when it has none
pub struct StaticSource {
    kind: SourceKind,
    result: Option<RetrievalResult>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn passages(kind: SourceKind, count: usize) -> Self {
        let passages = (0..count)
            .map(|i| Passage {
                source_id: format!("doc-{}", i),
                content: format!("passage {}", i),
                title: None,
                score: Some(0.9),
            })
            .collect();
        Self {
            kind,
            result: Some(RetrievalResult {
                source: kind,
                passages,
                images: Vec::new(),
            }),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing(kind: SourceKind) -> Self {
        Self {
            kind,
            result: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalSource for StaticSource {
    async fn fetch(&self, _query: &str) -> Result<RetrievalResult> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.result.clone().ok_or_else(|| AppError::SearchProvider {
            message: "connection refused".to_string(),
        })
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}
