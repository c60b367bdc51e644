//! Mock chat model for development and testing

use super::{ChatModel, TextStream};
use crate::errors::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Answers prompts matching a routed prefix, otherwise returns scripted
/// responses in order, then falls back to a canned answer
#[derive(Default)]
pub struct MockChatModel {
    routes: Vec<(String, String)>,
    responses: Mutex<VecDeque<String>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers with `responses`, one per call
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            routes: Vec::new(),
            responses: Mutex::new(responses.into()),
        }
    }

    /// Mock that answers every prompt starting with a route's prefix with
    /// that route's response, whatever order the calls arrive in
    pub fn with_routes<P, R>(routes: impl IntoIterator<Item = (P, R)>) -> Self
    where
        P: Into<String>,
        R: Into<String>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(prefix, response)| (prefix.into(), response.into()))
                .collect(),
            responses: Mutex::default(),
        }
    }

    fn next_response(&self, prompt: &str) -> String {
        if let Some((_, response)) = self.routes.iter().find(|(prefix, _)| prompt.starts_with(prefix.as_str())) {
            return response.clone();
        }

        let scripted = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());

        scripted.unwrap_or_else(|| {
            let preview: String = prompt.chars().take(80).collect();
            format!(
                "This is a mock answer for: {}\n\n[Mock response - language model API key not configured]",
                preview.trim()
            )
        })
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(self.next_response(prompt))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let text = self.next_response(prompt);
        // Word-sized chunks, keeping the separating whitespace
        let chunks: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}
