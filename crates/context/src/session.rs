//! Conversation state owned by one chat

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the dialogue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Explicit per-conversation context passed into every turn.
///
/// History is append-only while a turn runs. Once aborted, the session refuses
/// new queries until [`Session::reset`] starts a new chat.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    greeting: String,
    history: Vec<Turn>,
    aborted: bool,
    followups: Vec<String>,
    last_trace_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// New chat opening with the assistant greeting
    pub fn new(greeting: impl Into<String>) -> Self {
        let greeting = greeting.into();
        Self {
            id: Uuid::new_v4(),
            history: vec![Turn::assistant(greeting.clone())],
            greeting,
            aborted: false,
            followups: Vec::new(),
            last_trace_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Suggestions from the last grounded turn
    pub fn followups(&self) -> &[String] {
        &self.followups
    }

    /// Trace of the last turn, target of user feedback
    pub fn last_trace_id(&self) -> Option<Uuid> {
        self.last_trace_id
    }

    pub(crate) fn push_user(&mut self, content: &str) {
        self.history.push(Turn::user(content));
    }

    pub(crate) fn push_assistant(&mut self, content: &str) {
        self.history.push(Turn::assistant(content));
    }

    pub(crate) fn set_followups(&mut self, followups: Vec<String>) {
        self.followups = followups;
    }

    pub(crate) fn set_last_trace(&mut self, trace_id: Uuid) {
        self.last_trace_id = Some(trace_id);
    }

    /// Stop the conversation with a final assistant message
    pub(crate) fn abort(&mut self, message: &str) {
        self.push_assistant(message);
        self.followups.clear();
        self.aborted = true;
    }

    /// Start a new chat in place
    pub fn reset(&mut self) {
        self.history = vec![Turn::assistant(self.greeting.clone())];
        self.aborted = false;
        self.followups.clear();
        self.last_trace_id = None;
    }
}
