//! WizSearch Context Engine
//!
//! The query-processing and retrieval-orchestration pipeline:
//! - Intent classification
//! - Standalone query resolution and search query formatting
//! - Retrieval from the configured source
//! - Concurrent follow-up suggestion generation
//! - Answer streaming
//!
//! Every stage is recorded on the turn's trace.

mod error;
mod events;
mod followup;
mod intent;
mod pipeline;
pub mod prompts;
mod rewrite;
mod session;
mod streamer;
mod turn;

#[cfg(test)]
mod testing;

pub use error::PipelineError;
pub use events::{Progress, TurnEvent};
pub use followup::{parse_suggestions, FollowupTask};
pub use intent::{Intent, IntentClassifier, VALID_QUERY};
pub use pipeline::{AbortReason, PipelineOutcome, QueryPipeline};
pub use rewrite::{QueryFormatter, StandaloneResolver};
pub use session::{Role, Session, Turn};
pub use streamer::{AnswerStream, AnswerStreamer};
pub use turn::{TurnOutcome, TurnReport, TurnRunner, TRACE_NAME};
