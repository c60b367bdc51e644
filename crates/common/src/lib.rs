//! WizSearch Common Library
//!
//! Shared code for the WizSearch services including:
//! - Configuration management
//! - Error types and handling
//! - Language model clients (OpenAI + mock)
//! - Retrieval sources (pgvector document index, web search)
//! - Per-turn trace recording and export
//! - Metrics

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod retrieval;
pub mod trace;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::LanguageModelClient;
pub use retrieval::{RetrievalResult, RetrievalSource};
pub use trace::{TraceHandle, TraceRecorder};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
