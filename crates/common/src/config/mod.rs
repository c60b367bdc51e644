//! Configuration management for WizSearch services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval source, chosen once at startup
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Trace export configuration
    #[serde(default)]
    pub tracing: TraceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (non-streaming endpoints)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai (any OpenAI-compatible endpoint) or mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the provider
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// Retrieval source selection.
///
/// Exactly one variant is active per process; sessions never switch sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalConfig {
    /// Semantic search over a pre-ingested pgvector corpus
    DocumentIndex(DocumentIndexConfig),
    /// External web search API
    WebSearch(WebSearchConfig),
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig::WebSearch(WebSearchConfig::default())
    }
}

impl RetrievalConfig {
    /// Short label used in trace metadata and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RetrievalConfig::DocumentIndex(_) => "document",
            RetrievalConfig::WebSearch(_) => "web",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentIndexConfig {
    /// Database holding the chunk embeddings
    pub database: DatabaseConfig,

    /// Embedding model used at ingestion time
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Maximum passages per query
    #[serde(default = "default_document_limit")]
    pub limit: usize,

    /// Minimum cosine similarity for a passage to count
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// Search API key
    pub api_key: Option<String>,

    /// Search API base URL
    #[serde(default = "default_search_api_base")]
    pub api_base: String,

    /// Search depth: basic or advanced
    #[serde(default = "default_search_depth")]
    pub search_depth: String,

    /// Ask the provider for related images
    #[serde(default = "default_include_images")]
    pub include_images: bool,

    /// Maximum results per query
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,

    /// Request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// History length above which the query is rewritten as standalone
    #[serde(default = "default_standalone_threshold")]
    pub standalone_history_threshold: usize,

    /// Assistant message every new session starts with
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TraceConfig {
    /// Exporter: log, langfuse, none
    #[serde(default = "default_trace_exporter")]
    pub exporter: String,

    /// Langfuse host
    #[serde(default = "default_langfuse_host")]
    pub langfuse_host: String,

    /// Langfuse public key
    pub langfuse_public_key: Option<String>,

    /// Langfuse secret key
    pub langfuse_secret_key: Option<String>,

    /// Export timeout in seconds
    #[serde(default = "default_trace_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name attached to traces
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 1024 }
fn default_llm_timeout() -> u64 { 60 }
fn default_document_limit() -> usize { 5 }
fn default_min_score() -> f64 { 0.3 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_search_api_base() -> String { "https://api.tavily.com".to_string() }
fn default_search_depth() -> String { "advanced".to_string() }
fn default_include_images() -> bool { true }
fn default_search_max_results() -> usize { 5 }
fn default_search_timeout() -> u64 { 30 }
fn default_standalone_threshold() -> usize { 3 }
fn default_greeting() -> String { "Hi! I can search the web or your documents. What would you like to know?".to_string() }
fn default_trace_exporter() -> String { "log".to_string() }
fn default_langfuse_host() -> String { "https://cloud.langfuse.com".to_string() }
fn default_trace_timeout() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "wizsearch".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__KIND=web_search
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Check that every secret the selected providers need is present
    pub fn validate(&self) -> Result<()> {
        if self.llm.provider == "openai" && self.llm.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            });
        }

        match &self.retrieval {
            RetrievalConfig::WebSearch(web) => {
                if web.api_key.as_deref().unwrap_or("").is_empty() {
                    return Err(AppError::Configuration {
                        message: "retrieval.api_key is required for web_search".to_string(),
                    });
                }
            }
            RetrievalConfig::DocumentIndex(doc) => {
                if doc.embedding.provider == "openai"
                    && doc.embedding.api_key.as_deref().unwrap_or("").is_empty()
                {
                    return Err(AppError::Configuration {
                        message: "retrieval.embedding.api_key is required for openai embeddings"
                            .to_string(),
                    });
                }
            }
        }

        if self.tracing.exporter == "langfuse"
            && (self.tracing.langfuse_public_key.is_none() || self.tracing.langfuse_secret_key.is_none())
        {
            return Err(AppError::Configuration {
                message: "langfuse exporter needs tracing.langfuse_public_key and tracing.langfuse_secret_key"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.read_url.as_deref().unwrap_or(&self.url)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: default_llm_api_base(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_search_api_base(),
            search_depth: default_search_depth(),
            include_images: default_include_images(),
            max_results: default_search_max_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            standalone_history_threshold: default_standalone_threshold(),
            greeting: default_greeting(),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            exporter: default_trace_exporter(),
            langfuse_host: default_langfuse_host(),
            langfuse_public_key: None,
            langfuse_secret_key: None,
            timeout_secs: default_trace_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}
