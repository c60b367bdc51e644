//! WizSearch API Gateway
//!
//! HTTP surface of the search pipeline.
//! Handles:
//! - Chat sessions (create, inspect, start a new chat)
//! - Streamed turns over server-sent events
//! - User feedback on answers
//! - Observability (logging, metrics, per-turn traces)

mod handlers;
mod store;

use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use store::SessionStore;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wizsearch_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics,
    retrieval::create_source,
    LanguageModelClient, RetrievalSource, TraceRecorder,
};
use wizsearch_context::TurnRunner;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub runner: Arc<TurnRunner>,
    pub source: Arc<dyn RetrievalSource>,
    pub sessions: SessionStore,
}

impl AppState {
    /// Build every collaborator described by configuration
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let llm = LanguageModelClient::from_config(&config.llm)?;
        info!(model = llm.model_name(), "Language model ready");

        let source = create_source(&config.retrieval).await?;

        let recorder = Arc::new(TraceRecorder::from_config(&config.tracing)?);
        info!(exporter = recorder.exporter_name(), "Trace recorder ready");

        let runner = TurnRunner::new(llm, source.clone(), recorder, &config.pipeline);

        Ok(Self {
            config: Arc::new(config),
            runner: Arc::new(runner),
            source,
            sessions: SessionStore::new(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    init_logging(&config.observability);

    info!("Starting WizSearch API Gateway v{}", wizsearch_common::VERSION);

    config.validate().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;

    // Initialize metrics
    init_metrics(&config.observability)?;
    metrics::register_metrics();

    let state = AppState::from_config(config).await?;
    let config = state.config.clone();

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Serve Prometheus metrics on their own port (0 disables)
fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            metrics::STAGE_BUCKETS,
        )?
        .install()?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Session endpoints
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions/{id}", get(handlers::sessions::get_session))
        .route("/sessions/{id}/history", delete(handlers::sessions::reset_session))
        .route("/sessions/{id}/feedback", post(handlers::sessions::submit_feedback))

        // Chat turns
        .route("/sessions/{id}/turns", post(handlers::chat::create_turn));

    // Compose the app
    Router::new()
        .nest("/v2", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wizsearch_common::errors::Result;
    use wizsearch_common::llm::MockChatModel;
    use wizsearch_common::retrieval::{Passage, RetrievalResult, SourceKind};
    use wizsearch_common::trace::NoopExporter;

    struct OnePassage;

    #[async_trait]
    impl RetrievalSource for OnePassage {
        async fn fetch(&self, _query: &str) -> Result<RetrievalResult> {
            Ok(RetrievalResult {
                source: SourceKind::Web,
                passages: vec![Passage {
                    source_id: "https://www.rust-lang.org".to_string(),
                    content: "Rust is a systems programming language.".to_string(),
                    title: Some("Rust".to_string()),
                    score: Some(0.9),
                }],
                images: Vec::new(),
            })
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Web
        }
    }

    /// Mock model answering each pipeline stage by its prompt
    fn test_state() -> AppState {
        let model = MockChatModel::with_routes([
            ("Classify the intent", "valid_query"),
            ("Convert the question into a concise search engine query", "rust language"),
            ("Answer the user's question using only", "Rust is fast."),
            ("Suggest follow-up questions", "[\"Who maintains Rust?\"]"),
        ]);
        let llm = LanguageModelClient::new(Arc::new(model));
        let source: Arc<dyn RetrievalSource> = Arc::new(OnePassage);
        let recorder = Arc::new(TraceRecorder::new(Arc::new(NoopExporter)));
        let config = AppConfig::default();
        let runner = TurnRunner::new(llm, source.clone(), recorder, &config.pipeline);

        AppState {
            config: Arc::new(config),
            runner: Arc::new(runner),
            source,
            sessions: SessionStore::new(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::get("/v2/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let state = test_state();
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::post("/v2/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let id = created["session_id"].as_str().unwrap().to_string();
        assert_eq!(created["history"][0]["role"], "assistant");

        let response = app
            .oneshot(
                Request::get(format!("/v2/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["aborted"], false);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::get(format!("/v2/sessions/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_turn_streams_sse_events() {
        let state = test_state();
        let id = state.sessions.create(&state.config.pipeline.greeting).await.id;
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::post(format!("/v2/sessions/{}/turns", id))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "query": "what is rust" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("event: status"));
        assert!(body.contains("event: search_results"));
        assert!(body.contains("event: chunk"));
        assert!(body.contains("event: followups"));
        assert!(body.contains("Who maintains Rust?"));
        assert!(body.contains("event: done"));

        let session = state.sessions.get(id).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn test_reset_and_feedback_without_turn() {
        let state = test_state();
        let id = state.sessions.create(&state.config.pipeline.greeting).await.id;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/v2/sessions/{}/history", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["history"].as_array().unwrap().len(), 1);

        // Nothing answered yet, so there is no trace to score
        let response = app
            .oneshot(
                Request::post(format!("/v2/sessions/{}/feedback", id))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "score": 1.0 }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_busy_session_rejects_turn() {
        let state = test_state();
        let id = state.sessions.create(&state.config.pipeline.greeting).await.id;
        let _guard = state.sessions.acquire(id).await.unwrap();
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::post(format!("/v2/sessions/{}/turns", id))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "query": "what is rust" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let state = test_state();
        let id = state.sessions.create(&state.config.pipeline.greeting).await.id;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::post(format!("/v2/sessions/{}/turns", id))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "query": "" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
