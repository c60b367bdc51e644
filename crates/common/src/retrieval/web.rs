//! Web search provider (Tavily search API)

use super::{Passage, RetrievalResult, RetrievalSource, SourceKind};
use crate::config::WebSearchConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_images: bool,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    url: String,
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    #[serde(default)]
    images: Vec<Value>,
}

impl From<SearchResponse> for RetrievalResult {
    fn from(response: SearchResponse) -> Self {
        RetrievalResult {
            source: SourceKind::Web,
            passages: response
                .results
                .into_iter()
                .map(|hit| Passage {
                    source_id: hit.url,
                    content: hit.content,
                    title: hit.title,
                    score: hit.score,
                })
                .collect(),
            images: response.images,
        }
    }
}

/// External web search
pub struct WebSearchProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    search_depth: String,
    include_images: bool,
    max_results: usize,
}

impl WebSearchProvider {
    /// Create a new provider
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "web search API key is not set".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            search_depth: config.search_depth.clone(),
            include_images: config.include_images,
            max_results: config.max_results,
        })
    }

    fn request<'a>(&'a self, query: &'a str) -> SearchRequest<'a> {
        SearchRequest {
            api_key: &self.api_key,
            query,
            search_depth: &self.search_depth,
            include_images: self.include_images,
            max_results: self.max_results,
        }
    }
}

/// Decode a search API body; a missing `results` field is malformed, an empty one is not
fn parse_response(body: &str) -> Result<RetrievalResult> {
    let response: SearchResponse = serde_json::from_str(body).map_err(|e| AppError::SearchProvider {
        message: format!("Malformed search response: {}", e),
    })?;
    Ok(response.into())
}

#[async_trait]
impl RetrievalSource for WebSearchProvider {
    async fn fetch(&self, query: &str) -> Result<RetrievalResult> {
        let url = format!("{}/search", self.api_base);
        let response = self
            .client
            .post(&url)
            .json(&self.request(query))
            .send()
            .await
            .map_err(|e| AppError::SearchProvider {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SearchProvider {
                message: format!("API error {}: {}", status, body),
            });
        }

        let body = response.text().await.map_err(|e| AppError::SearchProvider {
            message: format!("Failed to read response: {}", e),
        })?;

        parse_response(&body)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results_and_images() {
        let body = r#"{
            "query": "rust async runtime",
            "results": [
                {"title": "Tokio", "url": "https://tokio.rs", "content": "An asynchronous runtime", "score": 0.91},
                {"url": "https://docs.rs/async-std", "content": "Async version of std"}
            ],
            "images": ["https://tokio.rs/logo.png"],
            "response_time": 1.2
        }"#;

        let result = parse_response(body).unwrap();
        assert_eq!(result.source, SourceKind::Web);
        assert_eq!(result.len(), 2);
        assert_eq!(result.passages[0].source_id, "https://tokio.rs");
        assert_eq!(result.passages[1].title, None);
        assert_eq!(result.images, vec![Value::String("https://tokio.rs/logo.png".into())]);
    }

    #[test]
    fn test_empty_results_is_not_an_error() {
        let result = parse_response(r#"{"results": []}"#).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_missing_results_is_malformed() {
        let err = parse_response(r#"{"detail": "Unauthorized"}"#).unwrap_err();
        assert!(err.to_string().contains("Malformed search response"));
    }

    #[test]
    fn test_default_request_is_advanced_with_images() {
        let config = WebSearchConfig {
            api_key: Some("tvly-test".to_string()),
            ..WebSearchConfig::default()
        };
        let provider = WebSearchProvider::new(&config).unwrap();

        let body = serde_json::to_value(provider.request("rust async runtime")).unwrap();
        assert_eq!(body["search_depth"], "advanced");
        assert_eq!(body["include_images"], true);
        assert_eq!(body["api_key"], "tvly-test");
        assert_eq!(body["query"], "rust async runtime");
        assert_eq!(body["max_results"], config.max_results);
    }

    #[test]
    fn test_requires_api_key() {
        assert!(WebSearchProvider::new(&WebSearchConfig::default()).is_err());
    }
}
