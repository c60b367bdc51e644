//! Document index backed by pgvector
//!
//! Embeds the query and returns the nearest ingested chunks.

use super::{Passage, RetrievalResult, RetrievalSource, SourceKind};
use crate::config::DocumentIndexConfig;
use crate::db::{DbPool, PassageRow, Repository};
use crate::embeddings::{create_embedder, Embedder};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Semantic search over a pre-built index
pub struct DocumentIndex {
    repo: Repository,
    embedder: Arc<dyn Embedder>,
    limit: usize,
    min_score: f64,
}

impl DocumentIndex {
    /// Create an index over an existing repository
    pub fn new(repo: Repository, embedder: Arc<dyn Embedder>, limit: usize, min_score: f64) -> Self {
        Self {
            repo,
            embedder,
            limit,
            min_score,
        }
    }

    /// Connect to the configured database and embedding provider
    pub async fn connect(config: &DocumentIndexConfig) -> Result<Self> {
        let pool = DbPool::new(&config.database).await?;
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(
            Repository::new(pool),
            embedder,
            config.limit,
            config.min_score,
        ))
    }
}

impl From<PassageRow> for Passage {
    fn from(row: PassageRow) -> Self {
        Passage {
            source_id: format!("{}#{}", row.source_uri, row.chunk_index),
            content: row.content,
            title: row.document_title,
            score: Some(row.score),
        }
    }
}

#[async_trait]
impl RetrievalSource for DocumentIndex {
    async fn fetch(&self, query: &str) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed(query).await?;
        let rows = self
            .repo
            .vector_search(&embedding, self.limit, self.min_score)
            .await?;

        debug!(
            model = self.embedder.model_name(),
            rows = rows.len(),
            "Document index search complete"
        );

        Ok(RetrievalResult {
            source: SourceKind::Document,
            passages: rows.into_iter().map(Passage::from).collect(),
            images: Vec::new(),
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Document
    }

    async fn health_check(&self) -> Result<()> {
        self.repo.ping().await
    }
}
