//! Repository for document index queries

use crate::db::DbPool;
use crate::embeddings::to_pgvector_literal;
use crate::errors::Result;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, QueryResult, Statement};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Passage returned by similarity search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageRow {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    /// Untitled documents are allowed
    pub document_title: Option<String>,
    pub source_uri: String,
    pub content: String,
    pub chunk_index: i32,
    pub score: f64,
}

const VECTOR_SEARCH_SQL: &str = r#"
    SELECT
        c.id AS chunk_id,
        d.id AS document_id,
        d.title AS document_title,
        d.source_uri,
        c.content,
        c.chunk_index,
        1 - (c.embedding <=> $1::vector) AS score
    FROM chunks c
    JOIN documents d ON c.document_id = d.id
    WHERE c.embedding IS NOT NULL
      AND 1 - (c.embedding <=> $1::vector) >= $2
    ORDER BY c.embedding <=> $1::vector
    LIMIT $3
"#;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Nearest passages by cosine similarity, best first
    pub async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<PassageRow>> {
        let values: Vec<sea_orm::Value> = vec![
            to_pgvector_literal(embedding).into(),
            min_score.into(),
            (limit as i64).into(),
        ];

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, VECTOR_SEARCH_SQL, values);

        self.read_conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(PassageRow::from_query_result)
            .collect()
    }
}

impl PassageRow {
    /// A row that fails to decode is an error, never a missing result
    fn from_query_result(row: &QueryResult) -> Result<Self> {
        Ok(Self {
            chunk_id: row.try_get("", "chunk_id")?,
            document_id: row.try_get("", "document_id")?,
            document_title: row.try_get("", "document_title")?,
            source_uri: row.try_get("", "source_uri")?,
            content: row.try_get("", "content")?,
            chunk_index: row.try_get("", "chunk_index")?,
            score: row.try_get("", "score")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use sea_orm::{MockDatabase, Value};
    use std::collections::BTreeMap;

    fn row(title: Option<&str>) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("chunk_id", Uuid::nil().into()),
            ("document_id", Uuid::nil().into()),
            ("document_title", title.map(str::to_string).into()),
            ("source_uri", "handbook.pdf".into()),
            ("content", "Vacation policy".into()),
            ("chunk_index", 2i32.into()),
            ("score", 0.91f64.into()),
        ])
    }

    fn repository(rows: Vec<BTreeMap<&'static str, Value>>) -> Repository {
        let primary = MockDatabase::new(DbBackend::Postgres)
            .append_query_results([rows])
            .into_connection();
        Repository::new(DbPool {
            primary,
            replica: None,
        })
    }

    #[tokio::test]
    async fn test_vector_search_keeps_untitled_documents() {
        let repo = repository(vec![row(Some("Handbook")), row(None)]);

        let rows = repo.vector_search(&[0.1, 0.2], 5, 0.5).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].document_title.as_deref(), Some("Handbook"));
        assert_eq!(rows[1].document_title, None);
        assert_eq!(rows[1].chunk_index, 2);
    }

    #[tokio::test]
    async fn test_undecodable_row_is_an_error() {
        let mut broken = row(Some("Handbook"));
        broken.remove("content");
        let repo = repository(vec![row(Some("Handbook")), broken]);

        let err = repo.vector_search(&[0.1, 0.2], 5, 0.5).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
