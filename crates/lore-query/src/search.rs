//! Query engine combining vector search with relational metadata.
//!
//! The vector backend knows nothing about documents, so the engine
//! oversamples the nearest-neighbor search, joins the surviving chunk ids
//! against the chunk and document tables with filters applied in SQL, and
//! returns the joined rows in the original distance order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lore_core::config::SearchConfig;
use lore_core::error::LoreError;
use lore_core::types::{ChunkRow, DocumentFilter};
use lore_storage::{Database, DocumentRepository};
use lore_vector::{DynEmbeddingService, EmbeddingService, VectorStore};

/// A single query hit: the joined chunk row plus its vector distance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(flatten)]
    pub chunk: ChunkRow,
    /// Raw backend distance, ascending. Units depend on the active
    /// backend's metric.
    pub distance: f64,
}

/// Vector search + metadata join + post-filter.
///
/// Uses dynamic dispatch (`Box<dyn DynEmbeddingService>`) so production
/// code can supply a real embedder while tests use `MockEmbedding`.
pub struct QueryEngine {
    store: Arc<VectorStore>,
    documents: DocumentRepository,
    embedder: Box<dyn DynEmbeddingService>,
    config: SearchConfig,
}

impl QueryEngine {
    pub fn new(
        db: Arc<Database>,
        store: Arc<VectorStore>,
        embedder: impl EmbeddingService + 'static,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            documents: DocumentRepository::new(db),
            embedder: Box::new(embedder),
            config,
        }
    }

    /// How many candidates to pull from the vector backend for a `top_k`
    /// request, leaving slack for filter losses.
    fn oversample(&self, top_k: usize) -> usize {
        (top_k * self.config.oversample_factor)
            .max(top_k)
            .max(self.config.oversample_floor)
    }

    /// Search with a caller-supplied query vector.
    ///
    /// Rejects an empty vector or `top_k == 0` before touching the index.
    /// Results come back ascending by distance, at most `top_k`.
    pub fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<QueryResult>, LoreError> {
        if query_vec.is_empty() {
            return Err(LoreError::InvalidQuery(
                "Query vector must not be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(LoreError::InvalidQuery("top_k must be at least 1".to_string()));
        }

        let fetch = self.oversample(top_k);
        let hits = self.store.search(query_vec, fetch)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        debug!(candidates = hits.len(), top_k, "Vector candidates fetched");

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let rows = self.documents.chunks_by_ids(&ids, filter)?;
        let mut by_id: std::collections::HashMap<&str, &ChunkRow> =
            rows.iter().map(|row| (row.chunk_id.as_str(), row)).collect();

        // Hits are already distance-ordered; the join may drop some.
        let mut results = Vec::with_capacity(top_k);
        for hit in &hits {
            if let Some(row) = by_id.remove(hit.chunk_id.as_str()) {
                results.push(QueryResult {
                    chunk: row.clone(),
                    distance: hit.distance,
                });
                if results.len() == top_k {
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Convenience wrapper: embed the question first, then search.
    pub async fn search_text(
        &self,
        question: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<QueryResult>, LoreError> {
        if question.trim().is_empty() {
            return Err(LoreError::InvalidQuery(
                "Question must not be empty".to_string(),
            ));
        }
        let query_vec = self.embedder.embed_boxed(question).await?;
        self.search(&query_vec, top_k, filter)
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::config::{BackendPreference, VectorConfig};
    use lore_core::types::{Chunk, Document, DocumentKind};
    use lore_vector::MockEmbedding;
    use tempfile::TempDir;

    struct Fixture {
        db: Arc<Database>,
        engine: QueryEngine,
        _dir: TempDir,
    }

    fn make_fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("store.sqlite")).unwrap());
        let config = VectorConfig {
            backend: BackendPreference::Fallback,
            max_elements: 1000,
            ..Default::default()
        };
        let store = Arc::new(
            VectorStore::open(Arc::clone(&db), &dir.path().join("index"), &config).unwrap(),
        );
        let engine = QueryEngine::new(
            Arc::clone(&db),
            store,
            MockEmbedding::new(),
            SearchConfig::default(),
        );
        Fixture { db, engine, _dir: dir }
    }

    async fn index_document(fixture: &Fixture, doc_id: &str, texts: &[&str]) {
        let repo = DocumentRepository::new(Arc::clone(&fixture.db));
        repo.upsert(&Document {
            id: doc_id.to_string(),
            title: doc_id.to_string(),
            occurred_at: "2024-03-01T10:00:00Z".to_string(),
            source_group: String::new(),
            source_url: String::new(),
            raw_text: texts.join("\n"),
            created_at: String::new(),
        })
        .unwrap();
        let embedder = MockEmbedding::new();
        for (i, text) in texts.iter().enumerate() {
            let chunk_id = format!("{}:{}", doc_id, i);
            repo.upsert_chunks(&[Chunk {
                chunk_id: chunk_id.clone(),
                document_id: doc_id.to_string(),
                chunk_index: i as i64,
                speaker: String::new(),
                start_time: None,
                end_time: None,
                text: text.to_string(),
                token_count: text.split_whitespace().count() as i64,
            }])
            .unwrap();
            let vec = embedder.embed(text).await.unwrap();
            fixture.engine.store().upsert(&chunk_id, &vec).unwrap();
        }
    }

    #[tokio::test]
    async fn test_search_text_finds_exact_chunk() {
        let fixture = make_fixture();
        index_document(&fixture, "recording:1", &["alpha beta", "gamma delta"]).await;
        index_document(&fixture, "memory:1", &["epsilon zeta"]).await;

        let results = fixture
            .engine
            .search_text("alpha beta", 2, &DocumentFilter::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.chunk_id, "recording:1:0");
        assert!(results[0].distance < 1e-5);
        // Ascending distance order.
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_filters_applied_in_join() {
        let fixture = make_fixture();
        index_document(&fixture, "recording:1", &["quarterly numbers"]).await;
        index_document(&fixture, "memory:1", &["quarterly numbers"]).await;

        let results = fixture
            .engine
            .search_text(
                "quarterly numbers",
                5,
                &DocumentFilter {
                    kind: Some(DocumentKind::Memory),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.document_id, "memory:1");
    }

    #[tokio::test]
    async fn test_rejects_empty_inputs() {
        let fixture = make_fixture();
        assert!(matches!(
            fixture.engine.search(&[], 3, &DocumentFilter::default()),
            Err(LoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            fixture.engine.search(&[0.5; 4], 0, &DocumentFilter::default()),
            Err(LoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            fixture
                .engine
                .search_text("  ", 3, &DocumentFilter::default())
                .await,
            Err(LoreError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty() {
        let fixture = make_fixture();
        let results = fixture
            .engine
            .search_text("anything", 3, &DocumentFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_oversample_floor_and_factor() {
        let fixture = make_fixture();
        // factor 3, floor 10 (defaults)
        assert_eq!(fixture.engine.oversample(1), 10);
        assert_eq!(fixture.engine.oversample(4), 12);
        assert_eq!(fixture.engine.oversample(20), 60);
    }
}
