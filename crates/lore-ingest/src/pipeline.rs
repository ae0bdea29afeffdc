//! Document ingestion pipeline.
//!
//! Processes an incoming document through fingerprinting, duplicate
//! detection, relational upsert, chunk replacement, embedding, vector
//! indexing, and the knowledge lifecycle record. Chunking itself happens
//! upstream; callers pass pre-segmented chunk texts (or let the whole
//! document become a single chunk).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lore_core::config::DedupConfig;
use lore_core::error::LoreError;
use lore_core::types::{Chunk, Collection, CollectionKind, Document, KnowledgeDocument, CUSTOM_PREFIX};
use lore_storage::{CollectionRepository, Database, DocumentRepository, KnowledgeRepository};
use lore_vector::{EmbeddingService, VectorStore};

use crate::fingerprint::{content_hash, hamming_distance, normalize_text, simhash64};
use crate::score::{freshness_score, reliability_score};

const DEDUP_CANDIDATE_LIMIT: u64 = 2000;

/// Result of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestOutcome {
    /// A new document was stored and indexed.
    Stored { document_id: String },
    /// An existing document with the same id was overwritten in full.
    Replaced { document_id: String },
    /// Identical content already exists in the collection; nothing changed.
    SkippedExactDuplicate { existing_document_id: String },
    /// A near-identical document already exists; flagged, never merged.
    SkippedNearDuplicate {
        existing_document_id: String,
        distance: u32,
    },
}

/// One document to ingest into a collection.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub collection_id: String,
    pub source_type: String,
    /// Caller-chosen document id; derived from the source when absent.
    pub document_id: Option<String>,
    pub title: String,
    pub source_url: String,
    pub source_group: String,
    /// Full document text. Hashing and dedup run on this, normalized.
    pub text: String,
    /// Pre-segmented chunk texts. Empty means one chunk of the whole text.
    pub chunk_texts: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    /// RFC 3339 publication time; ingestion time when absent.
    pub published_at: Option<String>,
    /// Bypass duplicate detection and overwrite unconditionally.
    pub force: bool,
}

/// The document ingestion pipeline.
///
/// Stages:
/// 1. Normalization and fingerprinting
/// 2. Exact and near-duplicate detection within the collection
/// 3. Document upsert and total chunk replacement
/// 4. Embedding and vector indexing
/// 5. Knowledge lifecycle record
pub struct IngestPipeline<E: EmbeddingService> {
    store: Arc<VectorStore>,
    documents: DocumentRepository,
    collections: CollectionRepository,
    knowledge: KnowledgeRepository,
    embedder: E,
    config: DedupConfig,
}

impl<E: EmbeddingService> IngestPipeline<E> {
    pub fn new(
        db: Arc<Database>,
        store: Arc<VectorStore>,
        embedder: E,
        config: DedupConfig,
    ) -> Self {
        Self {
            store,
            documents: DocumentRepository::new(Arc::clone(&db)),
            collections: CollectionRepository::new(Arc::clone(&db)),
            knowledge: KnowledgeRepository::new(db),
            embedder,
            config,
        }
    }

    /// The vector store this pipeline writes into. Callers trigger
    /// `persist()` themselves once a batch is done.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    fn ensure_collection(&self, collection_id: &str) -> Result<(), LoreError> {
        if self.collections.get(collection_id)?.is_some() {
            return Ok(());
        }
        self.collections.upsert(&Collection {
            id: collection_id.to_string(),
            title: collection_id.to_string(),
            description: String::new(),
            kind: CollectionKind::Custom,
            created_at: String::new(),
            updated_at: String::new(),
        })
    }

    fn derive_document_id(&self, request: &IngestRequest, hash: &str) -> String {
        let source_type = if request.source_type.is_empty() {
            "doc"
        } else {
            &request.source_type
        };
        format!(
            "{}{}:{}:{}",
            CUSTOM_PREFIX,
            request.collection_id,
            source_type,
            &hash[..12]
        )
    }

    /// Ingest one document. Identical content is idempotent; near
    /// duplicates are reported and skipped, never silently merged.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, LoreError> {
        let text = normalize_text(&request.text);
        if text.is_empty() {
            return Err(LoreError::InvalidQuery(
                "Cannot ingest empty text".to_string(),
            ));
        }
        if request.collection_id.is_empty() {
            return Err(LoreError::InvalidQuery(
                "Ingest requires a collection id".to_string(),
            ));
        }
        self.ensure_collection(&request.collection_id)?;

        let hash = content_hash(&text);
        let simhash = simhash64(&text);

        if !request.force {
            if let Some(existing) = self.knowledge.get_by_hash(&request.collection_id, &hash)? {
                debug!(document = %existing.doc_id, "Exact duplicate by content hash");
                return Ok(IngestOutcome::SkippedExactDuplicate {
                    existing_document_id: existing.doc_id,
                });
            }
            if self.config.simhash_max_distance > 0 && !simhash.is_empty() {
                let candidates = self.knowledge.dedup_candidates(
                    &request.collection_id,
                    self.config.lookback_hours,
                    DEDUP_CANDIDATE_LIMIT,
                )?;
                for candidate in candidates {
                    let distance = hamming_distance(&candidate.simhash, &simhash);
                    if distance <= self.config.simhash_max_distance {
                        debug!(
                            document = %candidate.doc_id,
                            distance,
                            "Near duplicate by simhash"
                        );
                        return Ok(IngestOutcome::SkippedNearDuplicate {
                            existing_document_id: candidate.doc_id,
                            distance,
                        });
                    }
                }
            }
        }

        let document_id = request
            .document_id
            .clone()
            .unwrap_or_else(|| self.derive_document_id(&request, &hash));
        let existing = self.documents.get(&document_id)?;
        if let Some(ref doc) = existing {
            if !request.force && doc.raw_text == text {
                return Ok(IngestOutcome::SkippedExactDuplicate {
                    existing_document_id: document_id,
                });
            }
        }
        let replaced = existing.is_some();

        let now = Utc::now().to_rfc3339();
        let occurred = request.published_at.clone().unwrap_or_else(|| now.clone());
        self.documents.upsert(&Document {
            id: document_id.clone(),
            title: request.title.clone(),
            occurred_at: occurred.clone(),
            source_group: request.source_group.clone(),
            source_url: request.source_url.clone(),
            raw_text: text.clone(),
            created_at: String::new(),
        })?;

        // Chunk replacement is total: old chunks and their vectors go
        // before the new set lands.
        let evicted = self.documents.delete_chunks(&document_id)?;
        self.store.delete(&evicted)?;

        let chunk_texts: Vec<String> = if request.chunk_texts.is_empty() {
            vec![text.clone()]
        } else {
            request
                .chunk_texts
                .iter()
                .map(|t| normalize_text(t))
                .filter(|t| !t.is_empty())
                .collect()
        };
        let mut chunks = Vec::with_capacity(chunk_texts.len());
        for (i, chunk_text) in chunk_texts.iter().enumerate() {
            chunks.push(Chunk {
                chunk_id: format!("{}:{}", document_id, i),
                document_id: document_id.clone(),
                chunk_index: i as i64,
                speaker: String::new(),
                start_time: None,
                end_time: None,
                text: chunk_text.clone(),
                token_count: chunk_text.split_whitespace().count() as i64,
            });
        }
        self.documents.upsert_chunks(&chunks)?;
        for chunk in &chunks {
            let embedding = self.embedder.embed(&chunk.text).await?;
            self.store.upsert(&chunk.chunk_id, &embedding)?;
        }

        self.knowledge.upsert(&KnowledgeDocument {
            doc_id: document_id.clone(),
            collection_id: request.collection_id.clone(),
            source_type: request.source_type.clone(),
            source_url: request.source_url.clone(),
            source_group: request.source_group.clone(),
            title: request.title.clone(),
            content_hash: hash,
            simhash,
            published_at: occurred.clone(),
            retrieved_at: now,
            freshness_score: freshness_score(&occurred, self.config.freshness_half_life_hours),
            reliability_score: reliability_score(&request.source_url, &request.tags),
            stale: false,
            expired: false,
            stale_reason: String::new(),
            reviewed_at: String::new(),
            tags: request.tags.clone(),
            metadata: request.metadata.clone(),
            created_at: String::new(),
        })?;

        info!(
            document = %document_id,
            collection = %request.collection_id,
            chunks = chunks.len(),
            replaced,
            "Document ingested"
        );
        if replaced {
            Ok(IngestOutcome::Replaced { document_id })
        } else {
            Ok(IngestOutcome::Stored { document_id })
        }
    }
}
