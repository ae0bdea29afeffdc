use serde::{Deserialize, Serialize};

// =============================================================================
// Id-prefix conventions
// =============================================================================

/// Reserved id prefix for synthetic per-collection routing documents.
pub const META_PREFIX: &str = "meta:";

/// Id prefix for documents belonging to a custom collection:
/// `col:{collection_id}:{rest}`.
pub const CUSTOM_PREFIX: &str = "col:";

/// Classifier for the namespace a document id belongs to.
///
/// Derived from the id-prefix convention: callers choose ids like
/// `memory:42` or `recording:2024-01-03`. Anything that matches no known
/// prefix is a plain transcript document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Memory,
    Feedback,
    Recording,
    /// Custom-collection document (`col:{collection}:` prefix).
    Custom,
    /// Synthetic routing document (`meta:` prefix).
    Meta,
    /// Residual namespace: meeting transcripts and anything unprefixed.
    Transcript,
}

impl DocumentKind {
    /// Classify a document id by its prefix.
    pub fn of(document_id: &str) -> Self {
        if document_id.starts_with("memory:") {
            DocumentKind::Memory
        } else if document_id.starts_with("feedback:") {
            DocumentKind::Feedback
        } else if document_id.starts_with("recording:") {
            DocumentKind::Recording
        } else if document_id.starts_with(META_PREFIX) {
            DocumentKind::Meta
        } else if document_id.starts_with(CUSTOM_PREFIX) {
            DocumentKind::Custom
        } else {
            DocumentKind::Transcript
        }
    }
}

/// Extract the collection id from a meta-document id (`meta:{collection}`).
pub fn meta_collection_id(document_id: &str) -> Option<&str> {
    let rest = document_id.strip_prefix(META_PREFIX)?;
    let id = rest.split(':').next().unwrap_or("");
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

// =============================================================================
// Documents and chunks
// =============================================================================

/// The top-level retrievable unit: a meeting transcript, memory note,
/// feedback record, crawled knowledge page, or similar free-text document.
///
/// Ids are opaque caller-chosen strings; by convention they encode a
/// namespace prefix (`memory:`, `recording:`, `col:{collection}:`, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// When the underlying content occurred (RFC 3339).
    pub occurred_at: String,
    pub source_group: String,
    pub source_url: String,
    pub raw_text: String,
    pub created_at: String,
}

/// A sub-span of a document's text: the unit actually embedded and searched.
///
/// By convention `chunk_id` is `{document_id}:{index}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub speaker: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub text: String,
    pub token_count: i64,
}

/// A chunk joined with its parent document's metadata, as returned by the
/// query engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub speaker: String,
    pub text: String,
    pub token_count: i64,
    pub document_title: String,
    pub occurred_at: String,
    pub source_url: String,
}

// =============================================================================
// Collections
// =============================================================================

/// Whether a collection ships with the store or was created by a caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    BuiltIn,
    #[default]
    Custom,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::BuiltIn => "built-in",
            CollectionKind::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "built-in" => CollectionKind::BuiltIn,
            _ => CollectionKind::Custom,
        }
    }
}

/// A named, filterable namespace of documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub title: String,
    pub description: String,
    pub kind: CollectionKind,
    pub created_at: String,
    pub updated_at: String,
}

// =============================================================================
// Knowledge documents
// =============================================================================

/// A collection-scoped dedup/staleness record for an ingested source.
///
/// Used by the ingestion pipeline to decide whether re-fetching a URL or
/// source is necessary at all.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Matches the owning document's id.
    pub doc_id: String,
    pub collection_id: String,
    pub source_type: String,
    pub source_url: String,
    pub source_group: String,
    pub title: String,
    /// SHA-256 hex of the normalized content (exact-duplicate detection).
    pub content_hash: String,
    /// 64-bit simhash hex (near-duplicate detection).
    pub simhash: String,
    pub published_at: String,
    pub retrieved_at: String,
    /// Exponentially decayed age score in (0, 1].
    pub freshness_score: f64,
    /// Source-reputation score in [0, 1].
    pub reliability_score: f64,
    pub stale: bool,
    pub expired: bool,
    pub stale_reason: String,
    pub reviewed_at: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Aggregate health of a collection's knowledge documents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHealth {
    pub total: u64,
    pub stale: u64,
    pub expired: u64,
    pub last_reviewed_at: String,
}

/// On-demand rollup for one source within a collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Source group when set, otherwise the source url.
    pub source_key: String,
    pub doc_count: u64,
    pub stale_count: u64,
    pub expired_count: u64,
    pub avg_freshness: f64,
    pub first_seen: String,
    pub last_seen: String,
}

// =============================================================================
// Filters
// =============================================================================

/// Metadata filters applied by the query engine after vector search.
///
/// Filters are never pushed into the vector backend; the engine oversamples
/// and applies these against the relational join.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// Restrict to a single document.
    pub document_id: Option<String>,
    /// Restrict to document ids with this prefix.
    pub id_prefix: Option<String>,
    /// Restrict by namespace classifier.
    pub kind: Option<DocumentKind>,
    /// Case-sensitive substring match against the document title.
    pub title_contains: Option<String>,
    /// Inclusive lower bound on `occurred_at` (RFC 3339 compares lexically).
    pub date_from: Option<String>,
    /// Inclusive upper bound on `occurred_at`.
    pub date_to: Option<String>,
}

impl DocumentFilter {
    /// Filter restricted to one document id.
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Default::default()
        }
    }

    /// Filter restricted to an id prefix.
    pub fn for_prefix(prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_kind_prefixes() {
        assert_eq!(DocumentKind::of("memory:42"), DocumentKind::Memory);
        assert_eq!(DocumentKind::of("feedback:abc"), DocumentKind::Feedback);
        assert_eq!(DocumentKind::of("recording:2024"), DocumentKind::Recording);
        assert_eq!(DocumentKind::of("col:finance:doc1"), DocumentKind::Custom);
        assert_eq!(DocumentKind::of("meta:finance"), DocumentKind::Meta);
        assert_eq!(DocumentKind::of("ff-meeting-1"), DocumentKind::Transcript);
    }

    #[test]
    fn test_meta_collection_id() {
        assert_eq!(meta_collection_id("meta:finance"), Some("finance"));
        assert_eq!(meta_collection_id("meta:finance:0"), Some("finance"));
        assert_eq!(meta_collection_id("memory:1"), None);
        assert_eq!(meta_collection_id("meta:"), None);
    }

    #[test]
    fn test_collection_kind_round_trip() {
        assert_eq!(
            CollectionKind::parse(CollectionKind::BuiltIn.as_str()),
            CollectionKind::BuiltIn
        );
        assert_eq!(CollectionKind::parse("anything"), CollectionKind::Custom);
    }

    #[test]
    fn test_chunk_serialization() {
        let chunk = Chunk {
            chunk_id: "doc:1:0".to_string(),
            document_id: "doc:1".to_string(),
            chunk_index: 0,
            speaker: "alice".to_string(),
            start_time: Some(0.0),
            end_time: Some(12.5),
            text: "hello".to_string(),
            token_count: 1,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(chunk, back);
    }
}
