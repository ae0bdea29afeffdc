//! Cross-collection query routing via synthetic meta documents.
//!
//! Each collection gets one `meta:{id}` document holding a fixed-format
//! statistics summary. The summaries are embedded like any other chunk,
//! so routing a question is a plain vector search restricted to the
//! `meta:` namespace: the nearest summaries name the collections most
//! likely to answer.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lore_core::config::RouterConfig;
use lore_core::error::LoreError;
use lore_core::types::{
    meta_collection_id, Chunk, CollectionKind, Document, DocumentFilter, DocumentKind,
    KnowledgeHealth, SourceStats, CUSTOM_PREFIX, META_PREFIX,
};
use lore_storage::{
    CollectionRepository, Database, DocumentRepository, KnowledgeRepository, MetaRepository,
};
use lore_vector::{DynEmbeddingService, EmbeddingService, VectorStore};

const REFRESH_STAMP_KEY: &str = "router_last_refresh";
const TOP_SOURCES_SHOWN: usize = 5;

/// How a routed collection narrows a follow-up search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteRule {
    /// Restrict to a namespace classifier.
    Kind(DocumentKind),
    /// Restrict to document ids with this prefix.
    Prefix(String),
}

impl RouteRule {
    /// Turn the rule into a query-engine filter.
    pub fn to_filter(&self) -> DocumentFilter {
        match self {
            RouteRule::Kind(kind) => DocumentFilter {
                kind: Some(*kind),
                ..Default::default()
            },
            RouteRule::Prefix(prefix) => DocumentFilter::for_prefix(prefix),
        }
    }
}

/// One routable collection: a built-in namespace or a custom row.
#[derive(Clone, Debug)]
struct CollectionDescriptor {
    id: String,
    title: String,
    description: String,
    kind: CollectionKind,
    rule: RouteRule,
    include_knowledge: bool,
}

/// A selected route, ascending by best meta-document distance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub collection_id: String,
    pub rule: RouteRule,
    pub distance: f64,
}

/// Outcome of a meta-document refresh pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
}

fn built_in_collections() -> Vec<CollectionDescriptor> {
    vec![
        CollectionDescriptor {
            id: "memory".to_string(),
            title: "Memory".to_string(),
            description: "Personal memory notes and preferences.".to_string(),
            kind: CollectionKind::BuiltIn,
            rule: RouteRule::Kind(DocumentKind::Memory),
            include_knowledge: false,
        },
        CollectionDescriptor {
            id: "feedback".to_string(),
            title: "Feedback".to_string(),
            description: "User feedback and corrections.".to_string(),
            kind: CollectionKind::BuiltIn,
            rule: RouteRule::Kind(DocumentKind::Feedback),
            include_knowledge: false,
        },
        CollectionDescriptor {
            id: "recordings".to_string(),
            title: "Recordings".to_string(),
            description: "Audio recordings and their transcripts.".to_string(),
            kind: CollectionKind::BuiltIn,
            rule: RouteRule::Kind(DocumentKind::Recording),
            include_knowledge: false,
        },
        CollectionDescriptor {
            id: "transcripts".to_string(),
            title: "Transcripts".to_string(),
            description: "Meeting transcripts and summaries.".to_string(),
            kind: CollectionKind::BuiltIn,
            rule: RouteRule::Kind(DocumentKind::Transcript),
            include_knowledge: false,
        },
    ]
}

fn reserved_ids() -> HashSet<&'static str> {
    ["memory", "feedback", "recordings", "transcripts", "meta"]
        .into_iter()
        .collect()
}

/// Resolve the routing rule for a collection id: built-in rules for the
/// reserved namespaces, id-prefix rules for everything else.
pub fn resolve_rule(collection_id: &str) -> RouteRule {
    for descriptor in built_in_collections() {
        if descriptor.id == collection_id {
            return descriptor.rule;
        }
    }
    RouteRule::Prefix(format!("{}{}:", CUSTOM_PREFIX, collection_id))
}

/// Builds, refreshes, and queries the meta-document routing layer.
pub struct CollectionRouter {
    store: Arc<VectorStore>,
    embedder: Box<dyn DynEmbeddingService>,
    documents: DocumentRepository,
    collections: CollectionRepository,
    knowledge: KnowledgeRepository,
    meta: MetaRepository,
    config: RouterConfig,
}

impl CollectionRouter {
    pub fn new(
        db: Arc<Database>,
        store: Arc<VectorStore>,
        embedder: impl EmbeddingService + 'static,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            embedder: Box::new(embedder),
            documents: DocumentRepository::new(Arc::clone(&db)),
            collections: CollectionRepository::new(Arc::clone(&db)),
            knowledge: KnowledgeRepository::new(Arc::clone(&db)),
            meta: MetaRepository::new(db),
            config,
        }
    }

    /// Built-in collections plus custom rows, reserved ids filtered out.
    fn routable_collections(&self) -> Result<Vec<CollectionDescriptor>, LoreError> {
        let mut descriptors = built_in_collections();
        let reserved = reserved_ids();
        for collection in self.collections.list(200, 0)? {
            if reserved.contains(collection.id.as_str()) {
                continue;
            }
            descriptors.push(CollectionDescriptor {
                rule: RouteRule::Prefix(format!("{}{}:", CUSTOM_PREFIX, collection.id)),
                id: collection.id,
                title: collection.title,
                description: collection.description,
                kind: CollectionKind::Custom,
                include_knowledge: true,
            });
        }
        Ok(descriptors)
    }

    /// Render the fixed-format statistics summary for one collection.
    fn render_meta_text(
        &self,
        descriptor: &CollectionDescriptor,
        doc_count: u64,
        latest: &str,
        health: Option<&KnowledgeHealth>,
        sources: &[SourceStats],
        connector_sync: &str,
    ) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Collection: {}", if descriptor.title.is_empty() {
            &descriptor.id
        } else {
            &descriptor.title
        }));
        lines.push(format!("ID: {}", descriptor.id));
        lines.push(format!("Kind: {}", descriptor.kind.as_str()));
        if !descriptor.description.is_empty() {
            lines.push(format!("Description: {}", descriptor.description));
        }
        match &descriptor.rule {
            RouteRule::Kind(kind) => lines.push(format!("Route: kind={:?}", kind)),
            RouteRule::Prefix(prefix) => lines.push(format!("Route: id_prefix={}", prefix)),
        }
        lines.push(format!("Document count: {}", doc_count));
        if !latest.is_empty() {
            lines.push(format!("Latest activity: {}", latest));
        }
        if let Some(health) = health {
            if health.total > 0 {
                lines.push(format!(
                    "Knowledge docs: {} (stale {}, expired {})",
                    health.total, health.stale, health.expired
                ));
                if !health.last_reviewed_at.is_empty() {
                    lines.push(format!("Last reviewed: {}", health.last_reviewed_at));
                }
            }
        }
        if !connector_sync.is_empty() {
            lines.push(format!("Last connector sync: {}", connector_sync));
        }
        if !sources.is_empty() {
            lines.push("Top sources:".to_string());
            for stat in sources.iter().take(TOP_SOURCES_SHOWN) {
                let last_seen = if stat.last_seen.is_empty() {
                    String::new()
                } else {
                    format!(", last {}", stat.last_seen)
                };
                lines.push(format!(
                    "- {} ({} docs{})",
                    stat.source_key, stat.doc_count, last_seen
                ));
            }
        }
        lines.join("\n")
    }

    /// Write or refresh one meta document. Returns `false` when the
    /// rendered text is byte-identical to the stored one and nothing is
    /// touched (no re-embed, no vector write).
    async fn upsert_meta_document(
        &self,
        descriptor: &CollectionDescriptor,
        content: &str,
    ) -> Result<bool, LoreError> {
        let meta_id = format!("{}{}", META_PREFIX, descriptor.id);
        if let Some(existing) = self.documents.get(&meta_id)? {
            if existing.raw_text == content {
                return Ok(false);
            }
        }

        let now = Utc::now().to_rfc3339();
        self.documents.upsert(&Document {
            id: meta_id.clone(),
            title: format!("Collection summary: {}", descriptor.title),
            occurred_at: now,
            source_group: "router_meta".to_string(),
            source_url: String::new(),
            raw_text: content.to_string(),
            created_at: String::new(),
        })?;

        // Summaries are short enough to live in a single chunk.
        let evicted = self.documents.delete_chunks(&meta_id)?;
        self.store.delete(&evicted)?;
        let chunk_id = format!("{}:0", meta_id);
        self.documents.upsert_chunks(&[Chunk {
            chunk_id: chunk_id.clone(),
            document_id: meta_id.clone(),
            chunk_index: 0,
            speaker: String::new(),
            start_time: None,
            end_time: None,
            text: content.to_string(),
            token_count: content.split_whitespace().count() as i64,
        }])?;
        let embedding = self.embedder.embed_boxed(content).await?;
        self.store.upsert(&chunk_id, &embedding)?;
        debug!(collection = %descriptor.id, "Refreshed meta document");
        Ok(true)
    }

    /// Re-render every collection summary, re-embedding only the changed
    /// ones, then persist the index once if anything moved.
    pub async fn refresh_meta_documents(&self) -> Result<RefreshSummary, LoreError> {
        let descriptors = self.routable_collections()?;
        let mut summary = RefreshSummary {
            total: descriptors.len(),
            ..Default::default()
        };

        for descriptor in &descriptors {
            let (doc_count, latest) = self.documents.stats(&descriptor.rule.to_filter())?;
            let health = if descriptor.include_knowledge {
                Some(self.knowledge.health_summary(&descriptor.id)?)
            } else {
                None
            };
            let sources = if descriptor.include_knowledge {
                self.knowledge.source_stats(&descriptor.id)?
            } else {
                Vec::new()
            };
            let connector_sync = self
                .meta
                .get(&format!("connector_sync:{}", descriptor.id))?
                .unwrap_or_default();

            let content = self.render_meta_text(
                descriptor,
                doc_count,
                &latest,
                health.as_ref(),
                &sources,
                &connector_sync,
            );
            if self.upsert_meta_document(descriptor, &content).await? {
                summary.updated += 1;
            } else {
                summary.skipped += 1;
            }
        }

        if summary.updated > 0 {
            self.store.persist()?;
        }
        self.meta.set(REFRESH_STAMP_KEY, &Utc::now().to_rfc3339())?;
        info!(
            total = summary.total,
            updated = summary.updated,
            skipped = summary.skipped,
            "Meta document refresh complete"
        );
        Ok(summary)
    }

    /// Route a question to the collections most likely to answer it.
    ///
    /// Searches the meta namespace with a widened candidate pool, keeps
    /// the first (nearest) hit per collection, and returns up to `top_k`
    /// distinct routes ordered by non-decreasing best distance.
    pub async fn route(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RouteTarget>, LoreError> {
        let query = question.trim();
        if query.is_empty() {
            return Err(LoreError::InvalidQuery(
                "Routing question must not be empty".to_string(),
            ));
        }
        let k = top_k.unwrap_or(self.config.top_k).max(1);

        let embedding = self.embedder.embed_boxed(query).await?;
        let search_limit = (k * 5).max(k).max(10);
        let hits = self.store.search(&embedding, search_limit)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let rows = self
            .documents
            .chunks_by_ids(&ids, &DocumentFilter::for_prefix(META_PREFIX))?;
        let row_by_id: std::collections::HashMap<&str, &str> = rows
            .iter()
            .map(|row| (row.chunk_id.as_str(), row.document_id.as_str()))
            .collect();

        // Hits arrive distance-ordered; first occurrence per collection wins.
        let mut seen = HashSet::new();
        let mut routes = Vec::new();
        for hit in &hits {
            let Some(document_id) = row_by_id.get(hit.chunk_id.as_str()) else {
                continue;
            };
            let Some(collection_id) = meta_collection_id(document_id) else {
                continue;
            };
            if !seen.insert(collection_id.to_string()) {
                continue;
            }
            routes.push(RouteTarget {
                collection_id: collection_id.to_string(),
                rule: resolve_rule(collection_id),
                distance: hit.distance,
            });
            if routes.len() == k {
                break;
            }
        }
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::config::{BackendPreference, VectorConfig};
    use lore_core::types::Collection;
    use lore_vector::MockEmbedding;
    use tempfile::TempDir;

    struct Fixture {
        db: Arc<Database>,
        store: Arc<VectorStore>,
        router: CollectionRouter,
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
        let router = CollectionRouter::new(
            Arc::clone(&db),
            Arc::clone(&store),
            MockEmbedding::new(),
            RouterConfig::default(),
        );
        Fixture { db, store, router, _dir: dir }
    }

    fn add_custom_collection(fixture: &Fixture, id: &str, title: &str, description: &str) {
        CollectionRepository::new(Arc::clone(&fixture.db))
            .upsert(&Collection {
                id: id.to_string(),
                title: title.to_string(),
                description: description.to_string(),
                kind: CollectionKind::Custom,
                created_at: String::new(),
                updated_at: String::new(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_creates_meta_documents() {
        let fixture = make_fixture();
        let summary = fixture.router.refresh_meta_documents().await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.updated, 4);

        let repo = DocumentRepository::new(Arc::clone(&fixture.db));
        let doc = repo.get("meta:memory").unwrap().unwrap();
        assert!(doc.raw_text.contains("ID: memory"));
        assert!(doc.raw_text.contains("Document count: 0"));
        assert_eq!(repo.count_chunks("meta:memory").unwrap(), 1);
        assert_eq!(fixture.store.len().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_refresh_skips_unchanged_summaries() {
        let fixture = make_fixture();
        fixture.router.refresh_meta_documents().await.unwrap();
        let second = fixture.router.refresh_meta_documents().await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 4);
        // No duplicate vectors either.
        assert_eq!(fixture.store.len().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_custom_collections_are_routable() {
        let fixture = make_fixture();
        add_custom_collection(&fixture, "finance", "Finance", "Market notes and filings");
        let summary = fixture.router.refresh_meta_documents().await.unwrap();
        assert_eq!(summary.total, 5);

        let repo = DocumentRepository::new(Arc::clone(&fixture.db));
        let doc = repo.get("meta:finance").unwrap().unwrap();
        assert!(doc.raw_text.contains("Route: id_prefix=col:finance:"));
    }

    #[tokio::test]
    async fn test_route_is_deterministic_and_distinct() {
        let fixture = make_fixture();
        add_custom_collection(&fixture, "finance", "Finance", "Market notes");
        add_custom_collection(&fixture, "macro", "Macro", "Macro research");
        fixture.router.refresh_meta_documents().await.unwrap();

        let first = fixture.router.route("market filings", Some(3)).await.unwrap();
        let second = fixture.router.route("market filings", Some(3)).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(first.len() <= 3);

        // Distinct collections, non-decreasing distance.
        let ids: HashSet<_> = first.iter().map(|r| r.collection_id.clone()).collect();
        assert_eq!(ids.len(), first.len());
        for pair in first.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_route_nearest_summary_wins() {
        let fixture = make_fixture();
        add_custom_collection(&fixture, "finance", "Finance", "Market notes");
        fixture.router.refresh_meta_documents().await.unwrap();

        // Querying with a summary's exact text puts that collection first.
        let repo = DocumentRepository::new(Arc::clone(&fixture.db));
        let finance_text = repo.get("meta:finance").unwrap().unwrap().raw_text;
        let routes = fixture.router.route(&finance_text, Some(2)).await.unwrap();
        assert_eq!(routes[0].collection_id, "finance");
        assert!(routes[0].distance < 1e-5);
        assert_eq!(
            routes[0].rule,
            RouteRule::Prefix("col:finance:".to_string())
        );
    }

    #[tokio::test]
    async fn test_route_rejects_empty_question() {
        let fixture = make_fixture();
        assert!(matches!(
            fixture.router.route("   ", None).await,
            Err(LoreError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_route_empty_store_returns_no_routes() {
        let fixture = make_fixture();
        let routes = fixture.router.route("anything", None).await.unwrap();
        assert!(routes.is_empty());
    }

    #[test]
    fn test_resolve_rule_builtin_vs_custom() {
        assert_eq!(resolve_rule("memory"), RouteRule::Kind(DocumentKind::Memory));
        assert_eq!(
            resolve_rule("finance"),
            RouteRule::Prefix("col:finance:".to_string())
        );
    }
}
