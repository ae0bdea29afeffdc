//! Repository implementations for SQLite-backed persistence.
//!
//! Provides DocumentRepository (documents + chunks + filtered joins),
//! CollectionRepository, SourceRepository, and MetaRepository, all
//! operating on the shared Database wrapper with raw SQL.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;

use lore_core::error::LoreError;
use lore_core::types::{
    Chunk, ChunkRow, Collection, CollectionKind, Document, DocumentFilter, DocumentKind,
    CUSTOM_PREFIX, META_PREFIX,
};

use crate::db::Database;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Append the WHERE fragments and parameters for a [`DocumentFilter`].
///
/// `d` must alias the documents table and `c` the chunks table in the
/// surrounding query.
fn push_filter_clauses(
    filter: &DocumentFilter,
    where_clauses: &mut Vec<String>,
    params: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
) {
    if let Some(ref id) = filter.document_id {
        where_clauses.push("c.document_id = ?".to_string());
        params.push(Box::new(id.clone()));
    }
    if let Some(ref prefix) = filter.id_prefix {
        where_clauses.push("c.document_id LIKE ? ESCAPE '\\'".to_string());
        params.push(Box::new(format!("{}%", escape_like(prefix))));
    }
    if let Some(kind) = filter.kind {
        match kind {
            DocumentKind::Memory => where_clauses.push("d.id LIKE 'memory:%'".to_string()),
            DocumentKind::Feedback => where_clauses.push("d.id LIKE 'feedback:%'".to_string()),
            DocumentKind::Recording => where_clauses.push("d.id LIKE 'recording:%'".to_string()),
            DocumentKind::Custom => {
                where_clauses.push(format!("d.id LIKE '{}%'", CUSTOM_PREFIX));
            }
            DocumentKind::Meta => {
                where_clauses.push(format!("d.id LIKE '{}%'", META_PREFIX));
            }
            DocumentKind::Transcript => {
                // Residual namespace: everything not claimed by a prefix.
                where_clauses.push("d.id NOT LIKE 'memory:%'".to_string());
                where_clauses.push("d.id NOT LIKE 'feedback:%'".to_string());
                where_clauses.push("d.id NOT LIKE 'recording:%'".to_string());
                where_clauses.push(format!("d.id NOT LIKE '{}%'", CUSTOM_PREFIX));
                where_clauses.push(format!("d.id NOT LIKE '{}%'", META_PREFIX));
            }
        }
    }
    if let Some(ref term) = filter.title_contains {
        where_clauses.push("d.title LIKE ? ESCAPE '\\'".to_string());
        params.push(Box::new(format!("%{}%", escape_like(term))));
    }
    if let Some(ref from) = filter.date_from {
        where_clauses.push("d.occurred_at >= ?".to_string());
        params.push(Box::new(from.clone()));
    }
    if let Some(ref to) = filter.date_to {
        where_clauses.push("d.occurred_at <= ?".to_string());
        params.push(Box::new(to.clone()));
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

// =============================================================================
// Documents and chunks
// =============================================================================

/// Repository for documents and their chunks.
pub struct DocumentRepository {
    db: Arc<Database>,
}

impl DocumentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a document by id.
    ///
    /// `created_at` is preserved on conflict; everything else is replaced.
    pub fn upsert(&self, document: &Document) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            let created = if document.created_at.is_empty() {
                now_iso()
            } else {
                document.created_at.clone()
            };
            conn.execute(
                "INSERT INTO documents (id, title, occurred_at, source_group, source_url, raw_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     occurred_at = excluded.occurred_at,
                     source_group = excluded.source_group,
                     source_url = excluded.source_url,
                     raw_text = excluded.raw_text",
                rusqlite::params![
                    document.id,
                    document.title,
                    document.occurred_at,
                    document.source_group,
                    document.source_url,
                    document.raw_text,
                    created,
                ],
            )
            .map_err(|e| LoreError::Storage(format!("Failed to upsert document: {}", e)))?;
            Ok(())
        })
    }

    /// Fetch a document by id.
    pub fn get(&self, document_id: &str) -> Result<Option<Document>, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, occurred_at, source_group, source_url, raw_text, created_at
                 FROM documents WHERE id = ?1",
                rusqlite::params![document_id],
                |row| {
                    Ok(Document {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        occurred_at: row.get(2)?,
                        source_group: row.get(3)?,
                        source_url: row.get(4)?,
                        raw_text: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(|e| LoreError::Storage(format!("Failed to load document: {}", e)))
        })
    }

    /// List documents matching a filter, newest occurrence first.
    pub fn list(
        &self,
        filter: &DocumentFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Document>, LoreError> {
        self.db.with_conn(|conn| {
            let mut where_clauses = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            push_filter_clauses(filter, &mut where_clauses, &mut params);
            // No chunk side in this query; prefix filters target d.id directly.
            let where_sql = if where_clauses.is_empty() {
                String::new()
            } else {
                format!(
                    "WHERE {}",
                    where_clauses.join(" AND ").replace("c.document_id", "d.id")
                )
            };
            let sql = format!(
                "SELECT d.id, d.title, d.occurred_at, d.source_group, d.source_url, d.raw_text, d.created_at
                 FROM documents d
                 {}
                 ORDER BY d.occurred_at DESC
                 LIMIT ? OFFSET ?",
                where_sql
            );
            params.push(Box::new(limit as i64));
            params.push(Box::new(offset as i64));
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LoreError::Storage(format!("List documents prepare: {}", e)))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok(Document {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        occurred_at: row.get(2)?,
                        source_group: row.get(3)?,
                        source_url: row.get(4)?,
                        raw_text: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })
                .map_err(|e| LoreError::Storage(format!("List documents: {}", e)))?;

            let mut documents = Vec::new();
            for row in rows {
                documents.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(documents)
        })
    }

    /// Count documents per namespace classifier.
    pub fn count_by_kind(&self, kind: DocumentKind) -> Result<u64, LoreError> {
        let filter = DocumentFilter {
            kind: Some(kind),
            ..Default::default()
        };
        self.db.with_conn(|conn| {
            let mut where_clauses = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            push_filter_clauses(&filter, &mut where_clauses, &mut params);
            let sql = format!(
                "SELECT COUNT(*) FROM documents d WHERE {}",
                where_clauses.join(" AND ")
            );
            let count: i64 = conn
                .query_row(&sql, [], |row| row.get(0))
                .map_err(|e| LoreError::Storage(format!("Count documents: {}", e)))?;
            Ok(count as u64)
        })
    }

    /// Document count and latest occurrence for an id prefix (or everything
    /// in a namespace), used by the router's statistics summaries.
    pub fn stats(&self, filter: &DocumentFilter) -> Result<(u64, String), LoreError> {
        self.db.with_conn(|conn| {
            let mut where_clauses = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            push_filter_clauses(filter, &mut where_clauses, &mut params);
            // `c` aliases documents here; prefix filters target c.document_id.
            let where_sql = if where_clauses.is_empty() {
                String::new()
            } else {
                format!(
                    "WHERE {}",
                    where_clauses
                        .join(" AND ")
                        .replace("c.document_id", "d.id")
                )
            };
            let sql = format!(
                "SELECT COUNT(*), COALESCE(MAX(d.occurred_at), '') FROM documents d {}",
                where_sql
            );
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let (count, latest): (i64, String) = conn
                .query_row(&sql, param_refs.as_slice(), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(|e| LoreError::Storage(format!("Document stats: {}", e)))?;
            Ok((count as u64, latest))
        })
    }

    /// Insert or update a batch of chunks in a single transaction.
    pub fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<usize, LoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            let now = now_iso();
            conn.execute_batch("BEGIN")
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let result: Result<(), LoreError> = (|| {
                let mut stmt = conn
                    .prepare(
                        "INSERT INTO chunks (chunk_id, document_id, chunk_index, speaker,
                                             start_time, end_time, text, token_count, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(chunk_id) DO UPDATE SET
                             document_id = excluded.document_id,
                             chunk_index = excluded.chunk_index,
                             speaker = excluded.speaker,
                             start_time = excluded.start_time,
                             end_time = excluded.end_time,
                             text = excluded.text,
                             token_count = excluded.token_count",
                    )
                    .map_err(|e| LoreError::Storage(format!("Upsert chunks prepare: {}", e)))?;
                for chunk in chunks {
                    stmt.execute(rusqlite::params![
                        chunk.chunk_id,
                        chunk.document_id,
                        chunk.chunk_index,
                        chunk.speaker,
                        chunk.start_time,
                        chunk.end_time,
                        chunk.text,
                        chunk.token_count,
                        now,
                    ])
                    .map_err(|e| LoreError::Storage(format!("Upsert chunk: {}", e)))?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => {
                    conn.execute_batch("COMMIT")
                        .map_err(|e| LoreError::Storage(e.to_string()))?;
                    Ok(chunks.len())
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })
    }

    /// Delete every chunk belonging to a document, returning the deleted
    /// chunk ids so the caller can evict them from the active vector
    /// backend.
    pub fn delete_chunks(&self, document_id: &str) -> Result<Vec<String>, LoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT chunk_id FROM chunks WHERE document_id = ?1")
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let ids: Vec<String> = stmt
                .query_map(rusqlite::params![document_id], |row| row.get(0))
                .map_err(|e| LoreError::Storage(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| LoreError::Storage(e.to_string()))?;

            conn.execute(
                "DELETE FROM chunks WHERE document_id = ?1",
                rusqlite::params![document_id],
            )
            .map_err(|e| LoreError::Storage(format!("Delete chunks: {}", e)))?;
            Ok(ids)
        })
    }

    /// Delete a document and its dependent rows (chunks, knowledge record),
    /// returning the deleted chunk ids for vector-backend eviction.
    pub fn delete(&self, document_id: &str) -> Result<Vec<String>, LoreError> {
        let chunk_ids = self.delete_chunks(document_id)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM knowledge_docs WHERE doc_id = ?1",
                rusqlite::params![document_id],
            )
            .map_err(|e| LoreError::Storage(e.to_string()))?;
            conn.execute(
                "DELETE FROM documents WHERE id = ?1",
                rusqlite::params![document_id],
            )
            .map_err(|e| LoreError::Storage(format!("Delete document: {}", e)))?;
            Ok(())
        })?;
        Ok(chunk_ids)
    }

    /// Delete every document in a source group. Returns all evicted chunk ids.
    pub fn delete_by_source_group(&self, source_group: &str) -> Result<Vec<String>, LoreError> {
        let ids: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM documents WHERE source_group = ?1")
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let ids: Vec<String> = stmt
                .query_map(rusqlite::params![source_group], |row| row.get(0))
                .map_err(|e| LoreError::Storage(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            Ok(ids)
        })?;
        let mut evicted = Vec::new();
        for id in ids {
            evicted.extend(self.delete(&id)?);
        }
        Ok(evicted)
    }

    /// Join a list of chunk ids against chunk + document metadata, applying
    /// a post-filter. Row order is unspecified; the query engine re-orders
    /// by vector distance.
    pub fn chunks_by_ids(
        &self,
        chunk_ids: &[String],
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkRow>, LoreError> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let placeholders = vec!["?"; chunk_ids.len()].join(",");
            let mut where_clauses = vec![format!("c.chunk_id IN ({})", placeholders)];
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = chunk_ids
                .iter()
                .map(|id| Box::new(id.clone()) as Box<dyn rusqlite::types::ToSql>)
                .collect();
            push_filter_clauses(filter, &mut where_clauses, &mut params);

            let sql = format!(
                "SELECT c.chunk_id, c.document_id, c.chunk_index, c.speaker, c.text, c.token_count,
                        d.title, d.occurred_at, d.source_url
                 FROM chunks c
                 JOIN documents d ON d.id = c.document_id
                 WHERE {}",
                where_clauses.join(" AND ")
            );
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LoreError::Storage(format!("Chunk join prepare: {}", e)))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok(ChunkRow {
                        chunk_id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_index: row.get(2)?,
                        speaker: row.get(3)?,
                        text: row.get(4)?,
                        token_count: row.get(5)?,
                        document_title: row.get(6)?,
                        occurred_at: row.get(7)?,
                        source_url: row.get(8)?,
                    })
                })
                .map_err(|e| LoreError::Storage(format!("Chunk join: {}", e)))?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(results)
        })
    }

    /// Count chunks belonging to one document.
    pub fn count_chunks(&self, document_id: &str) -> Result<u64, LoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
                    rusqlite::params![document_id],
                    |row| row.get(0),
                )
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Collections
// =============================================================================

/// Repository for the per-collection registry.
pub struct CollectionRepository {
    db: Arc<Database>,
}

impl CollectionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn upsert(&self, collection: &Collection) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            let now = now_iso();
            conn.execute(
                "INSERT INTO collections (id, title, description, kind, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     description = excluded.description,
                     kind = excluded.kind,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    collection.id,
                    collection.title,
                    collection.description,
                    collection.kind.as_str(),
                    now,
                    now,
                ],
            )
            .map_err(|e| LoreError::Storage(format!("Upsert collection: {}", e)))?;
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Collection>, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, description, kind, created_at, updated_at
                 FROM collections WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(Collection {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        kind: CollectionKind::parse(&row.get::<_, String>(3)?),
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| LoreError::Storage(format!("Load collection: {}", e)))
        })
    }

    pub fn list(&self, limit: u64, offset: u64) -> Result<Vec<Collection>, LoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, description, kind, created_at, updated_at
                     FROM collections
                     ORDER BY created_at DESC
                     LIMIT ?1 OFFSET ?2",
                )
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
                    Ok(Collection {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        kind: CollectionKind::parse(&row.get::<_, String>(3)?),
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                })
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let mut collections = Vec::new();
            for row in rows {
                collections.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(collections)
        })
    }

    /// Delete a collection row. Does not cascade to its documents.
    pub fn delete(&self, id: &str) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM collections WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| LoreError::Storage(format!("Delete collection: {}", e)))?;
            Ok(())
        })
    }
}

// =============================================================================
// Sources registry
// =============================================================================

/// A crawl-source row consulted by the ingestion pipeline before fetching.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceRow {
    pub id: i64,
    pub collection_id: String,
    pub url: String,
    pub tags: Vec<String>,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_crawled_at: String,
    pub last_status: String,
    pub last_error: String,
}

/// Repository for the per-collection source registry.
pub struct SourceRepository {
    db: Arc<Database>,
}

impl SourceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn upsert(
        &self,
        collection_id: &str,
        url: &str,
        tags: &[String],
        enabled: bool,
    ) -> Result<SourceRow, LoreError> {
        let tags_json = serde_json::to_string(tags)?;
        self.db.with_conn(|conn| {
            let now = now_iso();
            conn.execute(
                "INSERT INTO sources (collection_id, url, tags_json, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(collection_id, url) DO UPDATE SET
                     tags_json = excluded.tags_json,
                     enabled = excluded.enabled,
                     updated_at = excluded.updated_at",
                rusqlite::params![collection_id, url, tags_json, enabled as i64, now],
            )
            .map_err(|e| LoreError::Storage(format!("Upsert source: {}", e)))?;
            Ok(())
        })?;
        self.get_by_url(collection_id, url)?
            .ok_or_else(|| LoreError::Storage("Source vanished after upsert".to_string()))
    }

    pub fn get_by_url(&self, collection_id: &str, url: &str) -> Result<Option<SourceRow>, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, collection_id, url, tags_json, enabled, created_at, updated_at,
                        COALESCE(last_crawled_at, ''), COALESCE(last_status, ''), COALESCE(last_error, '')
                 FROM sources WHERE collection_id = ?1 AND url = ?2",
                rusqlite::params![collection_id, url],
                map_source_row,
            )
            .optional()
            .map_err(|e| LoreError::Storage(format!("Load source: {}", e)))
        })
    }

    pub fn list(
        &self,
        collection_id: &str,
        include_disabled: bool,
        limit: u64,
    ) -> Result<Vec<SourceRow>, LoreError> {
        self.db.with_conn(|conn| {
            let sql = if include_disabled {
                "SELECT id, collection_id, url, tags_json, enabled, created_at, updated_at,
                        COALESCE(last_crawled_at, ''), COALESCE(last_status, ''), COALESCE(last_error, '')
                 FROM sources WHERE collection_id = ?1
                 ORDER BY created_at DESC LIMIT ?2"
            } else {
                "SELECT id, collection_id, url, tags_json, enabled, created_at, updated_at,
                        COALESCE(last_crawled_at, ''), COALESCE(last_status, ''), COALESCE(last_error, '')
                 FROM sources WHERE collection_id = ?1 AND enabled = 1
                 ORDER BY created_at DESC LIMIT ?2"
            };
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![collection_id, limit as i64], map_source_row)
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let mut sources = Vec::new();
            for row in rows {
                sources.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(sources)
        })
    }

    /// Record the outcome of a crawl attempt.
    pub fn mark_crawl(&self, id: i64, status: &str, error: &str) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            let now = now_iso();
            conn.execute(
                "UPDATE sources
                 SET last_crawled_at = ?1, last_status = ?2, last_error = ?3, updated_at = ?1
                 WHERE id = ?4",
                rusqlite::params![now, status, error, id],
            )
            .map_err(|e| LoreError::Storage(format!("Mark crawl: {}", e)))?;
            Ok(())
        })
    }

    pub fn delete(&self, id: i64) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM sources WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| LoreError::Storage(format!("Delete source: {}", e)))?;
            Ok(())
        })
    }
}

fn map_source_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceRow> {
    let tags_json: String = row.get::<_, Option<String>>(3)?.unwrap_or_default();
    Ok(SourceRow {
        id: row.get(0)?,
        collection_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        url: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        enabled: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
        created_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        updated_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        last_crawled_at: row.get(7)?,
        last_status: row.get(8)?,
        last_error: row.get(9)?,
    })
}

// =============================================================================
// Store metadata
// =============================================================================

/// Key-value metadata for the store itself (embedding dimension, router
/// refresh stamps, connector sync stamps).
pub struct MetaRepository {
    db: Arc<Database>,
}

impl MetaRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LoreError::Storage(format!("Load meta key: {}", e)))
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )
            .map_err(|e| LoreError::Storage(format!("Set meta key: {}", e)))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn make_document(id: &str, title: &str) -> Document {
        Document {
            id: id.to_string(),
            title: title.to_string(),
            occurred_at: "2024-03-01T10:00:00Z".to_string(),
            source_group: "".to_string(),
            source_url: "".to_string(),
            raw_text: "raw".to_string(),
            created_at: "".to_string(),
        }
    }

    fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{}:{}", document_id, index),
            document_id: document_id.to_string(),
            chunk_index: index,
            speaker: "".to_string(),
            start_time: None,
            end_time: None,
            text: text.to_string(),
            token_count: text.split_whitespace().count() as i64,
        }
    }

    #[test]
    fn test_document_upsert_and_get() {
        let repo = DocumentRepository::new(make_db());
        repo.upsert(&make_document("rec:1", "Standup")).unwrap();

        let doc = repo.get("rec:1").unwrap().unwrap();
        assert_eq!(doc.title, "Standup");
        assert!(!doc.created_at.is_empty());

        // Upsert replaces content but keeps created_at.
        let created = doc.created_at.clone();
        repo.upsert(&make_document("rec:1", "Standup v2")).unwrap();
        let doc = repo.get("rec:1").unwrap().unwrap();
        assert_eq!(doc.title, "Standup v2");
        assert_eq!(doc.created_at, created);
    }

    #[test]
    fn test_chunk_replace_is_total() {
        let db = make_db();
        let repo = DocumentRepository::new(db);
        repo.upsert(&make_document("rec:1", "Standup")).unwrap();
        repo.upsert_chunks(&[
            make_chunk("rec:1", 0, "first version a"),
            make_chunk("rec:1", 1, "first version b"),
            make_chunk("rec:1", 2, "first version c"),
        ])
        .unwrap();

        let evicted = repo.delete_chunks("rec:1").unwrap();
        assert_eq!(evicted.len(), 3);
        repo.upsert_chunks(&[make_chunk("rec:1", 0, "second version")])
            .unwrap();

        assert_eq!(repo.count_chunks("rec:1").unwrap(), 1);
        let rows = repo
            .chunks_by_ids(
                &["rec:1:0".to_string(), "rec:1:1".to_string(), "rec:1:2".to_string()],
                &DocumentFilter::for_document("rec:1"),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "second version");
    }

    #[test]
    fn test_delete_document_cascades() {
        let db = make_db();
        let repo = DocumentRepository::new(Arc::clone(&db));
        repo.upsert(&make_document("rec:1", "Standup")).unwrap();
        repo.upsert_chunks(&[make_chunk("rec:1", 0, "hello")]).unwrap();

        let evicted = repo.delete("rec:1").unwrap();
        assert_eq!(evicted, vec!["rec:1:0".to_string()]);
        assert!(repo.get("rec:1").unwrap().is_none());
        assert_eq!(repo.count_chunks("rec:1").unwrap(), 0);
    }

    #[test]
    fn test_delete_by_source_group() {
        let repo = DocumentRepository::new(make_db());
        let mut a = make_document("rec:1", "Standup");
        a.source_group = "connector:drive".to_string();
        let mut b = make_document("rec:2", "Retro");
        b.source_group = "connector:drive".to_string();
        let c = make_document("rec:3", "Unrelated");
        for doc in [&a, &b, &c] {
            repo.upsert(doc).unwrap();
            repo.upsert_chunks(&[make_chunk(&doc.id, 0, "text")]).unwrap();
        }

        let mut evicted = repo.delete_by_source_group("connector:drive").unwrap();
        evicted.sort();
        assert_eq!(evicted, vec!["rec:1:0".to_string(), "rec:2:0".to_string()]);
        assert!(repo.get("rec:1").unwrap().is_none());
        assert!(repo.get("rec:2").unwrap().is_none());
        assert!(repo.get("rec:3").unwrap().is_some());
        assert_eq!(repo.count_chunks("rec:3").unwrap(), 1);
    }

    #[test]
    fn test_kind_filter_partitions_namespaces() {
        let repo = DocumentRepository::new(make_db());
        for id in ["memory:1", "feedback:1", "recording:1", "plain-meeting", "meta:x", "col:finance:1"] {
            repo.upsert(&make_document(id, id)).unwrap();
            repo.upsert_chunks(&[make_chunk(id, 0, "text")]).unwrap();
        }
        let all_ids: Vec<String> = (0..1)
            .flat_map(|_| {
                ["memory:1:0", "feedback:1:0", "recording:1:0", "plain-meeting:0", "meta:x:0", "col:finance:1:0"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        let memory = repo
            .chunks_by_ids(&all_ids, &DocumentFilter { kind: Some(DocumentKind::Memory), ..Default::default() })
            .unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory[0].document_id, "memory:1");

        let residual = repo
            .chunks_by_ids(&all_ids, &DocumentFilter { kind: Some(DocumentKind::Transcript), ..Default::default() })
            .unwrap();
        assert_eq!(residual.len(), 1);
        assert_eq!(residual[0].document_id, "plain-meeting");
    }

    #[test]
    fn test_date_range_filter() {
        let repo = DocumentRepository::new(make_db());
        let mut early = make_document("a", "early");
        early.occurred_at = "2024-01-01T00:00:00Z".to_string();
        let mut late = make_document("b", "late");
        late.occurred_at = "2024-06-01T00:00:00Z".to_string();
        repo.upsert(&early).unwrap();
        repo.upsert(&late).unwrap();
        repo.upsert_chunks(&[make_chunk("a", 0, "x"), make_chunk("b", 0, "y")])
            .unwrap();

        let rows = repo
            .chunks_by_ids(
                &["a:0".to_string(), "b:0".to_string()],
                &DocumentFilter {
                    date_from: Some("2024-03-01T00:00:00Z".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].document_id, "b");
    }

    #[test]
    fn test_collection_crud() {
        let repo = CollectionRepository::new(make_db());
        repo.upsert(&Collection {
            id: "finance".to_string(),
            title: "Finance".to_string(),
            description: "Market notes".to_string(),
            kind: CollectionKind::Custom,
            created_at: String::new(),
            updated_at: String::new(),
        })
        .unwrap();

        let collection = repo.get("finance").unwrap().unwrap();
        assert_eq!(collection.kind, CollectionKind::Custom);
        assert_eq!(repo.list(10, 0).unwrap().len(), 1);

        repo.delete("finance").unwrap();
        assert!(repo.get("finance").unwrap().is_none());
    }

    #[test]
    fn test_source_registry_scoped_by_collection() {
        let repo = SourceRepository::new(make_db());
        let tags = vec!["rag".to_string()];
        repo.upsert("finance", "https://a.example", &tags, true).unwrap();
        repo.upsert("macro", "https://a.example", &tags, true).unwrap();

        assert_eq!(repo.list("finance", true, 10).unwrap().len(), 1);
        let source = repo.get_by_url("macro", "https://a.example").unwrap().unwrap();
        assert!(source.enabled);

        repo.mark_crawl(source.id, "ok", "").unwrap();
        let source = repo.get_by_url("macro", "https://a.example").unwrap().unwrap();
        assert_eq!(source.last_status, "ok");
        assert!(!source.last_crawled_at.is_empty());
    }

    #[test]
    fn test_meta_round_trip() {
        let repo = MetaRepository::new(make_db());
        assert!(repo.get("embedding_dim").unwrap().is_none());
        repo.set("embedding_dim", "384").unwrap();
        assert_eq!(repo.get("embedding_dim").unwrap().as_deref(), Some("384"));
        repo.set("embedding_dim", "768").unwrap();
        assert_eq!(repo.get("embedding_dim").unwrap().as_deref(), Some("768"));
    }
}
