//! Knowledge-document lifecycle records.
//!
//! One row per ingested document: dedup fingerprints, freshness and
//! reliability scores, and the stale/expired review state consumed by
//! the maintenance sweep.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;

use lore_core::error::LoreError;
use lore_core::types::{KnowledgeDocument, KnowledgeHealth, SourceStats};

use crate::db::Database;

const SELECT_COLUMNS: &str = "doc_id, collection_id, source_type, source_url, source_group, \
     title, content_hash, simhash, published_at, retrieved_at, freshness_score, \
     reliability_score, stale, expired, stale_reason, reviewed_at, tags_json, \
     metadata_json, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeDocument> {
    let tags_json: String = row.get(16)?;
    let metadata_json: String = row.get(17)?;
    Ok(KnowledgeDocument {
        doc_id: row.get(0)?,
        collection_id: row.get(1)?,
        source_type: row.get(2)?,
        source_url: row.get(3)?,
        source_group: row.get(4)?,
        title: row.get(5)?,
        content_hash: row.get(6)?,
        simhash: row.get(7)?,
        published_at: row.get(8)?,
        retrieved_at: row.get(9)?,
        freshness_score: row.get(10)?,
        reliability_score: row.get(11)?,
        stale: row.get::<_, i64>(12)? != 0,
        expired: row.get::<_, i64>(13)? != 0,
        stale_reason: row.get(14)?,
        reviewed_at: row.get(15)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
        created_at: row.get(18)?,
    })
}

/// Repository for knowledge-document lifecycle rows.
pub struct KnowledgeRepository {
    db: Arc<Database>,
}

impl KnowledgeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn upsert(&self, doc: &KnowledgeDocument) -> Result<(), LoreError> {
        let tags_json = serde_json::to_string(&doc.tags)?;
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        self.db.with_conn(|conn| {
            let created = if doc.created_at.is_empty() {
                Utc::now().to_rfc3339()
            } else {
                doc.created_at.clone()
            };
            conn.execute(
                "INSERT INTO knowledge_docs (doc_id, collection_id, source_type, source_url,
                     source_group, title, content_hash, simhash, published_at, retrieved_at,
                     freshness_score, reliability_score, stale, expired, stale_reason,
                     reviewed_at, tags_json, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                 ON CONFLICT(doc_id) DO UPDATE SET
                     collection_id = excluded.collection_id,
                     source_type = excluded.source_type,
                     source_url = excluded.source_url,
                     source_group = excluded.source_group,
                     title = excluded.title,
                     content_hash = excluded.content_hash,
                     simhash = excluded.simhash,
                     published_at = excluded.published_at,
                     retrieved_at = excluded.retrieved_at,
                     freshness_score = excluded.freshness_score,
                     reliability_score = excluded.reliability_score,
                     stale = excluded.stale,
                     expired = excluded.expired,
                     stale_reason = excluded.stale_reason,
                     reviewed_at = excluded.reviewed_at,
                     tags_json = excluded.tags_json,
                     metadata_json = excluded.metadata_json",
                rusqlite::params![
                    doc.doc_id,
                    doc.collection_id,
                    doc.source_type,
                    doc.source_url,
                    doc.source_group,
                    doc.title,
                    doc.content_hash,
                    doc.simhash,
                    doc.published_at,
                    doc.retrieved_at,
                    doc.freshness_score,
                    doc.reliability_score,
                    doc.stale as i64,
                    doc.expired as i64,
                    doc.stale_reason,
                    doc.reviewed_at,
                    tags_json,
                    metadata_json,
                    created,
                ],
            )
            .map_err(|e| LoreError::Storage(format!("Upsert knowledge doc: {}", e)))?;
            Ok(())
        })
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<KnowledgeDocument>, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM knowledge_docs WHERE doc_id = ?1", SELECT_COLUMNS),
                rusqlite::params![doc_id],
                map_row,
            )
            .optional()
            .map_err(|e| LoreError::Storage(format!("Load knowledge doc: {}", e)))
        })
    }

    /// Exact-duplicate lookup within one collection.
    pub fn get_by_hash(
        &self,
        collection_id: &str,
        content_hash: &str,
    ) -> Result<Option<KnowledgeDocument>, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM knowledge_docs
                     WHERE collection_id = ?1 AND content_hash = ?2
                     ORDER BY retrieved_at DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                rusqlite::params![collection_id, content_hash],
                map_row,
            )
            .optional()
            .map_err(|e| LoreError::Storage(format!("Hash lookup: {}", e)))
        })
    }

    /// Recent rows in one collection considered for near-duplicate checks.
    pub fn dedup_candidates(
        &self,
        collection_id: &str,
        lookback_hours: i64,
        limit: u64,
    ) -> Result<Vec<KnowledgeDocument>, LoreError> {
        let cutoff = (Utc::now() - chrono::Duration::hours(lookback_hours)).to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM knowledge_docs
                     WHERE collection_id = ?1 AND retrieved_at >= ?2 AND simhash != ''
                     ORDER BY retrieved_at DESC LIMIT ?3",
                    SELECT_COLUMNS
                ))
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![collection_id, cutoff, limit as i64], map_row)
                .map_err(|e| LoreError::Storage(format!("Dedup candidates: {}", e)))?;
            let mut docs = Vec::new();
            for row in rows {
                docs.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(docs)
        })
    }

    /// Rows not looked at within the given window, longest-neglected first.
    ///
    /// A row's last touch is its review stamp, or its retrieval time when
    /// it has never been reviewed. The stored freshness score is an
    /// ingest-time snapshot and deliberately plays no part here.
    pub fn needs_review(
        &self,
        collection_id: &str,
        older_than_hours: i64,
        limit: u64,
    ) -> Result<Vec<KnowledgeDocument>, LoreError> {
        let cutoff = (Utc::now() - chrono::Duration::hours(older_than_hours)).to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM knowledge_docs
                     WHERE collection_id = ?1 AND expired = 0
                       AND (CASE WHEN reviewed_at = '' THEN retrieved_at ELSE reviewed_at END) < ?2
                     ORDER BY CASE WHEN reviewed_at = '' THEN retrieved_at ELSE reviewed_at END ASC
                     LIMIT ?3",
                    SELECT_COLUMNS
                ))
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![collection_id, cutoff, limit as i64],
                    map_row,
                )
                .map_err(|e| LoreError::Storage(format!("Needs review: {}", e)))?;
            let mut docs = Vec::new();
            for row in rows {
                docs.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(docs)
        })
    }

    pub fn mark_stale(&self, doc_id: &str, reason: &str) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE knowledge_docs SET stale = 1, stale_reason = ?2 WHERE doc_id = ?1",
                rusqlite::params![doc_id, reason],
            )
            .map_err(|e| LoreError::Storage(format!("Mark stale: {}", e)))?;
            Ok(())
        })
    }

    pub fn mark_expired(&self, doc_id: &str) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE knowledge_docs SET expired = 1 WHERE doc_id = ?1",
                rusqlite::params![doc_id],
            )
            .map_err(|e| LoreError::Storage(format!("Mark expired: {}", e)))?;
            Ok(())
        })
    }

    /// Clear the stale flag and stamp the review time.
    pub fn mark_reviewed(&self, doc_id: &str) -> Result<(), LoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE knowledge_docs
                 SET stale = 0, stale_reason = '', reviewed_at = ?2
                 WHERE doc_id = ?1",
                rusqlite::params![doc_id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| LoreError::Storage(format!("Mark reviewed: {}", e)))?;
            Ok(())
        })
    }

    pub fn health_summary(&self, collection_id: &str) -> Result<KnowledgeHealth, LoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(stale), 0),
                        COALESCE(SUM(expired), 0),
                        COALESCE(MAX(reviewed_at), '')
                 FROM knowledge_docs WHERE collection_id = ?1",
                rusqlite::params![collection_id],
                |row| {
                    Ok(KnowledgeHealth {
                        total: row.get::<_, i64>(0)? as u64,
                        stale: row.get::<_, i64>(1)? as u64,
                        expired: row.get::<_, i64>(2)? as u64,
                        last_reviewed_at: row.get(3)?,
                    })
                },
            )
            .map_err(|e| LoreError::Storage(format!("Health summary: {}", e)))
        })
    }

    /// Per-source rollup within one collection, busiest sources first.
    pub fn source_stats(&self, collection_id: &str) -> Result<Vec<SourceStats>, LoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT CASE WHEN source_group != '' THEN source_group ELSE source_url END AS source_key,
                            COUNT(*),
                            COALESCE(SUM(stale), 0),
                            COALESCE(SUM(expired), 0),
                            COALESCE(AVG(freshness_score), 0.0),
                            COALESCE(MIN(retrieved_at), ''),
                            COALESCE(MAX(retrieved_at), '')
                     FROM knowledge_docs
                     WHERE collection_id = ?1
                     GROUP BY source_key
                     ORDER BY COUNT(*) DESC",
                )
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![collection_id], |row| {
                    Ok(SourceStats {
                        source_key: row.get(0)?,
                        doc_count: row.get::<_, i64>(1)? as u64,
                        stale_count: row.get::<_, i64>(2)? as u64,
                        expired_count: row.get::<_, i64>(3)? as u64,
                        avg_freshness: row.get(4)?,
                        first_seen: row.get(5)?,
                        last_seen: row.get(6)?,
                    })
                })
                .map_err(|e| LoreError::Storage(format!("Source stats: {}", e)))?;
            let mut stats = Vec::new();
            for row in rows {
                stats.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(stats)
        })
    }
}
