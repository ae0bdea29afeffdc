//! Native vector backend on the sqlite-vec extension.
//!
//! Embeddings live in a `vec0` virtual table colocated with the relational
//! store, so writes are durable immediately and `persist` is a no-op.
//! The extension must be registered before the database connection is
//! opened; see [`register_extension`].

use std::sync::{Arc, OnceLock};

use tracing::{debug, info};
use zerocopy::AsBytes;

use lore_core::error::LoreError;
use lore_storage::Database;

use crate::backend::{DistanceMetric, VectorBackend, VectorHit};

static REGISTER: std::sync::Once = std::sync::Once::new();

/// Register sqlite-vec as an auto extension.
///
/// Affects connections opened after this call, so it must run before
/// [`Database::new`]. Safe to call more than once.
pub fn register_extension() {
    REGISTER.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Vector index backed by a sqlite-vec `vec0` virtual table.
pub struct NativeBackend {
    db: Arc<Database>,
    // Set once the embedding dimension is known and the table exists.
    table_dim: OnceLock<usize>,
}

impl NativeBackend {
    /// Check that the sqlite-vec extension is live on this connection by
    /// round-tripping a throwaway `vec0` table.
    pub fn probe(db: &Database) -> Result<(), LoreError> {
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE VIRTUAL TABLE temp.vec_probe USING vec0(embedding float[4]);
                 DROP TABLE temp.vec_probe;",
            )
            .map_err(|e| LoreError::Index(format!("sqlite-vec probe failed: {}", e)))
        })?;
        debug!("sqlite-vec extension probe succeeded");
        Ok(())
    }

    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            table_dim: OnceLock::new(),
        }
    }

    /// Create the `chunk_vectors` table for the given dimension if it does
    /// not exist yet. Called by the store facade once the store-wide
    /// dimension is established.
    pub fn ensure_table(&self, dimension: usize) -> Result<(), LoreError> {
        if self.table_dim.get().is_some() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vectors USING vec0(
                    chunk_id TEXT PRIMARY KEY,
                    embedding float[{}]
                )",
                dimension
            ))
            .map_err(|e| LoreError::Index(format!("Create chunk_vectors: {}", e)))
        })?;
        let _ = self.table_dim.set(dimension);
        info!(dimension, "Created vec0 chunk_vectors table");
        Ok(())
    }

    fn table_ready(&self) -> bool {
        self.table_dim.get().is_some()
    }
}

impl VectorBackend for NativeBackend {
    fn upsert(&self, chunk_id: &str, embedding: &[f32]) -> Result<(), LoreError> {
        self.ensure_table(embedding.len())?;
        self.db.with_conn(|conn| {
            // vec0 tables reject ON CONFLICT clauses; delete-then-insert.
            conn.execute(
                "DELETE FROM chunk_vectors WHERE chunk_id = ?1",
                rusqlite::params![chunk_id],
            )
            .map_err(|e| LoreError::Index(format!("Vector delete before upsert: {}", e)))?;
            conn.execute(
                "INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?1, ?2)",
                rusqlite::params![chunk_id, embedding.as_bytes()],
            )
            .map_err(|e| LoreError::Index(format!("Vector insert: {}", e)))?;
            Ok(())
        })
    }

    fn delete(&self, chunk_ids: &[String]) -> Result<(), LoreError> {
        if chunk_ids.is_empty() || !self.table_ready() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("DELETE FROM chunk_vectors WHERE chunk_id = ?1")
                .map_err(|e| LoreError::Index(e.to_string()))?;
            for chunk_id in chunk_ids {
                stmt.execute(rusqlite::params![chunk_id])
                    .map_err(|e| LoreError::Index(format!("Vector delete: {}", e)))?;
            }
            Ok(())
        })
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, LoreError> {
        if !self.table_ready() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT chunk_id, distance FROM chunk_vectors
                     WHERE embedding MATCH ?1 AND k = ?2
                     ORDER BY distance",
                )
                .map_err(|e| LoreError::Index(format!("Vector search prepare: {}", e)))?;
            let rows = stmt
                .query_map(rusqlite::params![query.as_bytes(), k as i64], |row| {
                    Ok(VectorHit {
                        chunk_id: row.get(0)?,
                        distance: row.get(1)?,
                    })
                })
                .map_err(|e| LoreError::Index(format!("Vector search: {}", e)))?;
            let mut hits = Vec::new();
            for row in rows {
                hits.push(row.map_err(|e| LoreError::Index(e.to_string()))?);
            }
            Ok(hits)
        })
    }

    fn len(&self) -> Result<usize, LoreError> {
        if !self.table_ready() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunk_vectors", [], |row| row.get(0))
                .map_err(|e| LoreError::Index(e.to_string()))?;
            Ok(count as usize)
        })
    }

    fn persist(&self) -> Result<(), LoreError> {
        // Write-through to SQLite; nothing buffered.
        Ok(())
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::L2
    }
}
