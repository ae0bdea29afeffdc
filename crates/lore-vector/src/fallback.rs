//! Fallback vector backend on an in-process HNSW graph.
//!
//! Used when the sqlite-vec extension is unavailable. Embeddings are
//! written through to the `chunk_embeddings` table (the rebuild source of
//! truth) and mirrored into an `hnsw_rs` cosine graph keyed by integer
//! labels. The graph plus a JSON manifest (label maps, tombstones) are
//! persisted to the index directory on explicit `persist()` calls only.
//!
//! HNSW graphs do not support removal, so deletes tombstone the label and
//! search filters tombstoned hits. `compact()` rebuilds the graph from the
//! relational table and drops the tombstones.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lore_core::config::VectorConfig;
use lore_core::error::LoreError;
use lore_storage::Database;

use crate::backend::{
    blob_to_embedding, embedding_to_blob, DistanceMetric, VectorBackend, VectorHit,
};

const GRAPH_BASENAME: &str = "index";
const MANIFEST_FILE: &str = "index.json";
const MAX_LAYER: usize = 16;

/// JSON sidecar persisted next to the graph dump.
#[derive(Debug, Serialize, Deserialize)]
struct IndexManifest {
    dimension: Option<usize>,
    next_label: usize,
    chunk_to_label: HashMap<String, usize>,
    tombstones: Vec<usize>,
}

struct FallbackState {
    graph: Hnsw<'static, f32, DistCosine>,
    chunk_to_label: HashMap<String, usize>,
    label_to_chunk: HashMap<usize, String>,
    tombstones: HashSet<usize>,
    next_label: usize,
    dimension: Option<usize>,
    dirty: bool,
}

impl FallbackState {
    fn empty(config: &VectorConfig) -> Self {
        Self {
            graph: new_graph(config),
            chunk_to_label: HashMap::new(),
            label_to_chunk: HashMap::new(),
            tombstones: HashSet::new(),
            next_label: 0,
            dimension: None,
            dirty: false,
        }
    }
}

fn new_graph(config: &VectorConfig) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::new(
        config.m,
        config.max_elements,
        MAX_LAYER,
        config.ef_construction,
        DistCosine {},
    )
}

/// Vector index backed by an in-process HNSW graph with sidecar persistence.
pub struct FallbackBackend {
    db: Arc<Database>,
    index_dir: PathBuf,
    config: VectorConfig,
    state: RwLock<FallbackState>,
}

impl FallbackBackend {
    /// Open the index: load the persisted graph and manifest when both are
    /// present and consistent, otherwise rebuild from `chunk_embeddings`.
    ///
    /// A missing or corrupt dump is self-healing (logged, never surfaced).
    pub fn open(
        db: Arc<Database>,
        index_dir: &Path,
        config: &VectorConfig,
    ) -> Result<Self, LoreError> {
        std::fs::create_dir_all(index_dir)?;

        let state = match Self::try_load(index_dir) {
            Ok(Some(state)) => {
                info!(
                    vectors = state.chunk_to_label.len(),
                    tombstones = state.tombstones.len(),
                    "Loaded HNSW index from disk"
                );
                state
            }
            Ok(None) => Self::rebuild_state(&db, config)?,
            Err(e) => {
                warn!(error = %e, "HNSW index dump unreadable, rebuilding from embeddings table");
                Self::rebuild_state(&db, config)?
            }
        };

        Ok(Self {
            db,
            index_dir: index_dir.to_path_buf(),
            config: config.clone(),
            state: RwLock::new(state),
        })
    }

    /// Load the graph dump and manifest, `Ok(None)` when absent.
    fn try_load(index_dir: &Path) -> Result<Option<FallbackState>, LoreError> {
        let graph_file = index_dir.join(format!("{}.hnsw.graph", GRAPH_BASENAME));
        let data_file = index_dir.join(format!("{}.hnsw.data", GRAPH_BASENAME));
        let manifest_file = index_dir.join(MANIFEST_FILE);
        if !graph_file.exists() || !data_file.exists() || !manifest_file.exists() {
            return Ok(None);
        }

        let manifest: IndexManifest =
            serde_json::from_str(&std::fs::read_to_string(&manifest_file)?)
                .map_err(|e| LoreError::Index(format!("Index manifest unreadable: {}", e)))?;

        // HnswIo keeps ownership of the mmapped dump for the graph's
        // lifetime; leak it so the graph can live for the process.
        let loader: &'static mut HnswIo =
            Box::leak(Box::new(HnswIo::new(index_dir, GRAPH_BASENAME)));
        let graph = loader
            .load_hnsw::<f32, DistCosine>()
            .map_err(|e| LoreError::Index(format!("Failed to load HNSW dump: {}", e)))?;

        let label_to_chunk: HashMap<usize, String> = manifest
            .chunk_to_label
            .iter()
            .map(|(chunk, label)| (*label, chunk.clone()))
            .collect();

        Ok(Some(FallbackState {
            graph,
            label_to_chunk,
            chunk_to_label: manifest.chunk_to_label,
            tombstones: manifest.tombstones.into_iter().collect(),
            next_label: manifest.next_label,
            dimension: manifest.dimension,
            dirty: false,
        }))
    }

    /// Build a fresh graph from every row of `chunk_embeddings`.
    fn rebuild_state(db: &Database, config: &VectorConfig) -> Result<FallbackState, LoreError> {
        let rows: Vec<(String, Vec<u8>)> = db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT chunk_id, embedding FROM chunk_embeddings WHERE embedding IS NOT NULL")
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| LoreError::Storage(e.to_string()))?);
            }
            Ok(out)
        })?;

        let mut state = FallbackState::empty(config);
        for (chunk_id, blob) in rows {
            let embedding = blob_to_embedding(&blob)?;
            if state.dimension.is_none() {
                state.dimension = Some(embedding.len());
            }
            let label = state.next_label;
            state.next_label += 1;
            state.graph.insert_slice((&embedding, label));
            state.label_to_chunk.insert(label, chunk_id.clone());
            state.chunk_to_label.insert(chunk_id, label);
        }
        state.dirty = !state.chunk_to_label.is_empty();

        debug!(vectors = state.chunk_to_label.len(), "Rebuilt HNSW index from embeddings table");
        Ok(state)
    }

    /// Rebuild the graph from the relational table, dropping tombstones,
    /// then persist the compacted index.
    pub fn compact(&self) -> Result<(), LoreError> {
        let fresh = Self::rebuild_state(&self.db, &self.config)?;
        {
            let mut state = self
                .state
                .write()
                .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
            let dropped = state.tombstones.len();
            *state = fresh;
            state.dirty = true;
            info!(dropped_tombstones = dropped, vectors = state.chunk_to_label.len(), "Compacted HNSW index");
        }
        self.persist()
    }

    /// Tombstone count, exposed for maintenance decisions.
    pub fn tombstone_count(&self) -> Result<usize, LoreError> {
        let state = self
            .state
            .read()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
        Ok(state.tombstones.len())
    }
}

impl VectorBackend for FallbackBackend {
    fn upsert(&self, chunk_id: &str, embedding: &[f32]) -> Result<(), LoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;

        // Capacity is fixed at graph build time. Refuse before touching
        // either store rather than inserting a vector the graph drops.
        if state.next_label >= self.config.max_elements {
            return Err(LoreError::CapacityExceeded {
                capacity: self.config.max_elements,
            });
        }

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chunk_embeddings (chunk_id, embedding) VALUES (?1, ?2)
                 ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding",
                rusqlite::params![chunk_id, embedding_to_blob(embedding)],
            )
            .map_err(|e| LoreError::Storage(format!("Store embedding blob: {}", e)))?;
            Ok(())
        })?;

        // HNSW has no in-place update; a re-upsert gets a fresh label and
        // the old one is tombstoned.
        if let Some(old_label) = state.chunk_to_label.remove(chunk_id) {
            state.label_to_chunk.remove(&old_label);
            state.tombstones.insert(old_label);
        }

        let label = state.next_label;
        state.next_label += 1;
        state.graph.insert_slice((embedding, label));
        state.chunk_to_label.insert(chunk_id.to_string(), label);
        state.label_to_chunk.insert(label, chunk_id.to_string());
        if state.dimension.is_none() {
            state.dimension = Some(embedding.len());
        }
        state.dirty = true;
        Ok(())
    }

    fn delete(&self, chunk_ids: &[String]) -> Result<(), LoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("DELETE FROM chunk_embeddings WHERE chunk_id = ?1")
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            for chunk_id in chunk_ids {
                stmt.execute(rusqlite::params![chunk_id])
                    .map_err(|e| LoreError::Storage(format!("Delete embedding blob: {}", e)))?;
            }
            Ok(())
        })?;

        let mut state = self
            .state
            .write()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
        for chunk_id in chunk_ids {
            if let Some(label) = state.chunk_to_label.remove(chunk_id) {
                state.label_to_chunk.remove(&label);
                state.tombstones.insert(label);
                state.dirty = true;
            }
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, LoreError> {
        let state = self
            .state
            .read()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
        if state.chunk_to_label.is_empty() {
            return Ok(Vec::new());
        }

        // Over-request by the tombstone count so filtered hits still leave
        // k live results when the graph has them.
        let request = (k + state.tombstones.len()).min(state.next_label);
        let ef = self.config.ef_search.max(request);
        let neighbours = state.graph.search(query, request, ef);

        let mut hits = Vec::with_capacity(k);
        for neighbour in neighbours {
            if state.tombstones.contains(&neighbour.d_id) {
                continue;
            }
            if let Some(chunk_id) = state.label_to_chunk.get(&neighbour.d_id) {
                hits.push(VectorHit {
                    chunk_id: chunk_id.clone(),
                    distance: neighbour.distance as f64,
                });
                if hits.len() == k {
                    break;
                }
            }
        }
        Ok(hits)
    }

    fn len(&self) -> Result<usize, LoreError> {
        let state = self
            .state
            .read()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
        Ok(state.chunk_to_label.len())
    }

    fn persist(&self) -> Result<(), LoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
        if !state.dirty {
            return Ok(());
        }

        state
            .graph
            .file_dump(&self.index_dir, GRAPH_BASENAME)
            .map_err(|e| LoreError::Index(format!("Failed to dump HNSW graph: {}", e)))?;

        let manifest = IndexManifest {
            dimension: state.dimension,
            next_label: state.next_label,
            chunk_to_label: state.chunk_to_label.clone(),
            tombstones: state.tombstones.iter().copied().collect(),
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(self.index_dir.join(MANIFEST_FILE), json)?;

        state.dirty = false;
        debug!(vectors = state.chunk_to_label.len(), "Persisted HNSW index");
        Ok(())
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}
