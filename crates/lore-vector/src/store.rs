//! Vector store facade: backend selection and the dimension invariant.
//!
//! The backend is chosen exactly once at open time. The first accepted
//! upsert fixes the store-wide embedding dimension in `store_meta`; every
//! later upsert and query must match it exactly.

use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use lore_core::config::{BackendPreference, VectorConfig};
use lore_core::error::LoreError;
use lore_storage::{Database, MetaRepository};

use crate::backend::{DistanceMetric, VectorBackend, VectorHit};
use crate::fallback::FallbackBackend;
use crate::native::NativeBackend;

const DIMENSION_KEY: &str = "embedding_dim";

enum Backend {
    Native(NativeBackend),
    Fallback(FallbackBackend),
}

impl Backend {
    fn as_dyn(&self) -> &dyn VectorBackend {
        match self {
            Backend::Native(b) => b,
            Backend::Fallback(b) => b,
        }
    }
}

/// The store-level vector index.
pub struct VectorStore {
    backend: Backend,
    meta: MetaRepository,
    dimension: RwLock<Option<usize>>,
}

impl VectorStore {
    /// Open the vector store, choosing a backend per the configured
    /// preference. `auto` probes the native extension and falls back to
    /// the ANN graph when the probe fails.
    pub fn open(
        db: Arc<Database>,
        index_dir: &Path,
        config: &VectorConfig,
    ) -> Result<Self, LoreError> {
        let backend = match config.backend {
            BackendPreference::Native => {
                NativeBackend::probe(&db)?;
                info!("Vector backend: native (sqlite-vec)");
                Backend::Native(NativeBackend::new(Arc::clone(&db)))
            }
            BackendPreference::Fallback => {
                info!("Vector backend: fallback (HNSW)");
                Backend::Fallback(FallbackBackend::open(Arc::clone(&db), index_dir, config)?)
            }
            BackendPreference::Auto => match NativeBackend::probe(&db) {
                Ok(()) => {
                    info!("Vector backend: native (sqlite-vec)");
                    Backend::Native(NativeBackend::new(Arc::clone(&db)))
                }
                Err(e) => {
                    warn!(error = %e, "sqlite-vec unavailable, using HNSW fallback");
                    Backend::Fallback(FallbackBackend::open(Arc::clone(&db), index_dir, config)?)
                }
            },
        };

        let meta = MetaRepository::new(Arc::clone(&db));
        let dimension = match meta.get(DIMENSION_KEY)? {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                LoreError::Storage(format!("Corrupt {} value: {}", DIMENSION_KEY, raw))
            })?),
            None => None,
        };
        if let (Some(dim), Backend::Native(native)) = (dimension, &backend) {
            native.ensure_table(dim)?;
        }

        Ok(Self {
            backend,
            meta,
            dimension: RwLock::new(dimension),
        })
    }

    /// The distance metric of the active backend.
    pub fn metric(&self) -> DistanceMetric {
        self.backend.as_dyn().metric()
    }

    /// The recorded store-wide embedding dimension, if any vector has been
    /// accepted yet.
    pub fn dimension(&self) -> Result<Option<usize>, LoreError> {
        self.dimension
            .read()
            .map(|d| *d)
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))
    }

    pub fn len(&self) -> Result<usize, LoreError> {
        self.backend.as_dyn().len()
    }

    pub fn is_empty(&self) -> Result<bool, LoreError> {
        self.backend.as_dyn().is_empty()
    }

    /// Enforce the dimension invariant, recording the dimension on the
    /// first accepted vector. No truncation or padding, and the recorded
    /// dimension never changes on a refused insert.
    fn check_dimension(&self, attempted: usize, record: bool) -> Result<(), LoreError> {
        let mut guard = self
            .dimension
            .write()
            .map_err(|e| LoreError::Index(format!("Lock poisoned: {}", e)))?;
        match *guard {
            Some(stored) if stored != attempted => {
                Err(LoreError::DimensionMismatch { stored, attempted })
            }
            Some(_) => Ok(()),
            None if record => {
                self.meta.set(DIMENSION_KEY, &attempted.to_string())?;
                *guard = Some(attempted);
                info!(dimension = attempted, "Recorded store embedding dimension");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn upsert(&self, chunk_id: &str, embedding: &[f32]) -> Result<(), LoreError> {
        if embedding.is_empty() {
            return Err(LoreError::InvalidQuery(
                "Cannot index an empty embedding".to_string(),
            ));
        }
        self.check_dimension(embedding.len(), true)?;
        self.backend.as_dyn().upsert(chunk_id, embedding)
    }

    pub fn delete(&self, chunk_ids: &[String]) -> Result<(), LoreError> {
        self.backend.as_dyn().delete(chunk_ids)
    }

    /// K nearest neighbors, ascending by backend distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, LoreError> {
        if query.is_empty() {
            return Err(LoreError::InvalidQuery(
                "Query vector must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(LoreError::InvalidQuery("k must be at least 1".to_string()));
        }
        self.check_dimension(query.len(), false)?;
        self.backend.as_dyn().search(query, k)
    }

    /// Flush the fallback index to disk; a no-op on the native backend.
    pub fn persist(&self) -> Result<(), LoreError> {
        self.backend.as_dyn().persist()
    }

    /// Rebuild the fallback graph without tombstones; a no-op on the
    /// native backend, which deletes rows directly.
    pub fn compact(&self) -> Result<(), LoreError> {
        match &self.backend {
            Backend::Native(_) => Ok(()),
            Backend::Fallback(fallback) => fallback.compact(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(preference: BackendPreference) -> (VectorStore, Arc<Database>, TempDir) {
        crate::native::register_extension();
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("store.sqlite")).unwrap());
        let config = VectorConfig {
            backend: preference,
            max_elements: 100,
            ..Default::default()
        };
        let store =
            VectorStore::open(Arc::clone(&db), &dir.path().join("index"), &config).unwrap();
        (store, db, dir)
    }

    fn vec_of(dim: usize, seed: f32) -> Vec<f32> {
        let mut v = vec![seed.abs() + 0.1; dim];
        v[0] = 1.0;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter_mut().for_each(|x| *x /= norm);
        v
    }

    #[test]
    fn test_auto_selects_native_when_extension_present() {
        let (store, _db, _dir) = open_store(BackendPreference::Auto);
        assert_eq!(store.metric(), DistanceMetric::L2);
    }

    #[test]
    fn test_forced_fallback_uses_cosine() {
        let (store, _db, _dir) = open_store(BackendPreference::Fallback);
        assert_eq!(store.metric(), DistanceMetric::Cosine);
    }

    #[test]
    fn test_first_upsert_records_dimension() {
        let (store, _db, _dir) = open_store(BackendPreference::Fallback);
        assert_eq!(store.dimension().unwrap(), None);

        for (i, chunk_id) in ["rec:1:0", "rec:1:1", "rec:1:2"].iter().enumerate() {
            store.upsert(chunk_id, &vec_of(1536, 0.3 + i as f32 * 0.2)).unwrap();
        }
        assert_eq!(store.dimension().unwrap(), Some(1536));

        let err = store.upsert("rec:2:0", &vec_of(768, 0.7)).unwrap_err();
        match err {
            LoreError::DimensionMismatch { stored, attempted } => {
                assert_eq!(stored, 1536);
                assert_eq!(attempted, 768);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The failed insert must not move the recorded dimension, and the
        // existing vectors stay searchable.
        assert_eq!(store.dimension().unwrap(), Some(1536));
        assert_eq!(store.len().unwrap(), 3);
        let hits = store.search(&vec_of(1536, 0.3), 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "rec:1:0");
        assert!(hits[0].distance < 1e-5);
    }

    #[test]
    fn test_query_dimension_checked() {
        let (store, _db, _dir) = open_store(BackendPreference::Fallback);
        store.upsert("a", &vec_of(8, 0.4)).unwrap();
        let err = store.search(&vec_of(4, 0.4), 1).unwrap_err();
        assert!(matches!(err, LoreError::DimensionMismatch { stored: 8, attempted: 4 }));
    }

    #[test]
    fn test_dimension_survives_reopen() {
        crate::native::register_extension();
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("store.sqlite")).unwrap());
        let config = VectorConfig {
            backend: BackendPreference::Fallback,
            max_elements: 100,
            ..Default::default()
        };
        {
            let store =
                VectorStore::open(Arc::clone(&db), &dir.path().join("index"), &config).unwrap();
            store.upsert("a", &vec_of(12, 0.2)).unwrap();
        }
        let store =
            VectorStore::open(Arc::clone(&db), &dir.path().join("index"), &config).unwrap();
        assert_eq!(store.dimension().unwrap(), Some(12));
        assert!(store.upsert("b", &vec_of(6, 0.2)).is_err());
    }

    #[test]
    fn test_invalid_queries_rejected() {
        let (store, _db, _dir) = open_store(BackendPreference::Fallback);
        assert!(matches!(
            store.search(&[], 3).unwrap_err(),
            LoreError::InvalidQuery(_)
        ));
        assert!(matches!(
            store.search(&vec_of(4, 0.1), 0).unwrap_err(),
            LoreError::InvalidQuery(_)
        ));
        assert!(matches!(
            store.upsert("a", &[]).unwrap_err(),
            LoreError::InvalidQuery(_)
        ));
    }

    #[test]
    fn test_native_round_trip_through_facade() {
        let (store, _db, _dir) = open_store(BackendPreference::Native);
        store.upsert("a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        store.upsert("b", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].chunk_id, "a");

        store.delete(&["a".to_string()]).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        // persist/compact are no-ops here but must succeed.
        store.persist().unwrap();
        store.compact().unwrap();
    }
}
