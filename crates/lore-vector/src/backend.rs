//! Backend trait shared by the native and fallback vector indexes.

use lore_core::error::LoreError;
use zerocopy::AsBytes;

/// Distance metric a backend ranks by. Callers may inspect this to
/// interpret raw distances; both metrics order ascending (smaller is
/// closer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared-error distance used by the sqlite-vec `vec0` tables.
    L2,
    /// Cosine distance (1 - cosine similarity) used by the ANN graph.
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

/// A single nearest-neighbor hit.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    /// Raw backend distance, ascending. Units depend on [`DistanceMetric`].
    pub distance: f64,
}

/// One vector index implementation.
///
/// Implementations are synchronous; callers serialize access through the
/// owning [`VectorStore`](crate::store::VectorStore). Dimension checks
/// happen in the facade, so backends may assume well-formed input lengths.
pub trait VectorBackend: Send + Sync {
    /// Insert or overwrite the embedding for a chunk id.
    fn upsert(&self, chunk_id: &str, embedding: &[f32]) -> Result<(), LoreError>;

    /// Remove the embeddings for the given chunk ids. Missing ids are not
    /// an error.
    fn delete(&self, chunk_ids: &[String]) -> Result<(), LoreError>;

    /// K nearest neighbors, ascending by distance, at most `k` hits.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, LoreError>;

    /// Number of live vectors in the index.
    fn len(&self) -> Result<usize, LoreError>;

    fn is_empty(&self) -> Result<bool, LoreError> {
        Ok(self.len()? == 0)
    }

    /// Flush in-memory state to durable storage. A no-op for backends
    /// that write through to SQLite.
    fn persist(&self) -> Result<(), LoreError>;

    fn metric(&self) -> DistanceMetric;
}

/// Encode an f32 slice as a little-endian blob for SQLite storage.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.as_bytes().to_vec()
}

/// Decode a blob written by [`embedding_to_blob`].
pub fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>, LoreError> {
    if blob.len() % 4 != 0 {
        return Err(LoreError::Index(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip() {
        let embedding = vec![0.25f32, -1.5, 3.0, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob).unwrap(), embedding);
    }

    #[test]
    fn test_blob_bad_length() {
        assert!(blob_to_embedding(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(DistanceMetric::L2.as_str(), "l2");
        assert_eq!(DistanceMetric::Cosine.as_str(), "cosine");
    }
}
