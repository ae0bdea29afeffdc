//! Lore Vector crate - dual-backend embedding index.
//!
//! A `vec0` virtual table (sqlite-vec) when the extension is available,
//! or an in-process HNSW graph with sidecar persistence when it is not.
//! The `VectorStore` facade picks the backend once at open time and
//! enforces the store-wide embedding dimension.

pub mod backend;
pub mod embedding;
pub mod fallback;
pub mod native;
pub mod store;

pub use backend::{DistanceMetric, VectorBackend, VectorHit};
pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding};
pub use fallback::FallbackBackend;
pub use native::{register_extension, NativeBackend};
pub use store::VectorStore;
