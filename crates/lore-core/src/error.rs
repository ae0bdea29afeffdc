use thiserror::Error;

/// Top-level error type for the Lore retrieval substrate.
///
/// Each variant wraps a subsystem-specific failure. Subsystem crates return
/// `LoreError` directly so that the `?` operator works seamlessly across
/// crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Vector index error: {0}")]
    Index(String),

    /// An embedding's length does not match the store-wide dimension.
    ///
    /// Never retried automatically: retrying without reconfiguring the
    /// embedding provider would fail identically.
    #[error("Embedding dimension mismatch: store records {stored}, got {attempted}")]
    DimensionMismatch { stored: usize, attempted: usize },

    /// The fallback index is full. Operator action: raise
    /// `vector.max_elements` in config and rebuild.
    #[error("Vector index capacity exceeded: {capacity} elements")]
    CapacityExceeded { capacity: usize },

    /// Malformed query input (empty vector, zero top-k). Rejected before
    /// any I/O.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for LoreError {
    fn from(err: toml::de::Error) -> Self {
        LoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LoreError {
    fn from(err: toml::ser::Error) -> Self {
        LoreError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LoreError {
    fn from(err: serde_json::Error) -> Self {
        LoreError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Lore operations.
pub type Result<T> = std::result::Result<T, LoreError>;
