//! Lore Ingest crate - fingerprinting, scoring, and the document pipeline.
//!
//! Exact duplicates are caught by content hash, near duplicates by
//! simhash distance, and every stored document gets a knowledge record
//! with freshness and reliability scores.

pub mod fingerprint;
pub mod pipeline;
pub mod score;

pub use fingerprint::{content_hash, hamming_distance, normalize_text, simhash64, tokenize};
pub use pipeline::{IngestOutcome, IngestPipeline, IngestRequest};
pub use score::{freshness_score, reliability_score};
