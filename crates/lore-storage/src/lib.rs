//! Lore Storage crate - SQLite persistence for the retrieval store.
//!
//! Provides a WAL-mode SQLite database with structural migrations,
//! repository implementations for documents/chunks/collections/sources,
//! and the knowledge-document lifecycle records used by ingestion.

pub mod db;
pub mod knowledge;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use knowledge::KnowledgeRepository;
pub use repository::{
    CollectionRepository, DocumentRepository, MetaRepository, SourceRepository, SourceRow,
};
