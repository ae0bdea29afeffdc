//! Lore Query crate - oversampled vector search and collection routing.
//!
//! `QueryEngine` joins nearest-neighbor hits against chunk and document
//! metadata; `CollectionRouter` maintains the synthetic meta documents
//! that let one vector search decide which collection a question
//! belongs to.

pub mod router;
pub mod search;

pub use router::{resolve_rule, CollectionRouter, RefreshSummary, RouteRule, RouteTarget};
pub use search::{QueryEngine, QueryResult};
