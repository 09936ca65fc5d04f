//! Persistence layer.
//!
//! SQLite-backed store for documents, chunks (with embedding vectors),
//! ingest jobs, and document relations, plus an FTS5 index over chunk
//! content for lexical search.

mod schema;
mod store;

pub use schema::{CURRENT_SCHEMA_VERSION, SCHEMA_SQL};
pub use store::{ChunkRecord, DocumentStore, StoreStats};
