//! Core domain types.
//!
//! Documents, ingest jobs, the in-memory artifacts flowing through the
//! ingestion pipeline, and the per-run [`IngestContext`].

mod context;
mod document;
mod types;

pub use context::IngestContext;
pub use document::{Document, DocumentStatus, IngestJob, JobStatus, StageLog};
pub use types::{
    BlockType, DocType, DocumentSegment, Entity, EntityType, ProcessedChunk, SegmentType,
    TableData, TextBlock,
};
