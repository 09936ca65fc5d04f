//! Per-run ingestion context.
//!
//! One [`IngestContext`] is created per ingestion run and owns every
//! transient collection the pipeline produces. Stages write to disjoint
//! fields; the DAG runner is the only writer between stage boundaries.
//! The context is dropped after its logs are snapshotted into the job row.

use std::path::PathBuf;

use serde_json::Value;

use super::document::StageLog;
use super::types::{DocType, DocumentSegment, Entity, ProcessedChunk, TableData, TextBlock};

/// Transient state for one ingestion run.
#[derive(Debug)]
pub struct IngestContext {
    /// Document under ingestion.
    pub document_id: i64,
    /// Path to the staged input file.
    pub file_path: PathBuf,
    /// Original filename.
    pub filename: String,
    /// Owning user id.
    pub owner_id: i64,
    /// MIME hint from upload, when present.
    pub mime_hint: Option<String>,

    /// Blank-line-joined block text, assembled by the extractor.
    pub raw_text: String,
    /// Extracted text blocks.
    pub blocks: Vec<TextBlock>,
    /// Structured segments.
    pub segments: Vec<DocumentSegment>,
    /// Detected document type.
    pub doc_type: Option<DocType>,
    /// Extracted entities.
    pub entities: Vec<Entity>,
    /// Accumulated document metadata.
    pub extracted_metadata: serde_json::Map<String, Value>,
    /// Parsed tables.
    pub tables: Vec<TableData>,
    /// Chunks flowing through dedup, masking, and indexing.
    pub chunks: Vec<ProcessedChunk>,

    /// Append-only stage logs.
    pub logs: Vec<StageLog>,
    /// Non-fatal errors recorded along the way.
    pub errors: Vec<String>,
    /// Performance metrics.
    pub metrics: serde_json::Map<String, Value>,
}

impl IngestContext {
    /// Creates an empty context for a document.
    #[must_use]
    pub fn new(document_id: i64, file_path: PathBuf, filename: String, owner_id: i64) -> Self {
        Self {
            document_id,
            file_path,
            filename,
            owner_id,
            mime_hint: None,
            raw_text: String::new(),
            blocks: Vec::new(),
            segments: Vec::new(),
            doc_type: None,
            entities: Vec::new(),
            extracted_metadata: serde_json::Map::new(),
            tables: Vec::new(),
            chunks: Vec::new(),
            logs: Vec::new(),
            errors: Vec::new(),
            metrics: serde_json::Map::new(),
        }
    }

    /// Appends a stage log entry.
    pub fn add_log(&mut self, log: StageLog) {
        self.logs.push(log);
    }

    /// Records a non-fatal error.
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Sets a performance metric.
    pub fn set_metric(&mut self, key: &str, value: Value) {
        self.metrics.insert(key.to_string(), value);
    }

    /// Chunks that survived deduplication.
    #[must_use]
    pub fn unique_chunks(&self) -> impl Iterator<Item = &ProcessedChunk> {
        self.chunks.iter().filter(|c| !c.is_duplicate)
    }
}
