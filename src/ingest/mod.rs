//! Ingestion pipeline.
//!
//! A dependency-ordered DAG of stages turns a raw file into deduplicated,
//! PII-masked, embedded, and indexed chunks. Stages read the shared
//! [`IngestContext`] and return a [`StageOutput`]; the runner merges
//! outputs between stage boundaries, so concurrent stages never share
//! mutable state.

mod dag;
mod dedup;
mod extract;
mod index;
mod meta;
mod pii;
mod structure;
mod table;

pub use dag::{DagReport, DagRunner, StageReport};
pub use dedup::{DedupStage, minhash_signature, normalize_for_dedup, signature_similarity};
pub use extract::{ExtractStage, ExtractorCapability, FileKind, OcrEngine};
pub use index::IndexStage;
pub use meta::MetaStage;
pub use pii::{PiiConfig, PiiStage};
pub use structure::{ChunkingConfig, StructureStage, chunk_sentences};
pub use table::TableStage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    DocType, DocumentSegment, Entity, IngestContext, ProcessedChunk, StageLog, TableData,
    TextBlock,
};
use crate::error::IngestError;

/// Execution status of a DAG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not yet scheduled.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Success,
    /// Completed with a failure.
    Failed,
    /// Preconditions unmet; counts as completed for dependents.
    Skipped,
}

impl StageStatus {
    /// Whether dependents may proceed past this node.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns the lowercase status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Data produced by one stage execution.
///
/// `None` fields leave the context untouched; collection fields replace or
/// extend exactly the context fields the stage owns.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Replaces `ctx.raw_text`.
    pub raw_text: Option<String>,
    /// Replaces `ctx.blocks`.
    pub blocks: Option<Vec<TextBlock>>,
    /// Replaces `ctx.tables`.
    pub tables: Option<Vec<TableData>>,
    /// Replaces `ctx.segments`.
    pub segments: Option<Vec<DocumentSegment>>,
    /// Replaces `ctx.chunks`.
    pub chunks: Option<Vec<ProcessedChunk>>,
    /// Appended to `ctx.entities`.
    pub entities: Vec<Entity>,
    /// Sets `ctx.doc_type`.
    pub doc_type: Option<DocType>,
    /// Merged into `ctx.extracted_metadata`.
    pub metadata: serde_json::Map<String, Value>,
    /// Metrics set on the context.
    pub metrics: Vec<(String, Value)>,
    /// Sub-event logs (batch progress, fallbacks), appended before the
    /// stage's closing log entry.
    pub logs: Vec<StageLog>,
    /// Non-fatal errors recorded on the context.
    pub errors: Vec<String>,
}

impl StageOutput {
    /// Applies this output to the run context.
    pub fn merge_into(self, ctx: &mut IngestContext) {
        if let Some(raw_text) = self.raw_text {
            ctx.raw_text = raw_text;
        }
        if let Some(blocks) = self.blocks {
            ctx.blocks = blocks;
        }
        if let Some(tables) = self.tables {
            ctx.tables = tables;
        }
        if let Some(segments) = self.segments {
            ctx.segments = segments;
        }
        if let Some(chunks) = self.chunks {
            ctx.chunks = chunks;
        }
        if let Some(doc_type) = self.doc_type {
            ctx.doc_type = Some(doc_type);
        }
        ctx.entities.extend(self.entities);
        for (key, value) in self.metadata {
            ctx.extracted_metadata.insert(key, value);
        }
        for (key, value) in self.metrics {
            ctx.set_metric(&key, value);
        }
        for log in self.logs {
            ctx.add_log(log);
        }
        for error in self.errors {
            ctx.add_error(error);
        }
    }
}

/// A node in the ingestion DAG.
#[async_trait]
pub trait IngestStage: Send + Sync {
    /// Stage name, used in dependency wiring and logs.
    fn name(&self) -> &'static str;

    /// Names of stages that must complete before this one runs.
    fn dependencies(&self) -> &'static [&'static str];

    /// Critical stages abort the whole run on failure.
    fn is_critical(&self) -> bool {
        false
    }

    /// Precondition check; returning false marks the stage skipped.
    fn should_run(&self, ctx: &IngestContext) -> bool {
        let _ = ctx;
        true
    }

    /// Executes the stage against a read-only view of the context.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on stage failure; the runner decides whether
    /// the failure is fatal based on [`Self::is_critical`].
    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_stage_status_completion() {
        assert!(StageStatus::Success.is_complete());
        assert!(StageStatus::Failed.is_complete());
        assert!(StageStatus::Skipped.is_complete());
        assert!(!StageStatus::Pending.is_complete());
        assert!(!StageStatus::Running.is_complete());
    }

    #[test]
    fn test_stage_output_merge() {
        let mut ctx =
            IngestContext::new(1, PathBuf::from("/tmp/f.txt"), "f.txt".to_string(), 1);
        ctx.chunks.push(ProcessedChunk::new("old", 0));

        let mut output = StageOutput {
            raw_text: Some("text".to_string()),
            chunks: Some(vec![
                ProcessedChunk::new("a", 0),
                ProcessedChunk::new("b", 1),
            ]),
            doc_type: Some(DocType::Report),
            ..StageOutput::default()
        };
        output
            .metadata
            .insert("language".to_string(), serde_json::json!("eng"));
        output.metrics.push(("chunks_created".to_string(), serde_json::json!(2)));
        output.errors.push("soft failure".to_string());

        output.merge_into(&mut ctx);

        assert_eq!(ctx.raw_text, "text");
        assert_eq!(ctx.chunks.len(), 2);
        assert_eq!(ctx.doc_type, Some(DocType::Report));
        assert_eq!(ctx.extracted_metadata["language"], "eng");
        assert_eq!(ctx.metrics["chunks_created"], serde_json::json!(2));
        assert_eq!(ctx.errors.len(), 1);
    }

    #[test]
    fn test_stage_output_default_is_noop() {
        let mut ctx =
            IngestContext::new(1, PathBuf::from("/tmp/f.txt"), "f.txt".to_string(), 1);
        ctx.raw_text = "keep".to_string();
        ctx.blocks.push(TextBlock::new("b", crate::core::BlockType::Text));

        StageOutput::default().merge_into(&mut ctx);

        assert_eq!(ctx.raw_text, "keep");
        assert_eq!(ctx.blocks.len(), 1);
    }
}
