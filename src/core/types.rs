//! In-memory artifacts produced by the ingestion pipeline.
//!
//! These types live inside an [`super::IngestContext`] for the duration of
//! one run; only chunks (with embeddings) are persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of an extracted text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    /// Body paragraph.
    Paragraph,
    /// Heading detected from style information.
    Heading,
    /// List item.
    List,
    /// Rendered table text.
    Table,
    /// OCR output.
    Ocr,
    /// Unclassified plain text.
    Text,
}

/// A block of extracted text with position metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    /// Block text.
    pub text: String,
    /// 1-based page number, when the source format has pages.
    pub page: Option<u32>,
    /// Position on the page as `{x, y, width, height}`, when available.
    pub position: Option<Value>,
    /// Block classification.
    pub block_type: BlockType,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
}

impl TextBlock {
    /// Creates a block with full confidence and no position data.
    #[must_use]
    pub fn new(text: impl Into<String>, block_type: BlockType) -> Self {
        Self {
            text: text.into(),
            page: None,
            position: None,
            block_type,
            confidence: 1.0,
        }
    }

    /// Creates a block anchored to a page.
    #[must_use]
    pub fn on_page(text: impl Into<String>, block_type: BlockType, page: u32) -> Self {
        Self {
            page: Some(page),
            ..Self::new(text, block_type)
        }
    }
}

/// Structural classification of a document segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    /// Heading with a hierarchy level.
    Heading,
    /// Grouped section.
    Section,
    /// Body paragraph.
    Paragraph,
    /// List content.
    List,
    /// Table content.
    Table,
}

/// A structured segment of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSegment {
    /// Segment text.
    pub text: String,
    /// Structural classification.
    pub segment_type: SegmentType,
    /// Hierarchy level: 0 = body, 1–3 = heading depth.
    pub level: u8,
    /// Free-form segment metadata.
    pub metadata: serde_json::Map<String, Value>,
}

impl DocumentSegment {
    /// Creates a segment with empty metadata.
    #[must_use]
    pub fn new(text: impl Into<String>, segment_type: SegmentType, level: u8) -> Self {
        Self {
            text: text.into(),
            segment_type,
            level,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Category of an extracted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// Calendar date.
    Date,
    /// Person name.
    Person,
    /// Organization name.
    Org,
    /// Monetary amount.
    Money,
    /// Geographic location.
    Location,
    /// Identifier (national ID, document number).
    Id,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Anything else.
    Other,
}

impl EntityType {
    /// Parses the uppercase entity-type name; unknown values map to `Other`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "DATE" => Self::Date,
            "PERSON" => Self::Person,
            "ORG" => Self::Org,
            "MONEY" => Self::Money,
            "LOCATION" => Self::Location,
            "ID" => Self::Id,
            "EMAIL" => Self::Email,
            "PHONE" => Self::Phone,
            _ => Self::Other,
        }
    }
}

/// An entity extracted from the document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Matched text.
    pub text: String,
    /// Entity category.
    pub entity_type: EntityType,
    /// Byte offset of the match start (0 when unknown).
    pub start: usize,
    /// Byte offset of the match end (0 when unknown).
    pub end: usize,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
}

/// A parsed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    /// Column headers.
    pub headers: Vec<String>,
    /// Row cells.
    pub rows: Vec<Vec<String>>,
    /// 1-based page number, when known.
    pub page: Option<u32>,
    /// Source rendering format hint.
    pub format: String,
    /// Free-form table metadata (gains `csv`/`json` renderings during
    /// normalization).
    pub metadata: serde_json::Map<String, Value>,
}

impl TableData {
    /// Creates a table with empty metadata and the default `csv` format hint.
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers,
            rows,
            page: None,
            format: "csv".to_string(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Detected document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Invoice / bill.
    Invoice,
    /// Contract / agreement.
    Contract,
    /// Report / analysis.
    Report,
    /// Email correspondence.
    Email,
    /// Memo / notice.
    Memo,
    /// Letter.
    Letter,
    /// Policy document.
    Policy,
    /// Manual / handbook.
    Manual,
    /// Unclassified.
    Other,
}

impl DocType {
    /// Parses the lowercase type name; unknown values map to `Other`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "invoice" => Self::Invoice,
            "contract" => Self::Contract,
            "report" => Self::Report,
            "email" => Self::Email,
            "memo" => Self::Memo,
            "letter" => Self::Letter,
            "policy" => Self::Policy,
            "manual" => Self::Manual,
            _ => Self::Other,
        }
    }

    /// Returns the lowercase type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Contract => "contract",
            Self::Report => "report",
            Self::Email => "email",
            Self::Memo => "memo",
            Self::Letter => "letter",
            Self::Policy => "policy",
            Self::Manual => "manual",
            Self::Other => "other",
        }
    }
}

/// A chunk flowing through deduplication, masking, and indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedChunk {
    /// Chunk text (post-masking once the masker has run).
    pub text: String,
    /// 0-based, contiguous index within the document.
    pub chunk_index: usize,
    /// Embedding vector, assigned by the indexer.
    pub embedding: Option<Vec<f32>>,
    /// Free-form chunk metadata.
    pub metadata: serde_json::Map<String, Value>,
    /// Marked by the deduplicator; duplicates are never persisted.
    pub is_duplicate: bool,
    /// Content hash of the retained original, for duplicates.
    pub deduplicated_with: Option<String>,
    /// Set when masking changed the text.
    pub pii_masked: bool,
}

impl ProcessedChunk {
    /// Creates a chunk at the given index.
    #[must_use]
    pub fn new(text: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            text: text.into(),
            chunk_index,
            embedding: None,
            metadata: serde_json::Map::new(),
            is_duplicate: false,
            deduplicated_with: None,
            pii_masked: false,
        }
    }

    /// Chunk length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether the chunk text is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_block_new() {
        let block = TextBlock::new("hello", BlockType::Paragraph);
        assert_eq!(block.text, "hello");
        assert_eq!(block.block_type, BlockType::Paragraph);
        assert!((block.confidence - 1.0).abs() < f32::EPSILON);
        assert!(block.page.is_none());
    }

    #[test]
    fn test_text_block_on_page() {
        let block = TextBlock::on_page("x", BlockType::Ocr, 3);
        assert_eq!(block.page, Some(3));
    }

    #[test]
    fn test_doc_type_roundtrip() {
        for name in [
            "invoice", "contract", "report", "email", "memo", "letter", "policy", "manual",
            "other",
        ] {
            assert_eq!(DocType::parse(name).as_str(), name);
        }
        assert_eq!(DocType::parse("mystery"), DocType::Other);
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("date"), EntityType::Date);
        assert_eq!(EntityType::parse("EMAIL"), EntityType::Email);
        assert_eq!(EntityType::parse("whatever"), EntityType::Other);
    }

    #[test]
    fn test_processed_chunk_defaults() {
        let chunk = ProcessedChunk::new("text", 0);
        assert!(!chunk.is_duplicate);
        assert!(!chunk.pii_masked);
        assert!(chunk.embedding.is_none());
        assert_eq!(chunk.len(), 4);
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_block_type_serialization() {
        let json = serde_json::to_string(&BlockType::Heading).unwrap();
        assert_eq!(json, "\"heading\"");
    }

    #[test]
    fn test_entity_type_serialization() {
        let json = serde_json::to_string(&EntityType::Email).unwrap();
        assert_eq!(json, "\"EMAIL\"");
    }
}
