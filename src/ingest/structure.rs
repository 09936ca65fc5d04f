//! Structuring stage.
//!
//! Segments extracted blocks into hierarchical segments and produces
//! sentence-aware chunks with overlap. Segmentation uses a completion
//! model when one is configured and falls back to formatting heuristics.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use unicode_segmentation::UnicodeSegmentation;

use super::{IngestStage, StageOutput};
use crate::agents::{LlmProvider, strip_code_fences, user_message};
use crate::core::{
    BlockType, DocumentSegment, IngestContext, ProcessedChunk, SegmentType, TextBlock,
};
use crate::error::IngestError;

/// Number of leading blocks sampled for model-based segmentation.
const SEGMENTATION_SAMPLE_BLOCKS: usize = 10;
/// Character cap on the segmentation sample.
const SEGMENTATION_SAMPLE_CHARS: usize = 3000;

/// Chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap carried into the next chunk, in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").unwrap_or_else(|_| unreachable!()))
}

/// Splits text into sentences at `[.!?]\s+` boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut last = 0;

    for m in sentence_boundary().find_iter(text) {
        // The punctuation character is one byte; keep it with its sentence.
        let end = m.start() + 1;
        let sentence = text[last..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last = m.end();
    }

    let tail = text[last..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Takes the overlap tail of an emitted chunk.
///
/// The last `overlap` characters, advanced past the first sentence
/// boundary within that slice so the next chunk does not start
/// mid-sentence; the raw tail is kept when no boundary exists.
fn overlap_tail(text: &str, overlap: usize) -> String {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= overlap {
        return text.to_string();
    }

    let tail: String = graphemes[graphemes.len() - overlap..].concat();
    match sentence_boundary().find(&tail) {
        Some(m) => tail[m.end()..].to_string(),
        None => tail,
    }
}

/// Chunks text by greedy sentence accumulation.
///
/// Sentences accumulate until adding the next one would exceed
/// `chunk_size` with a non-empty buffer; the buffer is then emitted
/// (trimmed) and the next chunk starts with the overlap tail. Chunk
/// indices are 0-based and contiguous.
#[must_use]
pub fn chunk_sentences(text: &str, config: &ChunkingConfig) -> Vec<ProcessedChunk> {
    let mut chunks = Vec::new();
    if text.trim().is_empty() {
        return chunks;
    }

    let mut current = String::new();
    let mut chunk_index = 0;

    let mut emit = |buffer: &str, index: usize| {
        let mut chunk = ProcessedChunk::new(buffer.trim(), index);
        chunk
            .metadata
            .insert("char_count".to_string(), json!(buffer.chars().count()));
        chunk
            .metadata
            .insert("source".to_string(), json!("structure"));
        chunks.push(chunk);
    };

    for sentence in split_sentences(text) {
        let would_exceed = current.chars().count() + sentence.chars().count()
            > config.chunk_size;
        if would_exceed && !current.is_empty() {
            emit(&current, chunk_index);
            let overlap = overlap_tail(&current, config.overlap);
            current = if overlap.is_empty() {
                sentence.to_string()
            } else {
                format!("{overlap} {sentence}")
            };
            chunk_index += 1;
        } else if current.is_empty() {
            current = sentence.to_string();
        } else {
            current.push(' ');
            current.push_str(sentence);
        }
    }

    if !current.trim().is_empty() {
        emit(&current, chunk_index);
    }

    chunks
}

fn bullet_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+\.|\d+\)|\*|-|•)").unwrap_or_else(|_| unreachable!()))
}

fn numeric_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(\.\d+)*").unwrap_or_else(|_| unreachable!()))
}

/// Heading heuristic: short, no trailing period, and either a
/// numeric/bullet prefix or title case.
fn is_heading(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() > 100 || trimmed.ends_with('.') {
        return false;
    }
    if bullet_prefix().is_match(trimmed) {
        return true;
    }
    is_title_case(trimmed)
}

/// Whether every alphabetic word is capitalized with a lowercase remainder.
fn is_title_case(text: &str) -> bool {
    let mut saw_word = false;
    for word in text.split_whitespace() {
        let mut chars = word.chars().filter(|c| c.is_alphabetic());
        match chars.next() {
            Some(first) => {
                saw_word = true;
                if !first.is_uppercase() || chars.any(char::is_uppercase) {
                    return false;
                }
            }
            None => continue,
        }
    }
    saw_word
}

/// Heading level from a numeric prefix: dots + 1, capped at 3.
#[allow(clippy::cast_possible_truncation)]
fn heading_level(text: &str) -> u8 {
    numeric_prefix()
        .find(text.trim())
        .map_or(1, |m| (m.as_str().matches('.').count() + 1).min(3) as u8)
}

/// Model response shape for segmentation.
#[derive(Debug, Deserialize)]
struct SegmentationResponse {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default)]
    segment_type: String,
    #[serde(default)]
    level: u8,
    #[serde(default)]
    summary: String,
}

/// Structuring stage.
pub struct StructureStage {
    llm: Option<Arc<dyn LlmProvider>>,
    config: ChunkingConfig,
}

impl StructureStage {
    /// Creates the stage with an optional completion model.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, config: ChunkingConfig) -> Self {
        Self { llm, config }
    }

    async fn llm_segmentation(
        llm: &dyn LlmProvider,
        blocks: &[TextBlock],
    ) -> Result<Vec<DocumentSegment>, IngestError> {
        let sample: String = blocks
            .iter()
            .take(SEGMENTATION_SAMPLE_BLOCKS)
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
            .chars()
            .take(SEGMENTATION_SAMPLE_CHARS)
            .collect();

        let prompt = format!(
            "Analyze the structure of the following document text:\n\n{sample}\n\n\
             Respond with JSON:\n\
             {{\"segments\": [{{\"type\": \"heading|section|paragraph\", \"level\": 0-3, \
             \"text\": \"...\", \"summary\": \"...\"}}]}}\n\n\
             Rules:\n\
             - Detect headings and their hierarchy level (1=main, 2=sub, 3=section)\n\
             - Group paragraphs into sections\n\
             - Summarize each segment in 1-2 sentences"
        );

        let response = llm
            .complete_simple(&[user_message(&prompt)])
            .await
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion ({e})"),
            })?;

        let parsed: SegmentationResponse = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| IngestError::CapabilityUnavailable {
                capability: format!("completion (bad segmentation JSON: {e})"),
            })?;

        let segments = parsed
            .segments
            .into_iter()
            .filter(|raw| !raw.text.trim().is_empty())
            .map(|raw| {
                let segment_type = match raw.segment_type.as_str() {
                    "heading" => SegmentType::Heading,
                    "section" => SegmentType::Section,
                    "list" => SegmentType::List,
                    "table" => SegmentType::Table,
                    _ => SegmentType::Paragraph,
                };
                let mut segment =
                    DocumentSegment::new(raw.text, segment_type, raw.level.min(3));
                segment
                    .metadata
                    .insert("summary".to_string(), json!(raw.summary));
                segment.metadata.insert("source".to_string(), json!("llm"));
                segment
            })
            .collect::<Vec<_>>();

        if segments.is_empty() {
            return Err(IngestError::CapabilityUnavailable {
                capability: "completion (empty segmentation)".to_string(),
            });
        }
        Ok(segments)
    }

    fn heuristic_segmentation(blocks: &[TextBlock]) -> Vec<DocumentSegment> {
        blocks
            .iter()
            .map(|block| {
                let (segment_type, level) = match block.block_type {
                    BlockType::Heading => (SegmentType::Heading, 1),
                    BlockType::Table => (SegmentType::Table, 0),
                    BlockType::List => (SegmentType::List, 0),
                    _ => {
                        if is_heading(&block.text) {
                            (SegmentType::Heading, heading_level(&block.text))
                        } else if block.text.chars().count() < 50
                            && !block.text.is_empty()
                            && block
                                .text
                                .chars()
                                .filter(|c| c.is_alphabetic())
                                .all(char::is_uppercase)
                            && block.text.chars().any(char::is_alphabetic)
                        {
                            // Short all-caps text reads as a heading
                            (SegmentType::Heading, 2)
                        } else {
                            (SegmentType::Paragraph, 0)
                        }
                    }
                };

                let mut segment = DocumentSegment::new(&block.text, segment_type, level);
                segment
                    .metadata
                    .insert("source".to_string(), json!("heuristic"));
                segment
                    .metadata
                    .insert("block_type".to_string(), json!(block.block_type));
                segment
            })
            .collect()
    }
}

#[async_trait]
impl IngestStage for StructureStage {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["extract"]
    }

    fn should_run(&self, ctx: &IngestContext) -> bool {
        !ctx.blocks.is_empty()
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        let mut output = StageOutput::default();

        let segments = if let Some(llm) = &self.llm {
            match Self::llm_segmentation(llm.as_ref(), &ctx.blocks).await {
                Ok(segments) => segments,
                Err(err) => {
                    output
                        .errors
                        .push(format!("model segmentation failed ({err}), using heuristics"));
                    Self::heuristic_segmentation(&ctx.blocks)
                }
            }
        } else {
            Self::heuristic_segmentation(&ctx.blocks)
        };

        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        if full_text.trim().is_empty() {
            output.errors.push("no text available for chunking".to_string());
            output.segments = Some(segments);
            output.chunks = Some(Vec::new());
            return Ok(output);
        }

        let chunks = chunk_sentences(&full_text, &self.config);

        output
            .metrics
            .push(("segments".to_string(), json!(segments.len())));
        output
            .metrics
            .push(("chunks_created".to_string(), json!(chunks.len())));
        output.segments = Some(segments);
        output.chunks = Some(chunks);
        Ok(output)
    }
}
