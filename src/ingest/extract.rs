//! Extraction stage.
//!
//! Normalizes a supported file into ordered text blocks and tables. Format
//! parsers for PDF/Word/spreadsheets are external collaborators plugged in
//! through [`ExtractorCapability`]; plain-text and delimited-text
//! capabilities are built in. Image inputs route to an optional
//! [`OcrEngine`] gated by configuration.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use memmap2::Mmap;
use serde_json::json;

use super::{IngestStage, StageOutput};
use crate::core::{BlockType, IngestContext, TableData, TextBlock};
use crate::error::IngestError;

/// Files above this size are memory-mapped instead of read into a buffer.
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Supported input file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// PDF document.
    Pdf,
    /// Word document (doc/docx).
    Word,
    /// Spreadsheet (xls/xlsx).
    Spreadsheet,
    /// Delimited text (csv/tsv).
    Delimited,
    /// Raster image, needs OCR.
    Image,
    /// Plain text; the fall-through for unknown types.
    Plain,
}

impl FileKind {
    /// Detects the file kind from extension, then MIME hint.
    ///
    /// Unknown types fall through to [`FileKind::Plain`].
    #[must_use]
    pub fn detect(path: &Path, mime_hint: Option<&str>) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => return Self::Pdf,
            "doc" | "docx" => return Self::Word,
            "xls" | "xlsx" => return Self::Spreadsheet,
            "csv" | "tsv" => return Self::Delimited,
            "png" | "jpg" | "jpeg" | "tiff" | "bmp" => return Self::Image,
            "txt" | "md" | "log" => return Self::Plain,
            _ => {}
        }

        let mime = mime_hint.map(str::to_lowercase).unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_raw()
                .unwrap_or("")
                .to_lowercase()
        });

        if mime.contains("pdf") {
            Self::Pdf
        } else if mime.contains("word") {
            Self::Word
        } else if mime.contains("spreadsheet") || mime.contains("excel") {
            Self::Spreadsheet
        } else if mime.contains("csv") {
            Self::Delimited
        } else if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::Plain
        }
    }

    /// Returns the lowercase kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Spreadsheet => "spreadsheet",
            Self::Delimited => "delimited",
            Self::Image => "image",
            Self::Plain => "text",
        }
    }
}

/// A format-specific text extractor.
///
/// Implementations produce ordered blocks plus any structured tables; the
/// engine treats PDF/Word/spreadsheet parsers as external collaborators
/// behind this trait.
#[async_trait]
pub trait ExtractorCapability: Send + Sync {
    /// Extracts blocks and tables from the file.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Input`] on unreadable or malformed input.
    async fn extract(&self, path: &Path)
    -> Result<(Vec<TextBlock>, Vec<TableData>), IngestError>;
}

/// An OCR engine capability for image inputs.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognizes text from an image, one block per region.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on recognition failure.
    async fn recognize(&self, path: &Path) -> Result<Vec<TextBlock>, IngestError>;
}

/// Built-in plain-text capability.
///
/// Large files are memory-mapped; content must be valid UTF-8. Paragraphs
/// split on blank lines.
struct PlainTextExtractor;

#[async_trait]
impl ExtractorCapability for PlainTextExtractor {
    async fn extract(
        &self,
        path: &Path,
    ) -> Result<(Vec<TextBlock>, Vec<TableData>), IngestError> {
        let text = read_file_text(path)?;

        let blocks = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| TextBlock::new(p, BlockType::Paragraph))
            .collect();

        Ok((blocks, Vec::new()))
    }
}

/// Built-in delimited-text capability (CSV/TSV).
///
/// The first row becomes the header. The table is emitted structurally and
/// as one rendered text block so downstream text stages still see it.
struct DelimitedExtractor;

#[async_trait]
impl ExtractorCapability for DelimitedExtractor {
    async fn extract(
        &self,
        path: &Path,
    ) -> Result<(Vec<TextBlock>, Vec<TableData>), IngestError> {
        let text = read_file_text(path)?;
        let delimiter = detect_delimiter(&text);

        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(header_line) = lines.next() else {
            return Err(IngestError::Input {
                message: format!("empty delimited file: {}", path.display()),
            });
        };

        let headers = parse_delimited_line(header_line, delimiter);
        let rows: Vec<Vec<String>> = lines
            .map(|line| parse_delimited_line(line, delimiter))
            .collect();

        let mut table = TableData::new(headers, rows);
        table
            .metadata
            .insert("delimiter".to_string(), json!(delimiter.to_string()));

        let rendered = render_table_text(&table);
        let blocks = vec![TextBlock::new(rendered, BlockType::Table)];

        Ok((blocks, vec![table]))
    }
}

/// Renders a table as readable pipe-separated text.
pub(crate) fn render_table_text(table: &TableData) -> String {
    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    lines.push(table.headers.join(" | "));
    for row in &table.rows {
        lines.push(row.join(" | "));
    }
    lines.join("\n")
}

/// Picks the most frequent candidate delimiter in the first line.
fn detect_delimiter(text: &str) -> char {
    let first_line = text.lines().next().unwrap_or("");
    [';', '\t', ',']
        .into_iter()
        .max_by_key(|d| first_line.matches(*d).count())
        .filter(|d| first_line.contains(*d))
        .unwrap_or(',')
}

/// Splits one delimited line, honoring double-quoted fields.
fn parse_delimited_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Reads a file as UTF-8, memory-mapping large files.
fn read_file_text(path: &Path) -> Result<String, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::Input {
        message: format!("cannot open {}: {e}", path.display()),
    })?;
    let len = file
        .metadata()
        .map_err(|e| IngestError::Input {
            message: format!("cannot stat {}: {e}", path.display()),
        })?
        .len();

    if len >= MMAP_THRESHOLD {
        // SAFETY: the mapping is read-only and dropped before return;
        // concurrent truncation of an ingest upload is not supported.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| IngestError::Input {
            message: format!("cannot map {}: {e}", path.display()),
        })?;
        return std::str::from_utf8(&mmap)
            .map(str::to_string)
            .map_err(|e| IngestError::Input {
                message: format!("{} is not valid UTF-8: {e}", path.display()),
            });
    }

    std::fs::read_to_string(path).map_err(|e| IngestError::Input {
        message: format!("cannot read {}: {e}", path.display()),
    })
}

/// Extraction stage: routes by file kind to a capability.
pub struct ExtractStage {
    capabilities: HashMap<FileKind, Arc<dyn ExtractorCapability>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    ocr_enabled: bool,
}

impl ExtractStage {
    /// Creates the stage with the built-in plain/delimited capabilities.
    #[must_use]
    pub fn new(ocr_enabled: bool) -> Self {
        let mut capabilities: HashMap<FileKind, Arc<dyn ExtractorCapability>> = HashMap::new();
        capabilities.insert(FileKind::Plain, Arc::new(PlainTextExtractor));
        capabilities.insert(FileKind::Delimited, Arc::new(DelimitedExtractor));

        Self {
            capabilities,
            ocr: None,
            ocr_enabled,
        }
    }

    /// Registers an external capability for a file kind.
    #[must_use]
    pub fn with_capability(
        mut self,
        kind: FileKind,
        capability: Arc<dyn ExtractorCapability>,
    ) -> Self {
        self.capabilities.insert(kind, capability);
        self
    }

    /// Attaches an OCR engine for image inputs.
    #[must_use]
    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }
}

#[async_trait]
impl IngestStage for ExtractStage {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        if !ctx.file_path.exists() {
            return Err(IngestError::Input {
                message: format!("file does not exist: {}", ctx.file_path.display()),
            });
        }

        let kind = FileKind::detect(&ctx.file_path, ctx.mime_hint.as_deref());
        let mut output = StageOutput::default();

        let (blocks, tables) = if kind == FileKind::Image {
            // OCR is gated: a disabled or missing engine is a non-fatal
            // error that produces no blocks.
            match (&self.ocr, self.ocr_enabled) {
                (Some(engine), true) => match engine.recognize(&ctx.file_path).await {
                    Ok(blocks) => (blocks, Vec::new()),
                    // Only non-image extractor failures are fatal
                    Err(err) => {
                        output.errors.push(format!("OCR failed: {err}"));
                        (Vec::new(), Vec::new())
                    }
                },
                (_, false) => {
                    output
                        .errors
                        .push("OCR disabled, image skipped".to_string());
                    (Vec::new(), Vec::new())
                }
                (None, true) => {
                    output
                        .errors
                        .push("no OCR engine configured, image skipped".to_string());
                    (Vec::new(), Vec::new())
                }
            }
        } else {
            let capability =
                self.capabilities
                    .get(&kind)
                    .ok_or_else(|| IngestError::UnsupportedFile {
                        kind: kind.as_str().to_string(),
                    })?;
            capability.extract(&ctx.file_path).await?
        };

        let raw_text = blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        output.metrics.push((
            "extracted_blocks".to_string(),
            json!(blocks.len()),
        ));
        output
            .metrics
            .push(("extracted_tables".to_string(), json!(tables.len())));
        output
            .metrics
            .push(("raw_text_length".to_string(), json!(raw_text.len())));
        output
            .metadata
            .insert("file_kind".to_string(), json!(kind.as_str()));

        output.raw_text = Some(raw_text);
        output.blocks = Some(blocks);
        output.tables = Some(tables);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use test_case::test_case;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn ctx_for(path: PathBuf) -> IngestContext {
        let filename = path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        IngestContext::new(1, path, filename, 1)
    }

    #[test_case("report.pdf", FileKind::Pdf)]
    #[test_case("letter.docx", FileKind::Word)]
    #[test_case("sheet.xlsx", FileKind::Spreadsheet)]
    #[test_case("data.csv", FileKind::Delimited)]
    #[test_case("scan.png", FileKind::Image)]
    #[test_case("notes.txt", FileKind::Plain)]
    #[test_case("mystery.zzz", FileKind::Plain)]
    fn test_file_kind_detection(name: &str, expected: FileKind) {
        assert_eq!(FileKind::detect(Path::new(name), None), expected);
    }

    #[test]
    fn test_file_kind_from_mime_hint() {
        assert_eq!(
            FileKind::detect(Path::new("blob"), Some("application/pdf")),
            FileKind::Pdf
        );
        assert_eq!(
            FileKind::detect(Path::new("blob"), Some("image/png")),
            FileKind::Image
        );
    }

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "doc.txt", "First paragraph.\n\nSecond paragraph.\n");
        let ctx = ctx_for(path);

        let output = ExtractStage::new(true).process(&ctx).await.unwrap();
        let blocks = output.blocks.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "First paragraph.");
        assert_eq!(
            output.raw_text.unwrap(),
            "First paragraph.\n\nSecond paragraph."
        );
    }

    #[tokio::test]
    async fn test_delimited_extraction() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "data.csv",
            "name,amount\n\"Smith, John\",100\nJane,200\n",
        );
        let ctx = ctx_for(path);

        let output = ExtractStage::new(true).process(&ctx).await.unwrap();
        let tables = output.tables.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].headers, vec!["name", "amount"]);
        assert_eq!(tables[0].rows[0], vec!["Smith, John", "100"]);

        // The table is also visible as a rendered text block
        let blocks = output.blocks.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, BlockType::Table);
        assert!(blocks[0].text.contains("name | amount"));
    }

    #[tokio::test]
    async fn test_image_with_ocr_disabled_is_non_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "scan.png", "not really an image");
        let ctx = ctx_for(path);

        let output = ExtractStage::new(false).process(&ctx).await.unwrap();
        assert!(output.blocks.unwrap().is_empty());
        assert_eq!(output.errors.len(), 1);
        assert!(output.errors[0].contains("OCR disabled"));
    }

    #[tokio::test]
    async fn test_image_without_engine_is_non_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "scan.jpg", "bytes");
        let ctx = ctx_for(path);

        let output = ExtractStage::new(true).process(&ctx).await.unwrap();
        assert!(output.blocks.unwrap().is_empty());
        assert!(output.errors[0].contains("no OCR engine"));
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let ctx = ctx_for(PathBuf::from("/nonexistent/file.txt"));
        let result = ExtractStage::new(true).process(&ctx).await;
        assert!(matches!(result, Err(IngestError::Input { .. })));
    }

    #[tokio::test]
    async fn test_missing_capability_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "doc.pdf", "%PDF-1.4");
        let ctx = ctx_for(path);

        let result = ExtractStage::new(true).process(&ctx).await;
        assert!(matches!(result, Err(IngestError::UnsupportedFile { .. })));
    }

    #[tokio::test]
    async fn test_registered_capability_is_used() {
        struct StubPdf;

        #[async_trait]
        impl ExtractorCapability for StubPdf {
            async fn extract(
                &self,
                _path: &Path,
            ) -> Result<(Vec<TextBlock>, Vec<TableData>), IngestError> {
                Ok((
                    vec![TextBlock::on_page("From page one", BlockType::Paragraph, 1)],
                    Vec::new(),
                ))
            }
        }

        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "doc.pdf", "%PDF-1.4");
        let ctx = ctx_for(path);

        let stage = ExtractStage::new(true).with_capability(FileKind::Pdf, Arc::new(StubPdf));
        let output = stage.process(&ctx).await.unwrap();
        let blocks = output.blocks.unwrap();
        assert_eq!(blocks[0].text, "From page one");
        assert_eq!(blocks[0].page, Some(1));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a,b,c"), ',');
        assert_eq!(detect_delimiter("a;b;c"), ';');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("plain"), ',');
    }

    #[test]
    fn test_parse_delimited_line_quotes() {
        let fields = parse_delimited_line("\"a,b\",c,\"he said \"\"hi\"\"\"", ',');
        assert_eq!(fields, vec!["a,b", "c", "he said \"hi\""]);
    }

    #[test]
    fn test_read_large_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let content = "word ".repeat(300_000);
        let path = write_file(&dir, "big.txt", &content);
        assert!(std::fs::metadata(&path).unwrap().len() >= MMAP_THRESHOLD);

        let text = read_file_text(&path).unwrap();
        assert_eq!(text.len(), content.len());
    }
}
