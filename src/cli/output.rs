//! Output formatting for CLI commands.
//!
//! Supports text and JSON output formats.

use std::fmt::Write;

use serde::Serialize;

use crate::agents::AnswerResponse;
use crate::core::{Document, IngestJob};
use crate::error::Error;
use crate::search::SearchHit;
use crate::service::IngestReport;
use crate::storage::StoreStats;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Parses format from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Formats an error for display.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => error.to_string(),
        OutputFormat::Json => format_json(&serde_json::json!({ "error": error.to_string() })),
    }
}

/// Formats an ingestion report.
#[must_use]
pub fn format_ingest_report(report: &IngestReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(report),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Document {} [{}]",
                report.document_id,
                report.status.as_str()
            );
            for log in &report.agent_logs {
                let duration = log
                    .duration_ms
                    .map(|ms| format!(" ({ms} ms)"))
                    .unwrap_or_default();
                let _ = writeln!(out, "  {:<10} {:<8} {}{duration}", log.agent, log.status, log.message);
            }
            out
        }
    }
}

/// Formats a document list.
#[must_use]
pub fn format_documents(documents: &[Document], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(&documents),
        OutputFormat::Text => {
            if documents.is_empty() {
                return "No documents found.\n".to_string();
            }
            let mut out = String::new();
            let _ = writeln!(out, "{:<6} {:<12} {:<10} {}", "ID", "Status", "Size", "Filename");
            for doc in documents {
                let _ = writeln!(
                    out,
                    "{:<6} {:<12} {:<10} {}",
                    doc.id,
                    doc.status.as_str(),
                    doc.size,
                    doc.filename
                );
            }
            out
        }
    }
}

/// Formats one document with its ingestion history.
#[must_use]
pub fn format_document(document: &Document, jobs: &[IngestJob], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(&serde_json::json!({
            "document": document,
            "jobs": jobs,
        })),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "Document {}", document.id);
            let _ = writeln!(out, "  Filename:  {}", document.filename);
            let _ = writeln!(out, "  Status:    {}", document.status.as_str());
            let _ = writeln!(out, "  Size:      {} bytes", document.size);
            if let Some(mime) = &document.mime {
                let _ = writeln!(out, "  MIME:      {mime}");
            }
            if !document.metadata.is_empty() {
                let _ = writeln!(
                    out,
                    "  Metadata:  {}",
                    serde_json::to_string(&document.metadata).unwrap_or_default()
                );
            }
            for job in jobs {
                let _ = writeln!(
                    out,
                    "  Job {}: {} ({} log entries)",
                    job.id,
                    job.status.as_str(),
                    job.logs.len()
                );
                if let Some(error) = &job.error {
                    let _ = writeln!(out, "    error: {error}");
                }
            }
            out
        }
    }
}

/// Formats search hits.
#[must_use]
pub fn format_hits(hits: &[SearchHit], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(&serde_json::json!({
            "results": hits,
            "total": hits.len(),
        })),
        OutputFormat::Text => {
            if hits.is_empty() {
                return "No results.\n".to_string();
            }
            let mut out = String::new();
            for hit in hits {
                let preview: String = hit.content.chars().take(120).collect();
                let _ = writeln!(
                    out,
                    "[{:.4}] {}#{} {}",
                    hit.score, hit.filename, hit.chunk_index, preview
                );
            }
            out
        }
    }
}

/// Formats an answer response.
#[must_use]
pub fn format_answer(response: &AnswerResponse, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(response),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "{}", response.answer);
            if let Some(summary) = &response.summary {
                let _ = writeln!(out, "\nSummary: {summary}");
            }
            if !response.citations.is_empty() {
                let _ = writeln!(out, "\nSources:");
                for citation in &response.citations {
                    let _ = writeln!(
                        out,
                        "  [{:.4}] {} (doc {})",
                        citation.score, citation.filename, citation.document_id
                    );
                }
            }
            let _ = writeln!(
                out,
                "\nVerdict: ok={} needs_more={} ({})",
                response.verdict.ok, response.verdict.needs_more, response.verdict.reason
            );
            out
        }
    }
}

/// Formats store statistics.
#[must_use]
pub fn format_stats(stats: &StoreStats, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(stats),
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str("docrag status\n");
            out.push_str("=============\n");
            let _ = writeln!(out, "  Documents:  {}", stats.document_count);
            let _ = writeln!(out, "  Chunks:     {}", stats.chunk_count);
            let _ = writeln!(out, "  Jobs:       {}", stats.job_count);
            let _ = writeln!(out, "  Schema:     v{}", stats.schema_version);
            if let Some(size) = stats.db_size {
                let _ = writeln!(out, "  DB size:    {size} bytes");
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentStatus;

    fn sample_document() -> Document {
        Document {
            id: 1,
            filename: "a.txt".to_string(),
            mime: Some("text/plain".to_string()),
            size: 42,
            owner_id: 1,
            status: DocumentStatus::Ready,
            metadata: serde_json::Map::new(),
            created_at: 0,
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("anything"), OutputFormat::Text);
    }

    #[test]
    fn test_format_documents_text() {
        let out = format_documents(&[sample_document()], OutputFormat::Text);
        assert!(out.contains("a.txt"));
        assert!(out.contains("ready"));
    }

    #[test]
    fn test_format_documents_empty() {
        let out = format_documents(&[], OutputFormat::Text);
        assert!(out.contains("No documents"));
    }

    #[test]
    fn test_format_documents_json_roundtrip() {
        let out = format_documents(&[sample_document()], OutputFormat::Json);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["filename"], "a.txt");
    }

    #[test]
    fn test_format_stats_text() {
        let stats = StoreStats {
            document_count: 2,
            chunk_count: 10,
            job_count: 3,
            schema_version: 1,
            db_size: None,
        };
        let out = format_stats(&stats, OutputFormat::Text);
        assert!(out.contains("Documents:  2"));
        assert!(out.contains("Chunks:     10"));
        assert!(!out.contains("DB size"));
    }

    #[test]
    fn test_format_error_json() {
        let err = Error::Config {
            message: "bad".to_string(),
        };
        let out = format_error(&err, OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("bad"));
    }
}
