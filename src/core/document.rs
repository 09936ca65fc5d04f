//! Documents, ingest jobs, and their log entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Row created, ingestion not started.
    Pending,
    /// Ingestion in progress.
    Processing,
    /// Ingestion completed; chunks are searchable.
    Ready,
    /// Ingestion failed.
    Error,
}

impl DocumentStatus {
    /// Parses the lowercase status name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "ready" => Self::Ready,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }

    /// Returns the lowercase status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Storage-assigned identifier.
    pub id: i64,
    /// Original filename.
    pub filename: String,
    /// MIME type, when detected.
    pub mime: Option<String>,
    /// File size in bytes.
    pub size: u64,
    /// Owning user id; every read is scoped to it.
    pub owner_id: i64,
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// Extracted metadata (doc type, entities summary, embedding model, ...).
    pub metadata: serde_json::Map<String, Value>,
    /// Unix timestamp of row creation.
    pub created_at: i64,
}

/// Status of an ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job in progress.
    Running,
    /// Pipeline finished without a critical failure.
    Completed,
    /// Pipeline aborted.
    Failed,
}

impl JobStatus {
    /// Parses the lowercase status name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }

    /// Returns the lowercase status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One log entry emitted by a pipeline stage.
///
/// Entries are append-only within a job; concurrent stages interleave but
/// each stage's own entries stay ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLog {
    /// Stage name.
    pub agent: String,
    /// Outcome or sub-event status (`success`, `failed`, `skipped`, `info`).
    pub status: String,
    /// Human-readable message.
    pub message: String,
    /// Stage wall-clock in milliseconds, when the entry closes a stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Structured extras (error text, batch counters, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl StageLog {
    /// Creates a log entry stamped with the current time.
    #[must_use]
    pub fn now(agent: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            status: status.to_string(),
            message: message.into(),
            duration_ms: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            extra: None,
        }
    }

    /// Attaches a duration to the entry.
    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attaches structured extras to the entry.
    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// An ingestion run, one-to-one with a pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    /// Storage-assigned identifier.
    pub id: i64,
    /// Document this run ingested.
    pub document_id: i64,
    /// Job status.
    pub status: JobStatus,
    /// Append-only stage logs, snapshotted from the run context.
    pub logs: Vec<StageLog>,
    /// Terminal error, for failed jobs.
    pub error: Option<String>,
    /// Unix timestamp when the run started.
    pub started_at: i64,
    /// Unix timestamp when the run finished.
    pub completed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Error,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_stage_log_builder() {
        let log = StageLog::now("extract", "success", "done")
            .with_duration(42)
            .with_extra(serde_json::json!({"blocks": 3}));
        assert_eq!(log.agent, "extract");
        assert_eq!(log.duration_ms, Some(42));
        assert!(log.extra.is_some());
        assert!(!log.timestamp.is_empty());
    }

    #[test]
    fn test_stage_log_serialization_omits_empty() {
        let log = StageLog::now("meta", "info", "x");
        let json = serde_json::to_string(&log).unwrap();
        assert!(!json.contains("duration_ms"));
        assert!(!json.contains("extra"));
    }
}
