//! Error types for docrag operations.
//!
//! Provides a layered error hierarchy using `thiserror` covering storage,
//! ingestion, embedding, and agent operations.

use thiserror::Error;

/// Result type alias for docrag operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for docrag operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors (database operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ingestion pipeline errors.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Embedding capability errors.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Agent / LLM capability errors.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Storage-specific errors for database operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Storage not initialized (init command not run).
    #[error("database not initialized. Run: docrag init")]
    NotInitialized,

    /// Document not found by id.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// Document id that was not found.
        id: i64,
    },

    /// Ingest job not found by id.
    #[error("ingest job not found: {id}")]
    JobNotFound {
        /// Job id that was not found.
        id: i64,
    },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Transaction commit/rollback error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Ingestion pipeline errors, mapped onto the pipeline failure taxonomy.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Malformed or unreadable input file.
    #[error("input error: {message}")]
    Input {
        /// Description of the input problem.
        message: String,
    },

    /// No extractor capability registered for the detected file kind.
    #[error("no extractor capability for {kind}")]
    UnsupportedFile {
        /// Detected file kind name.
        kind: String,
    },

    /// A required external capability is missing or failed.
    #[error("capability unavailable: {capability}")]
    CapabilityUnavailable {
        /// Name of the missing capability.
        capability: String,
    },

    /// Internal data inconsistency (e.g. chunk/embedding count mismatch).
    #[error("data error: {message}")]
    Data {
        /// Description of the inconsistency.
        message: String,
    },

    /// DAG execution cannot make progress (cycle or wiring bug).
    #[error("DAG stuck with {pending} pending stage(s) - circular dependency?")]
    DagStuck {
        /// Number of stages that never became ready.
        pending: usize,
    },

    /// The run was cancelled at a stage boundary.
    #[error("ingestion cancelled")]
    Cancelled,

    /// Stage-level failure with context.
    #[error("{stage} failed: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: &'static str,
        /// Failure description.
        message: String,
    },
}

/// Embedding capability errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// No embedding backend available (no API key, dev fallback not enabled).
    #[error(
        "no embedding backend: set OPENAI_API_KEY or enable DOCRAG_DEV_EMBEDDINGS for development"
    )]
    NoBackend,

    /// Embedding API request failed.
    #[error("embedding request failed: {message}")]
    Request {
        /// Provider error description.
        message: String,
    },

    /// The provider returned a different number of vectors than requested.
    #[error("embedding count mismatch: got {got}, expected {expected}")]
    CountMismatch {
        /// Number of vectors returned.
        got: usize,
        /// Number of texts submitted.
        expected: usize,
    },

    /// Embedding request exceeded the configured timeout.
    #[error("embedding request timed out after {secs}s")]
    Timeout {
        /// Configured timeout in seconds.
        secs: u64,
    },
}

/// Agent / LLM capability errors.
#[derive(Error, Debug)]
pub enum AgentError {
    /// No API key configured for the LLM provider.
    #[error("no API key configured (OPENAI_API_KEY)")]
    ApiKeyMissing,

    /// API request failure.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Provider error description.
        message: String,
    },

    /// The model response could not be parsed.
    #[error("failed to parse model response: {message}")]
    Parse {
        /// Parse error description.
        message: String,
    },

    /// LLM request exceeded the configured timeout.
    #[error("LLM request timed out after {secs}s")]
    Timeout {
        /// Configured timeout in seconds.
        secs: u64,
    },

    /// Query validation failure.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Validation error description.
        message: String,
    },
}

// From impls for common library errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<EmbeddingError> for IngestError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::CountMismatch { got, expected } => Self::Data {
                message: format!("embedding count mismatch: got {got}, expected {expected}"),
            },
            other => Self::CapabilityUnavailable {
                capability: format!("embedding ({other})"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config {
            message: "bad value".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NotInitialized;
        assert_eq!(err.to_string(), "database not initialized. Run: docrag init");

        let err = StorageError::DocumentNotFound { id: 7 };
        assert_eq!(err.to_string(), "document not found: 7");
    }

    #[test]
    fn test_ingest_error_display() {
        let err = IngestError::DagStuck { pending: 3 };
        assert!(err.to_string().contains("3 pending"));

        let err = IngestError::UnsupportedFile {
            kind: "pdf".to_string(),
        };
        assert_eq!(err.to_string(), "no extractor capability for pdf");

        let err = IngestError::Stage {
            stage: "extract",
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "extract failed: boom");
    }

    #[test]
    fn test_embedding_error_display() {
        let err = EmbeddingError::CountMismatch {
            got: 3,
            expected: 5,
        };
        assert!(err.to_string().contains("got 3"));
        assert!(err.to_string().contains("expected 5"));
    }

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::Timeout { secs: 120 };
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn test_error_from_storage() {
        let err: Error = StorageError::NotInitialized.into();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_error_from_ingest() {
        let err: Error = IngestError::Cancelled.into();
        assert!(matches!(err, Error::Ingest(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_count_mismatch_becomes_data_error() {
        let err: IngestError = EmbeddingError::CountMismatch {
            got: 1,
            expected: 2,
        }
        .into();
        assert!(matches!(err, IngestError::Data { .. }));
    }

    #[test]
    fn test_request_failure_becomes_capability_error() {
        let err: IngestError = EmbeddingError::Request {
            message: "503".to_string(),
        }
        .into();
        assert!(matches!(err, IngestError::CapabilityUnavailable { .. }));
    }
}
