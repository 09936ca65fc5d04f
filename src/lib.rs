//! # docrag
//!
//! Retrieval-augmented question answering over user-uploaded documents.
//!
//! Two tightly-coupled subsystems do the heavy lifting:
//!
//! - **The ingestion DAG**: a dependency-ordered, partially parallel
//!   pipeline turning a raw file into deduplicated, PII-masked, embedded,
//!   and indexed chunks, with per-stage logging and failure propagation.
//! - **The agentic retrieval pipeline**: plan → rewrite → federated search
//!   with Reciprocal Rank Fusion → generate → judge → conditional
//!   re-retrieval, producing an answer plus citations.
//!
//! Both share a vector+lexical hybrid search core over a `SQLite` store.
//! LLM completion, embeddings, OCR, and rich-format parsers are external
//! capabilities behind traits; plain-text and delimited-text extraction
//! ship built in, and a deterministic hashed embedder is available for
//! development behind an explicit flag.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped file reads (memmap2)
#![warn(unsafe_code)]

pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod search;
pub mod service;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Core domain types
pub use core::{Document, DocumentStatus, IngestContext, IngestJob, ProcessedChunk};

// Configuration
pub use config::{Settings, Strictness};

// Engine facade
pub use service::{IngestReport, RagService};

// Search types
pub use search::{RrfConfig, SearchHit, reciprocal_rank_fusion};

// Agent types
pub use agents::{AnswerResponse, Citation, Verdict};

// Storage
pub use storage::{DocumentStore, StoreStats};
