//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docrag: retrieval-augmented question answering over your documents.
///
/// Ingests files through an agentic pipeline (extraction, structuring,
/// deduplication, PII masking, embedding) and answers questions with
/// hybrid retrieval plus a judge-driven generation loop.
#[derive(Parser, Debug)]
#[command(name = "docrag")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the SQLite database file.
    ///
    /// An optional `sqlite://` scheme prefix is accepted and stripped.
    #[arg(short, long, env = "DATABASE_URL")]
    pub db_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Owner id queries and ingestion are scoped to.
    #[arg(long, default_value_t = 1, global = true)]
    pub owner: i64,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the database.
    Init {
        /// Force re-initialization (destroys existing data).
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest a document through the full pipeline.
    Ingest {
        /// Path to the file to ingest.
        file: PathBuf,
    },

    /// Ask a question over the ingested documents.
    Ask {
        /// The question.
        query: String,

        /// Number of chunks to retrieve.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Also produce a two-sentence summary of the answer.
        #[arg(short, long)]
        summarize: bool,
    },

    /// Search the ingested chunks without generating an answer.
    Search {
        /// The search query.
        query: String,

        /// Number of chunks to return.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// List ingested documents.
    #[command(name = "list", alias = "ls")]
    ListDocuments,

    /// Show a document and its ingestion history.
    #[command(name = "show")]
    ShowDocument {
        /// Document id.
        id: i64,
    },

    /// Delete a document and its chunks.
    #[command(name = "delete", alias = "rm")]
    DeleteDocument {
        /// Document id.
        id: i64,
    },

    /// Delete all documents for the owner.
    DeleteAll {
        /// Skip confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show store statistics.
    Status,
}
