//! CLI command execution.

use crate::cli::output::{
    OutputFormat, format_answer, format_document, format_documents, format_hits,
    format_ingest_report, format_stats,
};
use crate::cli::parser::{Cli, Commands};
use crate::config::{Settings, strip_sqlite_scheme};
use crate::error::{Error, StorageError};
use crate::service::RagService;
use crate::storage::DocumentStore;

/// Executes the parsed CLI command and returns the rendered output.
///
/// # Errors
///
/// Returns an error on configuration problems, storage failures, or
/// pipeline errors; the caller maps it to a non-zero exit code.
pub async fn execute(cli: &Cli) -> Result<String, Error> {
    let format = OutputFormat::parse(&cli.format);

    let mut settings = Settings::from_env()?;
    // clap sources db_path from --db-path or DATABASE_URL
    if let Some(db_path) = &cli.db_path {
        settings.db_path =
            std::path::PathBuf::from(strip_sqlite_scheme(&db_path.to_string_lossy()));
    }

    match &cli.command {
        Commands::Init { force } => init(&settings, *force, format),
        Commands::Ingest { file } => {
            let service = open_service(settings)?;
            let report = service.ingest_file(file, cli.owner).await?;
            Ok(format_ingest_report(&report, format))
        }
        Commands::Ask {
            query,
            top_k,
            summarize,
        } => {
            let service = open_service(settings)?;
            let response = service.answer(query, cli.owner, *top_k, *summarize).await?;
            Ok(format_answer(&response, format))
        }
        Commands::Search { query, top_k } => {
            let service = open_service(settings)?;
            let hits = service.search(query, cli.owner, *top_k).await?;
            Ok(format_hits(&hits, format))
        }
        Commands::ListDocuments => {
            let service = open_service(settings)?;
            let documents = service.documents(cli.owner).await?;
            Ok(format_documents(&documents, format))
        }
        Commands::ShowDocument { id } => {
            let service = open_service(settings)?;
            match service.document(*id, cli.owner).await? {
                Some((document, jobs)) => Ok(format_document(&document, &jobs, format)),
                None => Err(StorageError::DocumentNotFound { id: *id }.into()),
            }
        }
        Commands::DeleteDocument { id } => {
            let service = open_service(settings)?;
            if service.delete_document(*id, cli.owner).await? {
                Ok(format!("Deleted document {id}\n"))
            } else {
                Err(StorageError::DocumentNotFound { id: *id }.into())
            }
        }
        Commands::DeleteAll { yes } => {
            if !*yes {
                return Ok(
                    "Refusing to delete all documents without --yes confirmation.\n".to_string(),
                );
            }
            let service = open_service(settings)?;
            let deleted = service.delete_all(cli.owner).await?;
            Ok(format!("Deleted {deleted} document(s)\n"))
        }
        Commands::Status => {
            let mut store = DocumentStore::open(&settings.db_path)?;
            store.init()?;
            let stats = store.stats()?;
            Ok(format_stats(&stats, format))
        }
    }
}

fn init(settings: &Settings, force: bool, format: OutputFormat) -> Result<String, Error> {
    let mut store = DocumentStore::open(&settings.db_path)?;
    store.init()?;
    if force {
        store.reset()?;
    }

    let stats = store.stats()?;
    let mut out = format!("Initialized database at {}\n", settings.db_path.display());
    out.push_str(&format_stats(&stats, format));
    Ok(out)
}

fn open_service(settings: Settings) -> Result<RagService, Error> {
    RagService::open(settings)
}
