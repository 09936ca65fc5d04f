//! Engine facade.
//!
//! [`RagService`] wires the store, the embedding and completion
//! capabilities, and the extractor registry, and exposes the two core
//! operations: `ingest_file` (the DAG) and `answer` (the agentic
//! retrieval pipeline), plus document management.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::{
    AnswerPipeline, AnswerResponse, LlmProvider, OpenAiChatProvider, PipelineConfig,
};
use crate::config::Settings;
use crate::core::{Document, DocumentStatus, IngestContext, IngestJob, JobStatus, StageLog};
use crate::embedding::{EmbeddingProvider, create_embedder};
use crate::error::{Error, IngestError};
use crate::ingest::{
    ChunkingConfig, DagRunner, DedupStage, ExtractStage, ExtractorCapability, FileKind,
    IndexStage, MetaStage, OcrEngine, PiiConfig, PiiStage, StructureStage, TableStage,
};
use crate::search::{SearchHit, search};
use crate::storage::{DocumentStore, StoreStats};

/// Result of one ingestion run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    /// Ingested document id.
    pub document_id: i64,
    /// Ingest job id.
    pub job_id: i64,
    /// Final document status.
    pub status: DocumentStatus,
    /// Stage logs captured during the run.
    pub agent_logs: Vec<StageLog>,
}

/// The document QA engine.
pub struct RagService {
    settings: Settings,
    store: Arc<Mutex<DocumentStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    extractors: HashMap<FileKind, Arc<dyn ExtractorCapability>>,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl RagService {
    /// Opens the engine against the configured database.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid settings, a missing embedding backend,
    /// or storage failures.
    pub fn open(settings: Settings) -> Result<Self, Error> {
        settings.validate()?;
        let mut store = DocumentStore::open(&settings.db_path)?;
        store.init()?;
        Self::with_store(settings, store)
    }

    /// Opens the engine over an in-memory database, used in tests.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid settings or a missing embedding backend.
    pub fn in_memory(settings: Settings) -> Result<Self, Error> {
        settings.validate()?;
        let mut store = DocumentStore::in_memory()?;
        store.init()?;
        Self::with_store(settings, store)
    }

    fn with_store(settings: Settings, store: DocumentStore) -> Result<Self, Error> {
        let embedder = create_embedder(&settings)?;

        let llm: Option<Arc<dyn LlmProvider>> = settings.openai_api_key.as_ref().map(|key| {
            Arc::new(OpenAiChatProvider::new(
                key,
                settings.openai_base_url.as_deref(),
                &settings.chat_model,
                settings.llm_timeout,
            )) as Arc<dyn LlmProvider>
        });

        Ok(Self {
            settings,
            store: Arc::new(Mutex::new(store)),
            embedder,
            llm,
            extractors: HashMap::new(),
            ocr: None,
        })
    }

    /// Registers an external extractor capability (PDF, Word, ...).
    #[must_use]
    pub fn with_extractor(
        mut self,
        kind: FileKind,
        capability: Arc<dyn ExtractorCapability>,
    ) -> Self {
        self.extractors.insert(kind, capability);
        self
    }

    /// Attaches an OCR engine for image inputs.
    #[must_use]
    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    /// Replaces the completion provider, used in tests.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    fn build_dag(&self) -> DagRunner {
        let mut extract = ExtractStage::new(self.settings.ocr_enabled);
        for (kind, capability) in &self.extractors {
            extract = extract.with_capability(*kind, Arc::clone(capability));
        }
        if let Some(ocr) = &self.ocr {
            extract = extract.with_ocr(Arc::clone(ocr));
        }

        let chunking = ChunkingConfig {
            chunk_size: self.settings.chunk_size,
            overlap: self.settings.chunk_overlap,
        };

        DagRunner::new(vec![
            Arc::new(extract),
            Arc::new(StructureStage::new(self.llm.clone(), chunking)),
            Arc::new(MetaStage::new(self.llm.clone())),
            Arc::new(TableStage::new(self.llm.clone())),
            Arc::new(DedupStage::new(
                self.settings.dedup_threshold,
                self.settings.shingle_size,
            )),
            Arc::new(PiiStage::new(PiiConfig::default())),
            Arc::new(IndexStage::new(
                Arc::clone(&self.store),
                Arc::clone(&self.embedder),
                self.settings.embed_batch_size,
            )),
        ])
    }

    /// Ingests a file for an owner, running the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error for oversized or unreadable inputs and on fatal
    /// pipeline failures; non-critical stage failures are reported through
    /// the returned logs instead.
    pub async fn ingest_file(&self, path: &Path, owner_id: i64) -> Result<IngestReport, Error> {
        self.ingest_file_with_cancel(path, owner_id, &CancellationToken::new())
            .await
    }

    /// Ingests a file with an external cancellation signal.
    ///
    /// Cancellation is honored at stage boundaries; an interrupted run
    /// leaves the document in `error` state with nothing persisted.
    ///
    /// # Errors
    ///
    /// Returns an error as [`Self::ingest_file`], plus
    /// [`IngestError::Cancelled`] when interrupted.
    pub async fn ingest_file_with_cancel(
        &self,
        path: &Path,
        owner_id: i64,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, Error> {
        let size = std::fs::metadata(path)
            .map_err(|e| IngestError::Input {
                message: format!("cannot stat {}: {e}", path.display()),
            })?
            .len();
        if size > self.settings.upload_max_size {
            return Err(IngestError::Input {
                message: format!(
                    "file size {size} exceeds limit {}",
                    self.settings.upload_max_size
                ),
            }
            .into());
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(path).first_raw();

        let (document_id, job_id) = {
            let mut store = self.store.lock().await;
            let document_id = store.insert_document(&filename, mime, size, owner_id)?;
            let job_id = store.create_job(document_id)?;
            store.set_document_status(document_id, DocumentStatus::Processing)?;
            (document_id, job_id)
        };

        info!(document_id, filename = %filename, "ingestion started");

        let mut ctx =
            IngestContext::new(document_id, path.to_path_buf(), filename, owner_id);
        ctx.mime_hint = mime.map(ToString::to_string);

        let run = self.build_dag().run(&mut ctx, cancel).await;

        let (status, job_status, error) = match &run {
            Ok(report) if report.succeeded() => {
                (DocumentStatus::Ready, JobStatus::Completed, None)
            }
            Ok(report) => {
                let failed = report.critical_failure.unwrap_or("pipeline");
                (
                    DocumentStatus::Error,
                    JobStatus::Failed,
                    Some(format!("critical failure in {failed}")),
                )
            }
            Err(err) => (
                DocumentStatus::Error,
                JobStatus::Failed,
                Some(err.to_string()),
            ),
        };

        {
            let mut store = self.store.lock().await;
            store.set_document_status(document_id, status)?;
            store.finish_job(job_id, job_status, &ctx.logs, error.as_deref())?;

            if status == DocumentStatus::Ready {
                let mut metadata = ctx.extracted_metadata.clone();
                if let Some(doc_type) = ctx.doc_type {
                    metadata.insert("doc_type".to_string(), serde_json::json!(doc_type));
                }
                store.merge_document_metadata(document_id, &metadata)?;
            }
        }

        match run {
            Ok(_) => {
                info!(document_id, status = status.as_str(), "ingestion finished");
                Ok(IngestReport {
                    document_id,
                    job_id,
                    status,
                    agent_logs: ctx.logs,
                })
            }
            Err(err) => {
                warn!(document_id, error = %err, "ingestion aborted");
                Err(err.into())
            }
        }
    }

    /// Answers a question over the owner's documents.
    ///
    /// # Errors
    ///
    /// Returns an error when no completion provider is configured or the
    /// pipeline fails; no partial answers are returned.
    pub async fn answer(
        &self,
        query: &str,
        owner_id: i64,
        top_k: Option<usize>,
        summarize: bool,
    ) -> Result<AnswerResponse, Error> {
        let llm = self
            .llm
            .as_ref()
            .ok_or(crate::error::AgentError::ApiKeyMissing)?;

        let mut config = PipelineConfig::from_settings(&self.settings);
        config.summarize = summarize;

        let pipeline = AnswerPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            Arc::clone(llm),
            config,
        );
        Ok(pipeline.answer(query, owner_id, top_k).await?)
    }

    /// Searches the owner's chunks: vector search when the query can be
    /// embedded, lexical search otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn search(
        &self,
        query: &str,
        owner_id: i64,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>, Error> {
        let top_k = top_k.unwrap_or(self.settings.rag_top_k);

        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!(error = %err, "query embedding failed, falling back to lexical search");
                None
            }
        };

        let store = self.store.lock().await;
        let hits = search(
            &store,
            Some(query),
            embedding.as_deref(),
            owner_id,
            top_k,
        )?;
        Ok(hits)
    }

    /// Lists the owner's documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn documents(&self, owner_id: i64) -> Result<Vec<Document>, Error> {
        Ok(self.store.lock().await.list_documents(owner_id)?)
    }

    /// Fetches one document with its ingest jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn document(
        &self,
        id: i64,
        owner_id: i64,
    ) -> Result<Option<(Document, Vec<IngestJob>)>, Error> {
        let store = self.store.lock().await;
        match store.get_document(id, owner_id)? {
            Some(document) => {
                let jobs = store.jobs_for_document(id)?;
                Ok(Some((document, jobs)))
            }
            None => Ok(None),
        }
    }

    /// Deletes a document; chunks, jobs, and relations cascade.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_document(&self, id: i64, owner_id: i64) -> Result<bool, Error> {
        Ok(self.store.lock().await.delete_document(id, owner_id)?)
    }

    /// Deletes all of the owner's documents. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_all(&self, owner_id: i64) -> Result<usize, Error> {
        Ok(self.store.lock().await.delete_all_documents(owner_id)?)
    }

    /// Store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub async fn stats(&self) -> Result<StoreStats, Error> {
        Ok(self.store.lock().await.stats()?)
    }
}
