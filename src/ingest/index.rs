//! Indexing stage.
//!
//! Batch-embeds the unique chunks, persists them in one transaction, and
//! refreshes planner statistics on the chunk table. The last stage of the
//! DAG and, with extraction, one of its two critical stages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::{IngestStage, StageOutput};
use crate::core::{IngestContext, StageLog};
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, IngestError};
use crate::storage::DocumentStore;

/// Indexing stage.
pub struct IndexStage {
    store: Arc<Mutex<DocumentStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl IndexStage {
    /// Creates the stage over the shared store and embedding capability.
    #[must_use]
    pub fn new(
        store: Arc<Mutex<DocumentStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl IngestStage for IndexStage {
    fn name(&self) -> &'static str {
        "index"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["extract", "structure", "meta", "table", "dedup", "pii"]
    }

    fn is_critical(&self) -> bool {
        true
    }

    fn should_run(&self, ctx: &IngestContext) -> bool {
        !ctx.chunks.is_empty()
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        let mut output = StageOutput::default();

        let unique: Vec<_> = ctx.unique_chunks().collect();
        if unique.is_empty() {
            output.errors.push("all chunks are duplicates".to_string());
            return Ok(output);
        }

        // Batch embedding, order-preserving; a failed batch is logged and
        // its chunks are skipped at insert time.
        let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; unique.len()];
        let total_batches = unique.len().div_ceil(self.batch_size);

        for (batch_idx, batch) in unique.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(EmbeddingError::CountMismatch {
                            got: vectors.len(),
                            expected: texts.len(),
                        }
                        .into());
                    }
                    let start = batch_idx * self.batch_size;
                    for (offset, vector) in vectors.into_iter().enumerate() {
                        if vector.len() != self.embedder.dimensions() {
                            return Err(IngestError::Data {
                                message: format!(
                                    "embedding dimension {} does not match configured {}",
                                    vector.len(),
                                    self.embedder.dimensions()
                                ),
                            });
                        }
                        embeddings[start + offset] = Some(vector);
                    }
                    output.logs.push(StageLog::now(
                        "index",
                        "info",
                        format!(
                            "batch {}/{total_batches}: {} embeddings generated",
                            batch_idx + 1,
                            texts.len()
                        ),
                    ));
                }
                Err(EmbeddingError::CountMismatch { got, expected }) => {
                    return Err(EmbeddingError::CountMismatch { got, expected }.into());
                }
                Err(err) => {
                    output
                        .errors
                        .push(format!("embedding batch {batch_idx} failed: {err}"));
                    debug!(batch = batch_idx, error = %err, "embedding batch failed");
                }
            }
        }

        let rows: Vec<(usize, String, Value, Vec<f32>)> = unique
            .iter()
            .zip(embeddings)
            .filter_map(|(chunk, embedding)| {
                embedding.map(|vector| {
                    (
                        chunk.chunk_index,
                        chunk.text.clone(),
                        Value::Object(chunk.metadata.clone()),
                        vector,
                    )
                })
            })
            .collect();

        if rows.is_empty() {
            return Err(IngestError::Stage {
                stage: "index",
                message: "no chunks could be embedded".to_string(),
            });
        }

        let persisted = {
            let mut store = self.store.lock().await;
            let persisted = store
                .insert_chunks(ctx.document_id, &rows)
                .map_err(|e| IngestError::Stage {
                    stage: "index",
                    message: format!("chunk insert failed: {e}"),
                })?;

            // Planner statistics refresh is best-effort
            store.analyze_chunks();

            let mut doc_meta = serde_json::Map::new();
            doc_meta.insert(
                "embedding_model".to_string(),
                json!(self.embedder.model_name()),
            );
            doc_meta.insert(
                "embedding_dim".to_string(),
                json!(self.embedder.dimensions()),
            );
            if let Some(provenance) = self.embedder.provenance() {
                doc_meta.insert("embedding_provenance".to_string(), json!(provenance));
            }
            store
                .merge_document_metadata(ctx.document_id, &doc_meta)
                .map_err(|e| IngestError::Stage {
                    stage: "index",
                    message: format!("metadata update failed: {e}"),
                })?;

            persisted
        };

        output.logs.push(StageLog::now(
            "index",
            "info",
            format!("{persisted} chunks persisted"),
        ));
        output
            .metrics
            .push(("indexed_chunks".to_string(), json!(persisted)));
        output.metrics.push((
            "duplicate_chunks_skipped".to_string(),
            json!(ctx.chunks.len() - unique.len()),
        ));
        output.metadata.insert(
            "embedding_model".to_string(),
            json!(self.embedder.model_name()),
        );
        output.metadata.insert(
            "embedding_dim".to_string(),
            json!(self.embedder.dimensions()),
        );
        Ok(output)
    }
}
