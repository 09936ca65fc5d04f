//! Hybrid retrieval over the chunk store.
//!
//! Vector similarity and lexical FTS are independent branches; the hybrid
//! composition happens in [`reciprocal_rank_fusion`] over however many
//! ranked lists the caller accumulated (one per query variant).

mod rrf;

pub use rrf::{RrfConfig, reciprocal_rank_fusion};

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::StorageError;
use crate::storage::{ChunkRecord, DocumentStore};

/// A retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Chunk id.
    pub chunk_id: i64,
    /// Owning document id.
    pub document_id: i64,
    /// Chunk index within the document.
    pub chunk_index: usize,
    /// Owning document filename.
    pub filename: String,
    /// Chunk content.
    pub content: String,
    /// Branch-specific score: cosine similarity or negated BM25, replaced
    /// by the fused RRF score after fusion.
    pub score: f64,
    /// Chunk metadata.
    pub metadata: Value,
}

impl SearchHit {
    fn from_record(record: ChunkRecord, score: f64) -> Self {
        Self {
            chunk_id: record.id,
            document_id: record.document_id,
            chunk_index: record.chunk_index,
            filename: record.filename,
            content: record.content,
            score,
            metadata: record.metadata,
        }
    }
}

/// Searches the store with whichever inputs are available.
///
/// With an embedding, runs vector search (cosine, descending). With text
/// only, runs lexical FTS5 search. Exactly one branch executes per call.
///
/// # Errors
///
/// Returns an error if the underlying store query fails.
pub fn search(
    store: &DocumentStore,
    query_text: Option<&str>,
    query_embedding: Option<&[f32]>,
    owner_id: i64,
    top_k: usize,
) -> Result<Vec<SearchHit>, StorageError> {
    if let Some(embedding) = query_embedding {
        let hits = store.vector_search(embedding, owner_id, top_k)?;
        return Ok(hits
            .into_iter()
            .map(|(record, similarity)| SearchHit::from_record(record, f64::from(similarity)))
            .collect());
    }

    if let Some(text) = query_text {
        let hits = store.text_search(text, owner_id, top_k)?;
        return Ok(hits
            .into_iter()
            .map(|(record, score)| SearchHit::from_record(record, score))
            .collect());
    }

    Ok(Vec::new())
}

/// Fuses accumulated ranked hit lists with RRF and resolves the winners.
///
/// Each input list is already ranked best-first. The fused output carries
/// the RRF score and keeps the first-seen copy of each chunk's content.
#[must_use]
pub fn fuse_hits(result_sets: &[Vec<SearchHit>], k: u32, top_k: usize) -> Vec<SearchHit> {
    let mut by_id: HashMap<i64, &SearchHit> = HashMap::new();
    for set in result_sets {
        for hit in set {
            by_id.entry(hit.chunk_id).or_insert(hit);
        }
    }

    let ranked_ids: Vec<Vec<i64>> = result_sets
        .iter()
        .map(|set| set.iter().map(|hit| hit.chunk_id).collect())
        .collect();
    let ranked_refs: Vec<&[i64]> = ranked_ids.iter().map(Vec::as_slice).collect();

    reciprocal_rank_fusion(&ranked_refs, &RrfConfig::new(k))
        .into_iter()
        .take(top_k)
        .filter_map(|(chunk_id, score)| {
            by_id.get(&chunk_id).map(|hit| {
                let mut fused = (*hit).clone();
                fused.score = score;
                fused
            })
        })
        .collect()
}
