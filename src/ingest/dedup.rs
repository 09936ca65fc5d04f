//! Deduplication stage.
//!
//! MinHash signatures estimate Jaccard similarity between chunk shingle
//! sets; LSH banding narrows the candidate pairs. Near-duplicate chunks
//! (later index) are marked and excluded from persistence.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use rayon::prelude::*;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{IngestStage, StageOutput};
use crate::core::IngestContext;
use crate::error::IngestError;

/// Number of MinHash components.
const NUM_HASHES: usize = 128;
/// LSH bands; `NUM_HASHES / NUM_BANDS` rows per band.
const NUM_BANDS: usize = 16;

/// Normalizes text for similarity comparison: lowercase, collapsed
/// whitespace, non-alphanumerics stripped (spaces kept). Idempotent.
#[must_use]
pub fn normalize_for_dedup(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builds the word k-shingle set; texts with fewer than `k` words yield
/// the singleton whole-text set.
fn shingles(normalized: &str, k: usize) -> Vec<String> {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() < k {
        return vec![normalized.to_string()];
    }

    let mut set: Vec<String> = words.windows(k).map(|w| w.join(" ")).collect();
    set.sort_unstable();
    set.dedup();
    set
}

/// Seeded shingle hash: the first 8 bytes (big-endian) of
/// `SHA256("{seed}:{shingle}")`.
fn hash_with_seed(shingle: &str, seed: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{seed}:{shingle}").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Computes the 128-component MinHash signature of a text.
///
/// Each component is the minimum seeded hash over all shingles. Empty
/// shingle sets yield the all-zero signature. Deterministic for a fixed
/// seed set.
#[must_use]
pub fn minhash_signature(text: &str, shingle_size: usize) -> Vec<u64> {
    let normalized = normalize_for_dedup(text);
    let shingle_set = shingles(&normalized, shingle_size);

    if shingle_set.is_empty() {
        return vec![0; NUM_HASHES];
    }

    let mut signature = vec![u64::MAX; NUM_HASHES];
    for shingle in &shingle_set {
        for (i, slot) in signature.iter_mut().enumerate() {
            let hash = hash_with_seed(shingle, i);
            if hash < *slot {
                *slot = hash;
            }
        }
    }
    signature
}

/// Estimated Jaccard similarity: the fraction of signature positions where
/// both signatures agree. Symmetric; identical signatures score 1.0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn signature_similarity(a: &[u64], b: &[u64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f64 / a.len() as f64
}

fn band_hash(band: &[u64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    band.hash(&mut hasher);
    hasher.finish()
}

/// Finds duplicate chunks via LSH banding plus signature verification.
///
/// Returns `index -> content hash of the retained original`; the retained
/// chunk is always the one with the lower index.
fn find_duplicates(
    signatures: &[Vec<u64>],
    texts: &[&str],
    threshold: f64,
) -> HashMap<usize, String> {
    let Some(first) = signatures.first() else {
        return HashMap::new();
    };
    let rows_per_band = first.len() / NUM_BANDS;
    if rows_per_band == 0 {
        return HashMap::new();
    }

    // Any shared band makes a candidate pair
    let mut band_buckets: Vec<HashMap<u64, Vec<usize>>> = vec![HashMap::new(); NUM_BANDS];
    for (idx, signature) in signatures.iter().enumerate() {
        for (band_idx, bucket) in band_buckets.iter_mut().enumerate() {
            let start = band_idx * rows_per_band;
            let band = &signature[start..start + rows_per_band];
            bucket.entry(band_hash(band)).or_default().push(idx);
        }
    }

    let mut candidate_pairs: Vec<(usize, usize)> = Vec::new();
    for bucket_map in &band_buckets {
        for bucket in bucket_map.values().filter(|b| b.len() > 1) {
            for i in 0..bucket.len() {
                for j in i + 1..bucket.len() {
                    let (a, b) = (bucket[i].min(bucket[j]), bucket[i].max(bucket[j]));
                    candidate_pairs.push((a, b));
                }
            }
        }
    }
    candidate_pairs.sort_unstable();
    candidate_pairs.dedup();

    let mut duplicates = HashMap::new();
    let mut originals: HashMap<usize, String> = HashMap::new();

    for (earlier, later) in candidate_pairs {
        let similarity = signature_similarity(&signatures[earlier], &signatures[later]);
        if similarity >= threshold {
            let original_hash = originals
                .entry(earlier)
                .or_insert_with(|| content_hash(texts[earlier]))
                .clone();
            duplicates.insert(later, original_hash);
        }
    }
    duplicates
}

/// Short content hash identifying a retained chunk: `md5(text)[..16]`.
fn content_hash(text: &str) -> String {
    let digest = md5::compute(text.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

/// Deduplication stage.
pub struct DedupStage {
    threshold: f64,
    shingle_size: usize,
}

impl DedupStage {
    /// Creates the stage with the given similarity threshold and shingle
    /// size.
    #[must_use]
    pub const fn new(threshold: f64, shingle_size: usize) -> Self {
        Self {
            threshold,
            shingle_size,
        }
    }
}

#[async_trait]
impl IngestStage for DedupStage {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["structure"]
    }

    fn should_run(&self, ctx: &IngestContext) -> bool {
        !ctx.chunks.is_empty()
    }

    async fn process(&self, ctx: &IngestContext) -> Result<StageOutput, IngestError> {
        let texts: Vec<&str> = ctx.chunks.iter().map(|c| c.text.as_str()).collect();

        let signatures: Vec<Vec<u64>> = texts
            .par_iter()
            .map(|text| minhash_signature(text, self.shingle_size))
            .collect();

        let duplicates = find_duplicates(&signatures, &texts, self.threshold);

        let mut chunks = ctx.chunks.clone();
        for (idx, original_hash) in &duplicates {
            if let Some(chunk) = chunks.get_mut(*idx) {
                chunk.is_duplicate = true;
                chunk.deduplicated_with = Some(original_hash.clone());
            }
        }

        let duplicate_count = duplicates.len();
        let mut output = StageOutput {
            chunks: Some(chunks),
            ..StageOutput::default()
        };
        output
            .metrics
            .push(("duplicate_chunks".to_string(), json!(duplicate_count)));
        output.metrics.push((
            "unique_chunks".to_string(),
            json!(ctx.chunks.len() - duplicate_count),
        ));
        Ok(output)
    }
}
