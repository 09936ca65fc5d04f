//! Reciprocal Rank Fusion (RRF).
//!
//! Merges multiple ranked result lists into one ranking. Based on:
//! Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion outperforms
//! Condorcet and individual Rank Learning Methods".

use std::collections::HashMap;

/// Configuration for the RRF algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k parameter dampens the weight of top ranks. Default is 60,
    /// the value recommended in the original paper.
    pub k: u32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60 }
    }
}

impl RrfConfig {
    /// Creates a new RRF config with the specified k value.
    #[must_use]
    pub const fn new(k: u32) -> Self {
        Self { k }
    }
}

/// Performs Reciprocal Rank Fusion over ranked lists of chunk ids.
///
/// The RRF score for each item is `score(d) = Σ 1 / (k + rank(d))` with
/// 1-based ranks, summed over every list containing the item. Output is
/// sorted by score descending; ties break by first-seen order across the
/// input lists, so a single list fuses to itself and permuting the input
/// lists cannot reorder equal-score items inconsistently.
///
/// # Examples
///
/// ```
/// use docrag::search::{RrfConfig, reciprocal_rank_fusion};
///
/// let list1 = vec![1, 2, 3];
/// let fused = reciprocal_rank_fusion(&[&list1], &RrfConfig::default());
/// let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
/// assert_eq!(ids, vec![1, 2, 3]);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn reciprocal_rank_fusion(ranked_lists: &[&[i64]], config: &RrfConfig) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    let mut first_seen: Vec<i64> = Vec::new();

    for list in ranked_lists {
        for (rank, &item_id) in list.iter().enumerate() {
            // rank is 0-indexed; the formula uses 1-based ranks
            let rrf_score = 1.0 / f64::from(config.k + (rank as u32) + 1);
            if !scores.contains_key(&item_id) {
                first_seen.push(item_id);
            }
            *scores.entry(item_id).or_insert(0.0) += rrf_score;
        }
    }

    let order: HashMap<i64, usize> = first_seen
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();

    let mut results: Vec<(i64, f64)> = first_seen
        .iter()
        .map(|id| (*id, scores[id]))
        .collect();

    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| order[&a.0].cmp(&order[&b.0]))
    });

    results
}
