//! Multi-factor ranking of search results.
//!
//! Similarity alone favors whatever happens to share vocabulary with the
//! query. Re-ranking blends three signals:
//!
//! ```text
//! score = w_sim × similarity + w_rec × recency + w_imp × importance
//! ```
//!
//! - **recency** decays linearly from 1.0 (modified now) to 0.0 at the end
//!   of the recency window, and stays at 0.0 afterwards.
//! - **importance** is an additive heuristic clamped to `[0, 1]`: complexity
//!   sweet-spot, export visibility, dependency fan-in, tag and symbol-name
//!   overlap with the query, and a chunk-type priority.
//!
//! Top-K selection is a stable descending sort, so equal scores keep their
//! input order.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{ChunkType, CodeEmbedding, ScoreBreakdown, SearchResult};

pub const DEFAULT_RECENCY_WINDOW_DAYS: u32 = 90;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Weights of the blended relevance score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub similarity: f32,
    pub recency: f32,
    pub importance: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            recency: 0.2,
            importance: 0.2,
        }
    }
}

impl RankingWeights {
    pub fn blend(&self, factors: &ScoreBreakdown) -> f32 {
        self.similarity * factors.similarity
            + self.recency * factors.recency
            + self.importance * factors.importance
    }
}

/// Linear recency decay in `[0, 1]`. Unknown timestamps (`<= 0`) score 0.
pub fn recency_score(last_modified: i64, now: i64, window_days: u32) -> f32 {
    if last_modified <= 0 || window_days == 0 {
        return 0.0;
    }
    let age_days = (now - last_modified).max(0) as f64 / SECONDS_PER_DAY;
    (1.0 - age_days / window_days as f64).clamp(0.0, 1.0) as f32
}

/// Lowercased query words of three or more characters.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Heuristic importance of a chunk for a query, clamped to `[0, 1]`.
pub fn importance_score(embedding: &CodeEmbedding, terms: &[String]) -> f32 {
    let meta = &embedding.metadata;
    let mut score = 0.0f32;

    score += match meta.complexity {
        0 => 0.0,
        1..=2 => 0.1,
        3..=15 => 0.2,
        _ => 0.1,
    };

    if meta.exported {
        score += 0.15;
    }

    score += 0.2 * (meta.dependents.min(10) as f32 / 10.0);

    let tag_hits = meta
        .tags
        .iter()
        .filter(|tag| terms.iter().any(|t| term_matches_tag(t, tag)))
        .count();
    score += (0.15 * tag_hits as f32).min(0.3);

    if let Some(symbol) = &meta.symbol {
        let symbol = symbol.to_lowercase();
        if terms.iter().any(|t| symbol.contains(t.as_str())) {
            score += 0.1;
        }
    }

    score += match embedding.chunk_type {
        ChunkType::Function => 0.15,
        ChunkType::Class => 0.1,
        ChunkType::File => 0.05,
        ChunkType::Documentation => 0.15,
    };

    score.clamp(0.0, 1.0)
}

/// A query word matches a tag when either contains the other or they share
/// a stem of at least five characters (`validate` ~ `validation`).
fn term_matches_tag(term: &str, tag: &str) -> bool {
    if tag.contains(term) || term.contains(tag) {
        return true;
    }
    let common = term
        .chars()
        .zip(tag.chars())
        .take_while(|(a, b)| a == b)
        .count();
    common >= 5
}

/// Compute blended relevance and factor breakdown for every result.
pub fn rerank(
    results: &mut [SearchResult],
    query: &str,
    weights: &RankingWeights,
    now: i64,
    window_days: u32,
) {
    let terms = query_terms(query);
    for result in results.iter_mut() {
        let factors = ScoreBreakdown {
            similarity: result.similarity,
            recency: recency_score(result.embedding.metadata.last_modified, now, window_days),
            importance: importance_score(&result.embedding, &terms),
        };
        result.relevance = Some(weights.blend(&factors));
        result.factors = Some(factors);
    }
}

/// Stable descending sort on the final score, then truncate to `k`.
pub fn top_k(results: &mut Vec<SearchResult>, k: usize) {
    results.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));
    results.truncate(k);
}

/// Greedy per-file diversity filter over already-ranked results: keep at
/// most `max_per_file` results from each source file, re-sort, truncate.
pub fn diversify(results: Vec<SearchResult>, max_per_file: usize, k: usize) -> Vec<SearchResult> {
    let mut per_file: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| {
            let count = per_file.entry(r.embedding.source_path.clone()).or_insert(0);
            *count += 1;
            *count <= max_per_file
        })
        .collect();
    top_k(&mut kept, k);
    kept
}
