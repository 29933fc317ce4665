//! Embedding search engine.
//!
//! A query is embedded with the configured provider and compared by cosine
//! similarity against every stored embedding of the same dimensionality.
//! Embeddings produced by a different model (another vector length) are
//! skipped for that query; when none are compatible the search fails with
//! [`Error::RebuildRequired`] instead of returning an empty list.
//!
//! ```text
//! query ──embed──► vector ──cosine──► ≥ min_similarity ──rerank?──► top-K
//! ```
//!
//! See [`codectx_core::rank`] for the blended score used when re-ranking.

use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use codectx_core::embedding::{cosine_similarity, EmbeddingProvider};
use codectx_core::models::SearchResult;
use codectx_core::rank::{self, RankingWeights};
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::Error;
use crate::store::{EmbeddingFilter, EmbeddingStore};

/// Per-query options. [`SearchOptions::from_config`] fills them from the
/// `[search]` section.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_similarity: f32,
    pub rerank: bool,
    pub weights: RankingWeights,
    pub recency_window_days: u32,
    pub filter: EmbeddingFilter,
    /// Over-fetch factor for [`EmbeddingSearchEngine::search_diverse`].
    pub diverse_overfetch: usize,
    /// Per-file cap for [`EmbeddingSearchEngine::search_diverse`].
    pub max_per_file: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            limit: config.limit,
            min_similarity: config.min_similarity,
            rerank: config.rerank,
            weights: config.weights,
            recency_window_days: config.recency_window_days,
            filter: EmbeddingFilter::default(),
            diverse_overfetch: config.diverse_overfetch,
            max_per_file: config.max_per_file,
        }
    }
}

pub struct EmbeddingSearchEngine {
    provider: Box<dyn EmbeddingProvider>,
    store: EmbeddingStore,
}

impl EmbeddingSearchEngine {
    pub fn new(provider: Box<dyn EmbeddingProvider>, store: EmbeddingStore) -> Self {
        Self { provider, store }
    }

    pub fn store_mut(&mut self) -> &mut EmbeddingStore {
        &mut self.store
    }

    pub async fn search(&mut self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let vector = self.provider.embed(query).await?;
        let results = self.search_vector(&vector, query, opts, None).await?;
        debug!(
            query,
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(results)
    }

    /// Search over-fetching `diverse_overfetch × limit` results, then keep at
    /// most `max_per_file` per source file. Greedy, not globally optimal.
    pub async fn search_diverse(
        &mut self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let wide = SearchOptions {
            limit: opts.limit.saturating_mul(opts.diverse_overfetch.max(1)),
            ..opts.clone()
        };
        let results = self.search(query, &wide).await?;
        Ok(rank::diversify(results, opts.max_per_file.max(1), opts.limit))
    }

    /// Embeddings closest to the stored embedding `id`, excluding itself.
    pub async fn find_similar(
        &mut self,
        id: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let origin = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("embedding", id))?;
        let query = origin
            .metadata
            .symbol
            .clone()
            .unwrap_or_else(|| origin.source_path.clone());
        self.search_vector(&origin.vector, &query, opts, Some(id))
            .await
    }

    async fn search_vector(
        &mut self,
        vector: &[f32],
        query: &str,
        opts: &SearchOptions,
        exclude: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let stored_dims = self.store.dimensions().await?;
        if !stored_dims.contains(&vector.len()) {
            return Err(Error::RebuildRequired {
                query_dims: vector.len(),
                stored_dims,
            }
            .into());
        }

        let candidates = if opts.filter.is_empty() {
            self.store.load_embeddings().await?
        } else {
            self.store.load_embeddings_with_filters(&opts.filter).await?
        };
        let total = candidates.len();

        let mut results = Vec::new();
        for embedding in candidates {
            if embedding.vector.len() != vector.len() || exclude == Some(embedding.id.as_str()) {
                continue;
            }
            let similarity = cosine_similarity(vector, &embedding.vector)?;
            if similarity < opts.min_similarity {
                continue;
            }
            results.push(SearchResult {
                embedding,
                similarity,
                relevance: None,
                factors: None,
            });
        }
        debug!(candidates = total, above_threshold = results.len(), "scored embeddings");

        if opts.rerank {
            rank::rerank(
                &mut results,
                query,
                &opts.weights,
                Utc::now().timestamp(),
                opts.recency_window_days,
            );
        }
        rank::top_k(&mut results, opts.limit);
        Ok(results)
    }
}
