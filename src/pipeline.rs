//! Embedding pipeline: index → chunks → provider → store.
//!
//! Chunks are embedded in batches of `embedding.batch_size`. Up to
//! `embedding.concurrency` batches are in flight at once; each window of
//! batches is fully awaited before the next one starts, and results keep
//! input order. A batch whose provider call fails is logged, counted, and
//! skipped; the run continues with the remaining batches.
//!
//! The store is only touched after every batch has been tried. When all of
//! them fail the run returns [`Error::ProviderFailure`] and the stored
//! embeddings stay as they were.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use codectx_core::chunk::{estimate_tokens, CodeChunker};
use codectx_core::embedding::EmbeddingProvider;
use codectx_core::models::{CodeChunk, CodeEmbedding, CodebaseIndex};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::indexer::walk::{modified_secs, normalize_changed_path, scan_repository};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::EmbeddingStore;

/// Outcome of one embedding run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedReport {
    pub chunks: usize,
    pub embedded: usize,
    /// Chunks in batches the provider failed on.
    pub failed: usize,
    pub failed_batches: usize,
    /// Functions and classes dropped for exceeding the size limits.
    pub oversized: usize,
    /// Embeddings removed before re-embedding changed files.
    pub invalidated: usize,
    pub estimated_tokens: usize,
    pub estimated_cost: f64,
    pub elapsed_ms: u64,
}

/// Chunk and embed the whole repository, replacing the stored embeddings.
pub async fn embed_repository(
    config: &Config,
    index: &CodebaseIndex,
    provider: &dyn EmbeddingProvider,
    store: &mut EmbeddingStore,
    progress: &dyn ProgressReporter,
) -> Result<EmbedReport> {
    ensure_enabled(provider)?;
    let started = Instant::now();
    let sources = read_sources(config, index, None).await;
    let docs = read_docs(config, None).await?;

    let chunker = CodeChunker::new(config.chunking.to_chunker_config());
    let set = chunker.chunk_index(index, &sources, &docs);
    if set.missing_sources > 0 {
        warn!(files = set.missing_sources, "indexed files could not be read, re-run `cctx index`");
    }

    let mut report = EmbedReport {
        oversized: set.oversized,
        ..Default::default()
    };
    let embedded = embed_chunks(config, provider, set.chunks, progress, &mut report).await;
    ensure_any_succeeded(&report)?;

    store
        .replace_embeddings(embedded, provider.model_name(), provider.dims())
        .await
        .context("Failed to save embeddings")?;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        embedded = report.embedded,
        failed = report.failed,
        cost = report.estimated_cost,
        "embedding complete"
    );
    Ok(report)
}

/// Invalidate and re-embed only the `changed` files (absolute or
/// root-relative). Files no longer in the index just lose their embeddings.
pub async fn refresh_embeddings(
    config: &Config,
    index: &CodebaseIndex,
    changed: &[String],
    provider: &dyn EmbeddingProvider,
    store: &mut EmbeddingStore,
    progress: &dyn ProgressReporter,
) -> Result<EmbedReport> {
    ensure_enabled(provider)?;
    let started = Instant::now();
    let root = &config.index.root;
    let changed: BTreeSet<String> = changed
        .iter()
        .map(|p| normalize_changed_path(root, p))
        .collect();
    let changed_list: Vec<String> = changed.iter().cloned().collect();

    let sources = read_sources(config, index, Some(&changed)).await;
    let docs = read_docs(config, Some(&changed)).await?;
    let chunker = CodeChunker::new(config.chunking.to_chunker_config());
    let set = chunker.chunk_index(index, &sources, &docs);
    let mut report = EmbedReport {
        oversized: set.oversized,
        ..Default::default()
    };

    let embedded = embed_chunks(config, provider, set.chunks, progress, &mut report).await;
    ensure_any_succeeded(&report)?;

    report.invalidated = store.invalidate_changed_files(&changed_list).await?;
    save(store, provider, embedded).await?;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        files = changed.len(),
        invalidated = report.invalidated,
        embedded = report.embedded,
        "embeddings refreshed"
    );
    Ok(report)
}

fn ensure_enabled(provider: &dyn EmbeddingProvider) -> Result<()> {
    if provider.dims() == 0 {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    Ok(())
}

/// Every batch failed, so nothing would replace what is stored.
fn ensure_any_succeeded(report: &EmbedReport) -> Result<()> {
    if report.failed_batches > 0 && report.embedded == 0 {
        return Err(Error::ProviderFailure(format!(
            "all {} embedding batches failed, stored embeddings left unchanged",
            report.failed_batches
        ))
        .into());
    }
    Ok(())
}

async fn save(
    store: &mut EmbeddingStore,
    provider: &dyn EmbeddingProvider,
    embedded: Vec<CodeEmbedding>,
) -> Result<()> {
    if embedded.is_empty() {
        return Ok(());
    }
    store
        .save_embeddings(embedded, provider.model_name(), provider.dims())
        .await
        .context("Failed to save embeddings")
}

async fn embed_chunks(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    chunks: Vec<CodeChunk>,
    progress: &dyn ProgressReporter,
    report: &mut EmbedReport,
) -> Vec<CodeEmbedding> {
    let batch_size = config.embedding.batch_size.max(1);
    let concurrency = config.embedding.concurrency.max(1);

    report.chunks += chunks.len();
    report.estimated_tokens += chunks
        .iter()
        .map(|c| estimate_tokens(&c.embedding_text))
        .sum::<usize>();
    report.estimated_cost = provider.estimate_cost(report.estimated_tokens);

    let total = chunks.len() as u64;
    let batches: Vec<Vec<CodeChunk>> = chunks.chunks(batch_size).map(|b| b.to_vec()).collect();
    let mut done = 0u64;
    let mut embedded = Vec::new();

    for window in batches.chunks(concurrency) {
        let results: Vec<Result<Vec<Vec<f32>>>> = stream::iter(window.iter())
            .map(|batch| {
                let texts: Vec<String> = batch.iter().map(|c| c.embedding_text.clone()).collect();
                async move { provider.embed_batch(&texts).await }
            })
            .buffered(concurrency)
            .collect()
            .await;

        for (batch, result) in window.iter().zip(results) {
            done += batch.len() as u64;
            let vectors = match result {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    warn!(expected = batch.len(), got = v.len(), "embedding batch returned wrong count");
                    report.failed += batch.len();
                    report.failed_batches += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, chunks = batch.len(), "embedding batch failed");
                    report.failed += batch.len();
                    report.failed_batches += 1;
                    continue;
                }
            };
            report.embedded += vectors.len();
            for (chunk, vector) in batch.iter().zip(vectors) {
                embedded.push(CodeEmbedding::from_chunk(chunk.clone(), vector));
            }
        }
        progress.report(ProgressEvent::Embedding { n: done, total });
    }
    embedded
}

/// Source text of indexed files, optionally limited to `only`. Unreadable
/// files are left out and surface as the chunker's `missing_sources`.
async fn read_sources(
    config: &Config,
    index: &CodebaseIndex,
    only: Option<&BTreeSet<String>>,
) -> BTreeMap<String, String> {
    let mut sources = BTreeMap::new();
    for path in index.files.keys() {
        if only.is_some_and(|set| !set.contains(path)) {
            continue;
        }
        let abs = config.index.root.join(path);
        match tokio::fs::read_to_string(&abs).await {
            Ok(content) => {
                sources.insert(path.clone(), content);
            }
            Err(e) => warn!(path = %path, error = %e, "could not read source for chunking"),
        }
    }
    sources
}

async fn read_docs(
    config: &Config,
    only: Option<&BTreeSet<String>>,
) -> Result<Vec<(String, String, i64)>> {
    let files = scan_repository(&config.index)?;
    let mut docs = Vec::new();
    for file in files.docs {
        if only.is_some_and(|set| !set.contains(&file.path)) {
            continue;
        }
        match tokio::fs::read_to_string(&file.abs).await {
            Ok(content) => {
                let modified = modified_secs(&file.abs).await;
                docs.push((file.path, content, modified));
            }
            Err(e) => warn!(path = %file.path, error = %e, "could not read documentation file"),
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use crate::progress::NoProgress;
    use crate::storage::RepoPaths;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call whose batch contains the marker text.
    struct FlakyProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        fn estimate_cost(&self, tokens: usize) -> f64 {
            tokens as f64 * 0.001
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("explode")) {
                anyhow::bail!("provider exploded");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn fixture() -> (tempfile::TempDir, Config, CodebaseIndex) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(
            root.join("src/a.ts"),
            "export function alpha() {\n  return 1;\n}\n",
        )
        .unwrap();
        std::fs::write(
            root.join("src/b.ts"),
            "export function explode() {\n  return 2;\n}\n",
        )
        .unwrap();
        std::fs::write(root.join("README.md"), "# Project\n\nAbout it.\n").unwrap();

        let mut config = Config::for_root(root);
        config.embedding.batch_size = 1;
        config.embedding.concurrency = 2;
        let mut indexer = Indexer::new(config.clone());
        indexer.build_index().await.unwrap();
        let index = indexer.index().unwrap().clone();
        (dir, config, index)
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let (dir, config, index) = fixture().await;
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
        };
        let mut store = EmbeddingStore::new(RepoPaths::new(&config.data_dir(), "repo"));
        let report = embed_repository(&config, &index, &provider, &mut store, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.embedded, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(report.estimated_cost > 0.0);

        let stored = store.load_embeddings().await.unwrap();
        let paths: BTreeSet<&str> = stored.iter().map(|e| e.source_path.as_str()).collect();
        assert!(paths.contains("src/a.ts"));
        assert!(paths.contains("README.md"));
        assert!(!paths.contains("src/b.ts"));
        drop(dir);
    }

    /// Rejects every batch.
    struct DownProvider;

    #[async_trait]
    impl EmbeddingProvider for DownProvider {
        fn model_name(&self) -> &str {
            "down"
        }
        fn dims(&self) -> usize {
            2
        }
        fn estimate_cost(&self, _tokens: usize) -> f64 {
            0.0
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("service unavailable")
        }
    }

    #[tokio::test]
    async fn test_failing_provider_keeps_stored_embeddings() {
        let (dir, config, index) = fixture().await;
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
        };
        let mut store = EmbeddingStore::new(RepoPaths::new(&config.data_dir(), "repo"));
        embed_repository(&config, &index, &provider, &mut store, &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.load_embeddings().await.unwrap().len(), 2);

        let err = embed_repository(&config, &index, &DownProvider, &mut store, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ProviderFailure(_))
        ));
        assert_eq!(store.load_embeddings().await.unwrap().len(), 2);

        let err = refresh_embeddings(
            &config,
            &index,
            &["src/a.ts".to_string()],
            &DownProvider,
            &mut store,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("left unchanged"));
        assert_eq!(store.load_embeddings().await.unwrap().len(), 2);

        // A fresh store stays empty too.
        let mut fresh = EmbeddingStore::new(RepoPaths::new(&config.data_dir(), "other"));
        assert!(embed_repository(&config, &index, &DownProvider, &mut fresh, &NoProgress)
            .await
            .is_err());
        assert!(fresh.load_embeddings().await.unwrap().is_empty());
        drop(dir);
    }

    #[tokio::test]
    async fn test_refresh_only_touches_changed_files() {
        let (dir, config, index) = fixture().await;
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
        };
        let mut store = EmbeddingStore::new(RepoPaths::new(&config.data_dir(), "repo"));
        embed_repository(&config, &index, &provider, &mut store, &NoProgress)
            .await
            .unwrap();
        provider.calls.store(0, Ordering::SeqCst);

        let report = refresh_embeddings(
            &config,
            &index,
            &["src/a.ts".to_string()],
            &provider,
            &mut store,
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(report.invalidated, 1);
        assert_eq!(report.embedded, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load_embeddings().await.unwrap().len(), 2);
        drop(dir);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_rejected() {
        let (dir, config, index) = fixture().await;
        let mut store = EmbeddingStore::new(RepoPaths::new(&config.data_dir(), "repo"));
        let err = embed_repository(
            &config,
            &index,
            &crate::embedding::DisabledProvider,
            &mut store,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("disabled"));
        drop(dir);
    }
}
