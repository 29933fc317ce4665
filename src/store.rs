//! Embedding store.
//!
//! One JSON document per repository holds every embedding plus the model
//! name and dimensionality that produced the latest batch. The store keeps
//! an in-memory mirror keyed by embedding id, loaded lazily on first use and
//! rewritten to disk after each mutation. Two `EmbeddingStore` instances
//! never share a mirror.
//!
//! On disk the embeddings are a flat array. A hand-edited or concurrently
//! written document may therefore contain duplicate ids; on load the last
//! occurrence wins and [`EmbeddingStore::optimize`] rewrites the file
//! without the duplicates.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use codectx_core::models::{ChunkType, CodeEmbedding};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{read_json, write_json_atomic, RepoPaths};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    repo_id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    dims: Option<usize>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    embeddings: Vec<CodeEmbedding>,
}

#[derive(Debug, Default)]
struct Mirror {
    model: Option<String>,
    dims: Option<usize>,
    embeddings: BTreeMap<String, CodeEmbedding>,
    /// Entries dropped as duplicates when the document was read.
    duplicates_on_disk: usize,
}

/// Conjunctive filter for [`EmbeddingStore::load_embeddings_with_filters`].
/// Empty lists and `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingFilter {
    pub languages: Vec<String>,
    pub types: Vec<ChunkType>,
    /// Glob over the root-relative source path, e.g. `src/**/*.ts`.
    pub path_pattern: Option<String>,
    pub min_complexity: Option<u32>,
    pub max_complexity: Option<u32>,
    /// The embedding must carry every one of these tags.
    pub tags: Vec<String>,
}

impl EmbeddingFilter {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
            && self.types.is_empty()
            && self.path_pattern.is_none()
            && self.min_complexity.is_none()
            && self.max_complexity.is_none()
            && self.tags.is_empty()
    }

    fn compile(&self) -> Result<CompiledFilter<'_>> {
        let path = match &self.path_pattern {
            Some(p) => Some(
                Glob::new(p)
                    .with_context(|| format!("Invalid path pattern: {}", p))?
                    .compile_matcher(),
            ),
            None => None,
        };
        Ok(CompiledFilter { filter: self, path })
    }
}

struct CompiledFilter<'a> {
    filter: &'a EmbeddingFilter,
    path: Option<GlobMatcher>,
}

impl CompiledFilter<'_> {
    fn matches(&self, e: &CodeEmbedding) -> bool {
        let f = self.filter;
        let meta = &e.metadata;
        if !f.languages.is_empty() && !f.languages.iter().any(|l| l.eq_ignore_ascii_case(&meta.language)) {
            return false;
        }
        if !f.types.is_empty() && !f.types.contains(&e.chunk_type) {
            return false;
        }
        if let Some(matcher) = &self.path {
            if !matcher.is_match(&e.source_path) {
                return false;
            }
        }
        if f.min_complexity.is_some_and(|min| meta.complexity < min) {
            return false;
        }
        if f.max_complexity.is_some_and(|max| meta.complexity > max) {
            return false;
        }
        f.tags.iter().all(|t| meta.tags.iter().any(|have| have == t))
    }
}

/// Summary of the stored embeddings.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub files: usize,
    pub by_type: BTreeMap<String, usize>,
    pub model: Option<String>,
    pub dims: Option<usize>,
}

pub struct EmbeddingStore {
    paths: RepoPaths,
    mirror: Option<Mirror>,
}

impl EmbeddingStore {
    pub fn new(paths: RepoPaths) -> Self {
        Self {
            paths,
            mirror: None,
        }
    }

    async fn mirror(&mut self) -> Result<&mut Mirror> {
        if self.mirror.is_none() {
            let path = self.paths.embeddings();
            let doc: Option<StoreDocument> = read_json(&path).await?;
            let mut mirror = Mirror::default();
            if let Some(doc) = doc {
                let raw = doc.embeddings.len();
                mirror.model = doc.model;
                mirror.dims = doc.dims;
                for e in doc.embeddings {
                    mirror.embeddings.insert(e.id.clone(), e);
                }
                mirror.duplicates_on_disk = raw - mirror.embeddings.len();
                debug!(
                    path = %path.display(),
                    embeddings = mirror.embeddings.len(),
                    "loaded embedding store"
                );
            }
            self.mirror = Some(mirror);
        }
        // Populated just above.
        Ok(self.mirror.get_or_insert_with(Mirror::default))
    }

    async fn persist(&mut self) -> Result<()> {
        let repo_id = self.paths.repo_id.clone();
        let path = self.paths.embeddings();
        let mirror = self.mirror().await?;
        let doc = StoreDocument {
            repo_id,
            model: mirror.model.clone(),
            dims: mirror.dims,
            updated_at: Utc::now(),
            embeddings: mirror.embeddings.values().cloned().collect(),
        };
        mirror.duplicates_on_disk = 0;
        write_json_atomic(&path, &doc).await
    }

    /// Merge `batch` into the store by id (last write wins) and record the
    /// producing model.
    pub async fn save_embeddings(
        &mut self,
        batch: Vec<CodeEmbedding>,
        model: &str,
        dims: usize,
    ) -> Result<()> {
        let mirror = self.mirror().await?;
        mirror.model = Some(model.to_string());
        mirror.dims = Some(dims);
        for e in batch {
            mirror.embeddings.insert(e.id.clone(), e);
        }
        self.persist().await
    }

    /// Swap the whole store for `batch` in a single write.
    pub async fn replace_embeddings(
        &mut self,
        batch: Vec<CodeEmbedding>,
        model: &str,
        dims: usize,
    ) -> Result<()> {
        let mut mirror = Mirror {
            model: Some(model.to_string()),
            dims: Some(dims),
            ..Default::default()
        };
        for e in batch {
            mirror.embeddings.insert(e.id.clone(), e);
        }
        self.mirror = Some(mirror);
        self.persist().await
    }

    pub async fn load_embeddings(&mut self) -> Result<Vec<CodeEmbedding>> {
        Ok(self.mirror().await?.embeddings.values().cloned().collect())
    }

    pub async fn load_embeddings_with_filters(
        &mut self,
        filter: &EmbeddingFilter,
    ) -> Result<Vec<CodeEmbedding>> {
        let compiled = filter.compile()?;
        Ok(self
            .mirror()
            .await?
            .embeddings
            .values()
            .filter(|e| compiled.matches(e))
            .cloned()
            .collect())
    }

    pub async fn get(&mut self, id: &str) -> Result<Option<CodeEmbedding>> {
        Ok(self.mirror().await?.embeddings.get(id).cloned())
    }

    /// Remove every embedding whose source file is in `changed`. Returns the
    /// number removed.
    pub async fn invalidate_changed_files(&mut self, changed: &[String]) -> Result<usize> {
        let changed: BTreeSet<&str> = changed.iter().map(String::as_str).collect();
        let mirror = self.mirror().await?;
        let before = mirror.embeddings.len();
        mirror
            .embeddings
            .retain(|_, e| !changed.contains(e.source_path.as_str()));
        let removed = before - mirror.embeddings.len();
        if removed > 0 {
            info!(removed, files = changed.len(), "invalidated embeddings");
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Drop duplicate ids left in the on-disk document. Returns the number
    /// of duplicates removed.
    pub async fn optimize(&mut self) -> Result<usize> {
        let removed = self.mirror().await?.duplicates_on_disk;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Distinct vector lengths present in the store.
    pub async fn dimensions(&mut self) -> Result<Vec<usize>> {
        let dims: BTreeSet<usize> = self
            .mirror()
            .await?
            .embeddings
            .values()
            .map(|e| e.vector.len())
            .collect();
        Ok(dims.into_iter().collect())
    }

    pub async fn stats(&mut self) -> Result<StoreStats> {
        let mirror = self.mirror().await?;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut files: BTreeSet<&str> = BTreeSet::new();
        for e in mirror.embeddings.values() {
            *by_type.entry(e.chunk_type.as_str().to_string()).or_insert(0) += 1;
            files.insert(&e.source_path);
        }
        Ok(StoreStats {
            total: mirror.embeddings.len(),
            files: files.len(),
            by_type,
            model: mirror.model.clone(),
            dims: mirror.dims,
        })
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.mirror = Some(Mirror::default());
        self.persist().await
    }
}
