//! Codebase indexer.
//!
//! Walks the repository, obtains a [`ParsedFile`] per source file from the
//! language front-end, registers every function, class, and method as a
//! [`Symbol`], and builds the dependency graph. The resulting
//! [`CodebaseIndex`] is persisted after every mutation and is the single
//! source of truth for later incremental updates.
//!
//! # Lifecycle
//!
//! ```text
//! build_index()          walk → parse (cached) → symbols → graph → persist
//! update_index(changed)  load → drop changed files → re-parse survivors
//!                        → rebuild graph and metadata → persist
//! ```
//!
//! A parse failure on one file is logged and the file is skipped; the build
//! never aborts on a single bad file. The first save of a fresh index is
//! essential and its failure is returned.

pub mod deps;
pub mod walk;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use codectx_core::content_hash;
use codectx_core::models::{
    CodebaseIndex, ComplexityDistribution, FileIndex, Symbol, SymbolKind, INDEX_VERSION,
};
use codectx_core::parsed::ParsedFile;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::frontend::{LanguageFrontend, TreeSitterFrontend};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::storage::{self, repository_id, RepoPaths};

/// How a reference reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Import,
    Call,
    Inheritance,
}

/// One incoming dependency edge on a named entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub from: String,
    pub to: String,
    pub kind: ReferenceKind,
}

/// Outcome of a build or update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    /// Files that failed to read or parse, plus walk entries that could
    /// not be read.
    pub files_skipped: usize,
    pub files_removed: usize,
    pub symbols: usize,
    pub edges: usize,
    pub elapsed_ms: u64,
}

/// Summary of the loaded index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub repo_id: String,
    pub updated_at: DateTime<Utc>,
    pub files: usize,
    pub lines: usize,
    pub functions: usize,
    pub methods: usize,
    pub classes: usize,
    pub edges: usize,
    pub languages: Vec<(String, usize)>,
    pub complexity: ComplexityDistribution,
}

pub struct Indexer {
    config: Config,
    paths: RepoPaths,
    frontend: Box<dyn LanguageFrontend>,
    /// Root-relative path → (content hash, parse result).
    parse_cache: Cache<String, (String, ParsedFile)>,
    progress: Box<dyn ProgressReporter>,
    index: Option<CodebaseIndex>,
}

impl Indexer {
    pub fn new(config: Config) -> Self {
        Self::with_frontend(config, Box::new(TreeSitterFrontend))
    }

    pub fn with_frontend(config: Config, frontend: Box<dyn LanguageFrontend>) -> Self {
        let repo_id = repository_id(&config.index.root);
        let paths = RepoPaths::new(&config.data_dir(), repo_id);
        let parse_cache = Cache::builder()
            .max_capacity(config.index.parse_cache_size.max(1) as u64)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            config,
            paths,
            frontend,
            parse_cache,
            progress: Box::new(NoProgress),
            index: None,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        &self.config.index.root
    }

    /// The in-memory index, if built or loaded.
    pub fn index(&self) -> Option<&CodebaseIndex> {
        self.index.as_ref()
    }

    /// Load the persisted index into memory. Returns `false` when none
    /// exists, it is unreadable, or it was written by another layout version.
    pub async fn load(&mut self) -> Result<bool> {
        if self.index.is_some() {
            return Ok(true);
        }
        self.index = self.read_persisted().await?;
        Ok(self.index.is_some())
    }

    async fn read_persisted(&self) -> Result<Option<CodebaseIndex>> {
        let path = self.paths.index();
        let Some(index) = storage::read_json::<CodebaseIndex>(&path).await? else {
            return Ok(None);
        };
        if index.version != INDEX_VERSION {
            warn!(
                path = %path.display(),
                found = index.version,
                expected = INDEX_VERSION,
                "index layout version mismatch, rebuilding"
            );
            return Ok(None);
        }
        Ok(Some(index))
    }

    /// Index every source file under the root from scratch.
    pub async fn build_index(&mut self) -> Result<IndexReport> {
        let started = Instant::now();
        let root = self.config.index.root.clone();
        self.progress.report(ProgressEvent::Discovering {
            root: root.display().to_string(),
        });

        let files = walk::scan_repository(&self.config.index)?;
        let mut index = CodebaseIndex::new(self.paths.repo_id.clone(), root.clone());
        let mut report = IndexReport {
            files_skipped: files.skipped,
            ..Default::default()
        };
        let total = files.sources.len() as u64;

        for (n, file) in files.sources.iter().enumerate() {
            match self.index_file(&mut index, &file.path, &file.abs).await {
                Ok(()) => report.files_indexed += 1,
                Err(e) => {
                    warn!(path = %file.path, error = %e, "skipping file");
                    report.files_skipped += 1;
                }
            }
            self.progress.report(ProgressEvent::Indexing {
                n: n as u64 + 1,
                total,
            });
        }

        self.finish(index, &mut report, started).await?;
        info!(
            root = %root.display(),
            files = report.files_indexed,
            skipped = report.files_skipped,
            symbols = report.symbols,
            edges = report.edges,
            "index built"
        );
        Ok(report)
    }

    /// Re-index only `changed` paths (absolute or root-relative). Falls back
    /// to a full build when no persisted index exists.
    pub async fn update_index(&mut self, changed: &[String]) -> Result<IndexReport> {
        let started = Instant::now();
        let mut index = match self.index.take() {
            Some(index) => index,
            None => match self.read_persisted().await? {
                Some(index) => index,
                None => {
                    info!("no persisted index, running full build");
                    return self.build_index().await;
                }
            },
        };

        let root = self.config.index.root.clone();
        let changed: BTreeSet<String> = changed
            .iter()
            .map(|p| walk::normalize_changed_path(&root, p))
            .collect();
        let mut report = IndexReport::default();
        let total = changed.len() as u64;

        for (n, rel) in changed.iter().enumerate() {
            let existed = match index.files.remove(rel) {
                Some(old) => {
                    for id in &old.symbols {
                        index.symbols.remove(id);
                    }
                    true
                }
                None => false,
            };
            self.parse_cache.invalidate(rel.as_str());

            let abs = root.join(rel);
            if abs.is_file() && walk::is_indexable(&self.config.index, rel) {
                match self.index_file(&mut index, rel, &abs).await {
                    Ok(()) => report.files_indexed += 1,
                    Err(e) => {
                        warn!(path = %rel, error = %e, "skipping file");
                        report.files_skipped += 1;
                    }
                }
            } else if existed {
                debug!(path = %rel, "file removed from index");
                report.files_removed += 1;
            }
            self.progress.report(ProgressEvent::Indexing {
                n: n as u64 + 1,
                total,
            });
        }

        self.finish(index, &mut report, started).await?;
        info!(
            changed = changed.len(),
            indexed = report.files_indexed,
            removed = report.files_removed,
            "index updated"
        );
        Ok(report)
    }

    async fn finish(
        &mut self,
        mut index: CodebaseIndex,
        report: &mut IndexReport,
        started: Instant,
    ) -> Result<()> {
        deps::rebuild_graph(&mut index);
        index.rebuild_metadata();
        index.updated_at = Utc::now();

        report.symbols = index.symbols.len();
        report.edges = index.graph.edge_count();
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        // Kept in memory even when the write fails.
        let index = self.index.insert(index);
        storage::write_json_atomic(&self.paths.index(), &*index)
            .await
            .context("Failed to persist index")?;
        Ok(())
    }

    async fn index_file(&mut self, index: &mut CodebaseIndex, rel: &str, abs: &Path) -> Result<()> {
        let content = tokio::fs::read_to_string(abs)
            .await
            .with_context(|| format!("Failed to read {}", abs.display()))?;
        let hash = content_hash(&content);
        let parsed = self.parse_cached(rel, &hash, &content)?;
        let modified = walk::modified_secs(abs).await;
        register_file(index, rel, hash, modified, parsed);
        Ok(())
    }

    fn parse_cached(&self, rel: &str, hash: &str, content: &str) -> Result<ParsedFile> {
        if let Some((cached_hash, parsed)) = self.parse_cache.get(rel) {
            if cached_hash == hash {
                return Ok(parsed);
            }
        }
        let parsed = self.frontend.parse(rel, content)?;
        self.parse_cache
            .insert(rel.to_string(), (hash.to_string(), parsed.clone()));
        Ok(parsed)
    }

    fn loaded(&self) -> Result<&CodebaseIndex> {
        self.index.as_ref().ok_or_else(|| {
            anyhow!(
                "No index for {}. Run `cctx index` first.",
                self.config.index.root.display()
            )
        })
    }

    /// Functions and methods whose name contains `query`, case-insensitively.
    pub fn search_functions(&self, query: &str) -> Result<Vec<&Symbol>> {
        self.search_symbols(query, |k| k != SymbolKind::Class)
    }

    /// Classes whose name contains `query`, case-insensitively.
    pub fn search_classes(&self, query: &str) -> Result<Vec<&Symbol>> {
        self.search_symbols(query, |k| k == SymbolKind::Class)
    }

    fn search_symbols(
        &self,
        query: &str,
        kind_filter: impl Fn(SymbolKind) -> bool,
    ) -> Result<Vec<&Symbol>> {
        let index = self.loaded()?;
        let needle = query.to_lowercase();
        Ok(index
            .symbols
            .values()
            .filter(|s| kind_filter(s.kind) && s.name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Nodes `id` (a file path or symbol id) depends on.
    pub fn get_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let index = self.loaded()?;
        index
            .graph
            .dependencies(id)
            .map(|deps| deps.into_iter().map(str::to_string).collect())
            .ok_or_else(|| Error::not_found("node", id).into())
    }

    /// Nodes that depend on `id`.
    pub fn get_reverse_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let index = self.loaded()?;
        index
            .graph
            .dependents(id)
            .map(|deps| deps.into_iter().map(str::to_string).collect())
            .ok_or_else(|| Error::not_found("node", id).into())
    }

    /// Every incoming edge on symbols named `name`, or on the file at path
    /// `name`.
    pub fn find_references(&self, name: &str) -> Result<Vec<Reference>> {
        let index = self.loaded()?;
        let mut targets: Vec<&str> = index
            .symbols
            .values()
            .filter(|s| s.name == name || s.qualified_name() == name)
            .map(|s| s.id.as_str())
            .collect();
        if index.files.contains_key(name) {
            targets.push(name);
        }
        if targets.is_empty() {
            return Err(Error::not_found("symbol", name).into());
        }

        let mut refs = Vec::new();
        for target in targets {
            for from in index.graph.dependents(target).unwrap_or_default() {
                let kind = match index.symbols.get(from) {
                    None => ReferenceKind::Import,
                    Some(s) if s.kind == SymbolKind::Class => ReferenceKind::Inheritance,
                    Some(_) => ReferenceKind::Call,
                };
                refs.push(Reference {
                    from: from.to_string(),
                    to: target.to_string(),
                    kind,
                });
            }
        }
        Ok(refs)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let index = self.loaded()?;
        let count = |kind: SymbolKind| index.symbols.values().filter(|s| s.kind == kind).count();
        Ok(IndexStats {
            repo_id: index.repo_id.clone(),
            updated_at: index.updated_at,
            files: index.total_files,
            lines: index.total_lines,
            functions: count(SymbolKind::Function),
            methods: count(SymbolKind::Method),
            classes: count(SymbolKind::Class),
            edges: index.metadata.total_edges,
            languages: index
                .metadata
                .languages
                .iter()
                .map(|(l, n)| (l.clone(), *n))
                .collect(),
            complexity: index.metadata.complexity.clone(),
        })
    }

    /// Root-relative path → absolute path for a file in the index.
    pub fn absolute_path(&self, rel: &str) -> PathBuf {
        self.config.index.root.join(rel)
    }
}

/// Add one parsed file and its symbols to `index`.
fn register_file(
    index: &mut CodebaseIndex,
    rel: &str,
    hash: String,
    modified: i64,
    parsed: ParsedFile,
) {
    let mut symbol_ids = Vec::new();
    let mut add = |index: &mut CodebaseIndex, symbol: Symbol| {
        symbol_ids.push(symbol.id.clone());
        index.symbols.insert(symbol.id.clone(), symbol);
    };

    for f in &parsed.functions {
        let symbol = Symbol {
            id: Symbol::function_id(rel, &f.name, f.line),
            name: f.name.clone(),
            kind: SymbolKind::Function,
            file: rel.to_string(),
            line: f.line,
            end_line: f.end_line,
            exported: f.is_exported,
            doc: f.doc.clone(),
            parent: None,
            signature: f.signature(),
            complexity: f.complexity,
            is_async: f.is_async,
            properties: Vec::new(),
            references: f.calls.clone(),
        };
        add(index, symbol);
    }

    for c in &parsed.classes {
        let mut references: Vec<String> = c.extends.iter().cloned().collect();
        references.extend(c.implements.iter().cloned());
        let class = Symbol {
            id: Symbol::function_id(rel, &c.name, c.line),
            name: c.name.clone(),
            kind: SymbolKind::Class,
            file: rel.to_string(),
            line: c.line,
            end_line: c.end_line,
            exported: c.is_exported,
            doc: c.doc.clone(),
            parent: None,
            signature: c.name.clone(),
            complexity: c.methods.iter().map(|m| m.complexity).sum(),
            is_async: false,
            properties: c.properties.clone(),
            references,
        };
        add(index, class);

        for m in &c.methods {
            let method = Symbol {
                id: Symbol::method_id(rel, &c.name, &m.name, m.line),
                name: m.name.clone(),
                kind: SymbolKind::Method,
                file: rel.to_string(),
                line: m.line,
                end_line: m.end_line,
                exported: m.is_exported,
                doc: m.doc.clone(),
                parent: Some(c.name.clone()),
                signature: m.signature(),
                complexity: m.complexity,
                is_async: m.is_async,
                properties: Vec::new(),
                references: m.calls.clone(),
            };
            add(index, method);
        }
    }

    let file = FileIndex {
        path: rel.to_string(),
        hash,
        lines: parsed.code_lines,
        language: parsed.language,
        symbols: symbol_ids,
        imports: parsed.imports.into_iter().map(|i| i.source).collect(),
        exports: parsed.exports,
        complexity: parsed.complexity,
        modified,
    };
    index.files.insert(rel.to_string(), file);
}
