//! Core data models used throughout codectx.
//!
//! These types represent the code index, the chunks and embeddings derived
//! from it, search results, assembled RAG context, and response cache
//! entries. All of them serialize to JSON for the on-disk documents.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;

/// Version of the persisted index layout.
pub const INDEX_VERSION: u32 = 1;

/// Kind of an indexed code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

/// A named, indexable code entity.
///
/// The id is `{relative_path}:{name}:{line}`, or
/// `{relative_path}:{class}.{method}:{line}` for methods, so ids never
/// collide across files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub line: usize,
    #[serde(default)]
    pub end_line: usize,
    pub exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Owning class for methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub complexity: u32,
    #[serde(default)]
    pub is_async: bool,
    /// Declared properties, for classes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
    /// Names this symbol refers to: called functions for functions and
    /// methods, `extends`/`implements` targets for classes.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Symbol {
    pub fn function_id(path: &str, name: &str, line: usize) -> String {
        format!("{}:{}:{}", path, name, line)
    }

    pub fn method_id(path: &str, class: &str, method: &str, line: usize) -> String {
        format!("{}:{}.{}:{}", path, class, method, line)
    }

    /// Display name including the owning class, e.g. `Parser.parse`.
    pub fn qualified_name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}.{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

/// Per-file entry of the code index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIndex {
    pub path: String,
    pub hash: String,
    pub language: String,
    /// Non-blank, non-comment lines.
    pub lines: usize,
    pub symbols: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    #[serde(default)]
    pub complexity: u32,
    /// Last modification time, unix seconds.
    #[serde(default)]
    pub modified: i64,
}

/// Function complexity buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl ComplexityDistribution {
    pub fn record(&mut self, complexity: u32) {
        match complexity {
            0..=5 => self.low += 1,
            6..=10 => self.medium += 1,
            _ => self.high += 1,
        }
    }
}

/// Aggregate statistics over the whole index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub languages: BTreeMap<String, usize>,
    pub complexity: ComplexityDistribution,
    pub total_symbols: usize,
    pub total_edges: usize,
}

/// Queryable model of a repository's code entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseIndex {
    #[serde(default = "default_version")]
    pub version: u32,
    pub repo_id: String,
    pub root: PathBuf,
    pub updated_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_lines: usize,
    pub files: BTreeMap<String, FileIndex>,
    pub symbols: BTreeMap<String, Symbol>,
    pub graph: DependencyGraph,
    pub metadata: IndexMetadata,
}

fn default_version() -> u32 {
    INDEX_VERSION
}

impl CodebaseIndex {
    pub fn new(repo_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            version: INDEX_VERSION,
            repo_id: repo_id.into(),
            root: root.into(),
            updated_at: Utc::now(),
            total_files: 0,
            total_lines: 0,
            files: BTreeMap::new(),
            symbols: BTreeMap::new(),
            graph: DependencyGraph::new(),
            metadata: IndexMetadata::default(),
        }
    }

    /// Symbols defined in `path`, in definition order.
    pub fn symbols_in<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a Symbol> + 'a {
        self.files
            .get(path)
            .into_iter()
            .flat_map(|f| f.symbols.iter())
            .filter_map(|id| self.symbols.get(id))
    }

    /// Recompute language counts, complexity buckets, and totals.
    pub fn rebuild_metadata(&mut self) {
        let mut metadata = IndexMetadata::default();
        for file in self.files.values() {
            *metadata.languages.entry(file.language.clone()).or_insert(0) += 1;
        }
        for symbol in self.symbols.values() {
            if symbol.kind != SymbolKind::Class {
                metadata.complexity.record(symbol.complexity);
            }
        }
        metadata.total_symbols = self.symbols.len();
        metadata.total_edges = self.graph.edge_count();
        self.metadata = metadata;
        self.total_files = self.files.len();
        self.total_lines = self.files.values().map(|f| f.lines).sum();
    }
}

/// Semantic role of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    File,
    Documentation,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::File => "file",
            ChunkType::Documentation => "documentation",
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(ChunkType::Function),
            "class" => Ok(ChunkType::Class),
            "file" => Ok(ChunkType::File),
            "documentation" | "docs" => Ok(ChunkType::Documentation),
            other => anyhow::bail!(
                "Unknown chunk type: '{}'. Use function, class, file, or documentation.",
                other
            ),
        }
    }
}

/// Metadata attached to every chunk and carried into its embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default)]
    pub complexity: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix seconds.
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub exported: bool,
    /// Number of graph nodes depending on this chunk's symbol or file.
    #[serde(default)]
    pub dependents: usize,
}

/// A bounded span of code or documentation prepared for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub chunk_type: ChunkType,
    pub source_path: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Original source text of the span.
    pub content: String,
    /// Header-prefixed text sent to the embedding provider.
    pub embedding_text: String,
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A chunk together with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEmbedding {
    pub id: String,
    pub chunk_type: ChunkType,
    pub source_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub hash: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl CodeEmbedding {
    pub fn from_chunk(chunk: CodeChunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            chunk_type: chunk.chunk_type,
            source_path: chunk.source_path,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.content,
            hash: chunk.hash,
            vector,
            metadata: chunk.metadata,
        }
    }
}

/// Per-factor breakdown of a blended relevance score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub similarity: f32,
    pub recency: f32,
    pub importance: f32,
}

/// An embedding paired with its scores for one query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub embedding: CodeEmbedding,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factors: Option<ScoreBreakdown>,
}

impl SearchResult {
    /// Final ranking score: blended relevance when present, else similarity.
    pub fn score(&self) -> f32 {
        self.relevance.unwrap_or(self.similarity)
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of prior conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }
}

/// A packed piece of retrieved code or documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub source_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub content: String,
    pub relevance: f32,
    pub tokens: usize,
    pub truncated: bool,
}

/// Run statistics for one context assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagMetadata {
    pub search_ms: u64,
    pub candidates: usize,
    pub average_relevance: f32,
    pub budget_utilization: f32,
}

/// Assembled, token-budgeted context for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagContext {
    pub query: String,
    pub code: Vec<ContextSnippet>,
    pub docs: Vec<ContextSnippet>,
    pub history: Vec<ConversationTurn>,
    pub token_budget: usize,
    pub tokens_used: usize,
    pub metadata: RagMetadata,
}

/// A cached provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub prompt: String,
    pub model: String,
    pub response: String,
    /// Write time, unix milliseconds.
    pub timestamp: i64,
    /// Referenced file path → content hash at write time.
    pub files: BTreeMap<String, String>,
    /// Accounted bytes: prompt + response.
    pub size: usize,
    /// Monotonic access stamp; the smallest is evicted first.
    #[serde(default)]
    pub last_access: u64,
}
