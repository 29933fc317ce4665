//! TOML configuration parsing and validation.
//!
//! Every section is optional; missing sections and keys fall back to the
//! defaults below. [`load_config`] reads and validates a file,
//! [`Config::for_root`] builds a default configuration for a repository.
//!
//! ```toml
//! [index]
//! root = "."
//! skip_dirs = [".git", "node_modules", "target"]
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [search.weights]
//! similarity = 0.6
//! recency = 0.2
//! importance = 0.2
//! ```

use anyhow::{bail, Context, Result};
use codectx_core::budget::BudgetWeights;
use codectx_core::chunk::ChunkerConfig;
use codectx_core::rank::{RankingWeights, DEFAULT_RECENCY_WINDOW_DAYS};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Where index, embedding, and cache documents are written. Defaults
    /// to `<root>/.codectx`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_parse_cache_size")]
    pub parse_cache_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            data_dir: None,
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            parse_cache_size: default_parse_cache_size(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_extensions() -> Vec<String> {
    ["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_skip_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "target",
        "dist",
        "build",
        ".next",
        "coverage",
        "__pycache__",
        ".codectx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_parse_cache_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_function_chars")]
    pub max_function_chars: usize,
    #[serde(default = "default_max_class_chars")]
    pub max_class_chars: usize,
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
    #[serde(default = "default_max_header_dependencies")]
    pub max_header_dependencies: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_function_chars: default_max_function_chars(),
            max_class_chars: default_max_class_chars(),
            max_file_chars: default_max_file_chars(),
            max_header_dependencies: default_max_header_dependencies(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_function_chars: self.max_function_chars,
            max_class_chars: self.max_class_chars,
            max_file_chars: self.max_file_chars,
            max_header_dependencies: self.max_header_dependencies,
        }
    }
}

fn default_max_function_chars() -> usize {
    4000
}
fn default_max_class_chars() -> usize {
    8000
}
fn default_max_file_chars() -> usize {
    6000
}
fn default_max_header_dependencies() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent provider calls within one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the provider's built-in price, in USD per 1,000 tokens.
    #[serde(default)]
    pub cost_per_1k_tokens: Option<f64>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cost_per_1k_tokens: None,
            base_url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_concurrency() -> usize {
    5
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default)]
    pub weights: RankingWeights,
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: u32,
    #[serde(default = "default_diverse_overfetch")]
    pub diverse_overfetch: usize,
    #[serde(default = "default_max_per_file")]
    pub max_per_file: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_similarity: default_min_similarity(),
            rerank: true,
            weights: RankingWeights::default(),
            recency_window_days: default_recency_window_days(),
            diverse_overfetch: default_diverse_overfetch(),
            max_per_file: default_max_per_file(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_min_similarity() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_recency_window_days() -> u32 {
    DEFAULT_RECENCY_WINDOW_DAYS
}
fn default_diverse_overfetch() -> usize {
    3
}
fn default_max_per_file() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Sub-budget weights. Not required to sum to 1.
    #[serde(default)]
    pub weights: BudgetWeights,
    #[serde(default = "default_max_code_snippets")]
    pub max_code_snippets: usize,
    #[serde(default = "default_max_doc_snippets")]
    pub max_doc_snippets: usize,
    #[serde(default = "default_context_min_similarity")]
    pub min_similarity: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            weights: BudgetWeights::default(),
            max_code_snippets: default_max_code_snippets(),
            max_doc_snippets: default_max_doc_snippets(),
            min_similarity: default_context_min_similarity(),
        }
    }
}

fn default_token_budget() -> usize {
    8000
}
fn default_max_code_snippets() -> usize {
    10
}
fn default_max_doc_snippets() -> usize {
    5
}
fn default_context_min_similarity() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: default_cache_max_bytes(),
        }
    }
}

fn default_cache_max_bytes() -> usize {
    50 * 1024 * 1024
}

impl Config {
    /// Default configuration rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.index.root = root.into();
        config
    }

    /// Directory holding the persisted documents.
    pub fn data_dir(&self) -> PathBuf {
        self.index
            .data_dir
            .clone()
            .unwrap_or_else(|| self.index.root.join(".codectx"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.index.extensions.is_empty() {
            bail!("index.extensions must not be empty");
        }

        if self.chunking.max_function_chars == 0
            || self.chunking.max_class_chars == 0
            || self.chunking.max_file_chars == 0
        {
            bail!("chunking limits must be > 0");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.concurrency == 0 {
            bail!("embedding.concurrency must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "hash" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
                other
            ),
        }

        if self.embedding.is_enabled() && self.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                self.embedding.provider
            );
        }
        if self.embedding.provider == "openai" && self.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'openai'");
        }

        if !(-1.0..=1.0).contains(&self.search.min_similarity) {
            bail!("search.min_similarity must be in [-1.0, 1.0]");
        }
        if !(-1.0..=1.0).contains(&self.context.min_similarity) {
            bail!("context.min_similarity must be in [-1.0, 1.0]");
        }
        if self.search.limit == 0 {
            bail!("search.limit must be >= 1");
        }
        let w = &self.search.weights;
        if w.similarity < 0.0 || w.recency < 0.0 || w.importance < 0.0 {
            bail!("search.weights must be non-negative");
        }
        let b = &self.context.weights;
        if b.code < 0.0 || b.docs < 0.0 || b.history < 0.0 {
            bail!("context.weights must be non-negative");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.search.limit, 10);
        assert_eq!(config.search.weights, RankingWeights::default());
        assert_eq!(config.context.token_budget, 8000);
        assert_eq!(config.data_dir(), PathBuf::from("./.codectx"));
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
[index]
root = "/repo"
data_dir = "/data"

[embedding]
provider = "hash"
dims = 64

[context]
token_budget = 1000
weights = { code = 0.5, docs = 0.3, history = 0.2 }
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/data"));
        assert_eq!(config.embedding.dims, Some(64));
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.context.weights.docs, 0.3);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_openai_requires_model() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_weights_not_required_to_sum_to_one() {
        let config: Config =
            toml::from_str("[context]\nweights = { code = 0.9, docs = 0.5, history = 0.5 }")
                .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_weight_tables_fill_defaults() {
        let config: Config = toml::from_str(
            "[search.weights]\nsimilarity = 0.8\n\n[context.weights]\nhistory = 0.1",
        )
        .unwrap();
        assert_eq!(config.search.weights.similarity, 0.8);
        assert_eq!(config.search.weights.recency, 0.2);
        assert_eq!(config.search.weights.importance, 0.2);
        assert_eq!(config.context.weights.code, 0.6);
        assert_eq!(config.context.weights.history, 0.1);
        config.validate().unwrap();
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config: Config = toml::from_str(
            "[search.weights]\nsimilarity = 1.0\nrecency = -0.1\nimportance = 0.1",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/codectx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
