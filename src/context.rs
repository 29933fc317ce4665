//! Retrieval-augmented context assembly.
//!
//! [`RagContextBuilder::build_context`] runs one broad search, splits the
//! results into code and documentation, and greedily packs each into its own
//! token sub-budget. Conversation history fills the third sub-budget, newest
//! turns first. The sub-budget weights are used as given: weights summing
//! to more than 1 let the sections jointly exceed the nominal budget.

use std::time::Instant;

use anyhow::Result;
use codectx_core::budget::{
    pack_history, pack_snippets, BudgetWeights, PackLimits, SnippetCandidate,
    CODE_SNIPPET_FRACTION, DOC_SNIPPET_FRACTION,
};
use codectx_core::models::{
    ChunkType, ContextSnippet, ConversationTurn, RagContext, RagMetadata, Role, SearchResult,
};
use tracing::debug;

use crate::config::{ContextConfig, SearchConfig};
use crate::search::{EmbeddingSearchEngine, SearchOptions};
use crate::store::EmbeddingFilter;

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub token_budget: usize,
    pub weights: BudgetWeights,
    pub max_code_snippets: usize,
    pub max_doc_snippets: usize,
    /// Similarity floor of the broad search.
    pub min_similarity: f32,
    pub filter: EmbeddingFilter,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextOptions {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            token_budget: config.token_budget,
            weights: config.weights,
            max_code_snippets: config.max_code_snippets,
            max_doc_snippets: config.max_doc_snippets,
            min_similarity: config.min_similarity,
            filter: EmbeddingFilter::default(),
        }
    }
}

pub struct RagContextBuilder {
    engine: EmbeddingSearchEngine,
    search: SearchConfig,
}

impl RagContextBuilder {
    pub fn new(engine: EmbeddingSearchEngine, search: SearchConfig) -> Self {
        Self { engine, search }
    }

    pub async fn build_context(
        &mut self,
        query: &str,
        history: &[ConversationTurn],
        opts: &ContextOptions,
    ) -> Result<RagContext> {
        let budgets = opts.weights.split(opts.token_budget);

        let search_opts = SearchOptions {
            limit: 2 * (opts.max_code_snippets + opts.max_doc_snippets),
            min_similarity: opts.min_similarity,
            filter: opts.filter.clone(),
            ..SearchOptions::from_config(&self.search)
        };
        let started = Instant::now();
        let results = self.engine.search(query, &search_opts).await?;
        let search_ms = started.elapsed().as_millis() as u64;
        let candidates = results.len();

        let (doc_results, code_results): (Vec<SearchResult>, Vec<SearchResult>) = results
            .into_iter()
            .partition(|r| r.embedding.chunk_type == ChunkType::Documentation);

        let (code, code_tokens) = pack_snippets(
            code_results.into_iter().map(to_candidate).collect(),
            PackLimits {
                budget: budgets.code,
                max_items: opts.max_code_snippets,
                max_single_fraction: CODE_SNIPPET_FRACTION,
            },
        );
        let (docs, doc_tokens) = pack_snippets(
            doc_results.into_iter().map(to_candidate).collect(),
            PackLimits {
                budget: budgets.docs,
                max_items: opts.max_doc_snippets,
                max_single_fraction: DOC_SNIPPET_FRACTION,
            },
        );
        let (history, history_tokens) = pack_history(history, budgets.history);

        let tokens_used = code_tokens + doc_tokens + history_tokens;
        let packed = code.len() + docs.len();
        let average_relevance = if packed == 0 {
            0.0
        } else {
            code.iter().chain(&docs).map(|s| s.relevance).sum::<f32>() / packed as f32
        };
        let budget_utilization = if opts.token_budget == 0 {
            0.0
        } else {
            tokens_used as f32 / opts.token_budget as f32
        };

        debug!(
            code = code.len(),
            docs = docs.len(),
            history = history.len(),
            tokens_used,
            "context assembled"
        );

        Ok(RagContext {
            query: query.to_string(),
            code,
            docs,
            history,
            token_budget: opts.token_budget,
            tokens_used,
            metadata: RagMetadata {
                search_ms,
                candidates,
                average_relevance,
                budget_utilization,
            },
        })
    }
}

fn to_candidate(result: SearchResult) -> SnippetCandidate {
    let relevance = result.score();
    let e = result.embedding;
    SnippetCandidate {
        source_path: e.source_path,
        start_line: e.start_line,
        end_line: e.end_line,
        symbol: e.metadata.symbol,
        content: e.content,
        relevance,
    }
}

/// Render a context as a markdown prompt section.
pub fn format_context(ctx: &RagContext) -> String {
    let mut out = String::new();
    if !ctx.code.is_empty() {
        out.push_str("## Relevant code\n\n");
        for s in &ctx.code {
            push_snippet(&mut out, s);
        }
    }
    if !ctx.docs.is_empty() {
        out.push_str("## Documentation\n\n");
        for s in &ctx.docs {
            push_snippet(&mut out, s);
        }
    }
    if !ctx.history.is_empty() {
        out.push_str("## Conversation\n\n");
        for turn in &ctx.history {
            let who = match turn.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push_str(&format!("**{}**: {}\n\n", who, turn.content.trim()));
        }
    }
    out
}

fn push_snippet(out: &mut String, s: &ContextSnippet) {
    let title = match &s.symbol {
        Some(symbol) => format!("{} ({}:{}-{})", symbol, s.source_path, s.start_line, s.end_line),
        None => format!("{}:{}-{}", s.source_path, s.start_line, s.end_line),
    };
    out.push_str(&format!("### {}\n\n", title));
    let fence = s.source_path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    out.push_str(&format!("```{}\n{}\n```\n", fence, s.content.trim_end()));
    if s.truncated {
        out.push_str("_(truncated)_\n");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RepoPaths;
    use crate::store::EmbeddingStore;
    use async_trait::async_trait;
    use codectx_core::embedding::EmbeddingProvider;
    use codectx_core::models::{ChunkMetadata, CodeEmbedding};

    struct UnitProvider;

    #[async_trait]
    impl EmbeddingProvider for UnitProvider {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        fn estimate_cost(&self, _tokens: usize) -> f64 {
            0.0
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn embedding(id: &str, path: &str, kind: ChunkType, chars: usize) -> CodeEmbedding {
        CodeEmbedding {
            id: id.to_string(),
            chunk_type: kind,
            source_path: path.to_string(),
            start_line: 1,
            end_line: 10,
            content: "x".repeat(chars),
            hash: String::new(),
            vector: vec![1.0, 0.0],
            metadata: ChunkMetadata {
                language: "typescript".to_string(),
                symbol: Some(id.to_string()),
                ..Default::default()
            },
        }
    }

    async fn builder(dir: &std::path::Path, embeddings: Vec<CodeEmbedding>) -> RagContextBuilder {
        let mut store = EmbeddingStore::new(RepoPaths::new(dir, "repo"));
        store.save_embeddings(embeddings, "unit", 2).await.unwrap();
        let engine = EmbeddingSearchEngine::new(Box::new(UnitProvider), store);
        RagContextBuilder::new(engine, SearchConfig::default())
    }

    fn many(n: usize) -> Vec<CodeEmbedding> {
        let mut v: Vec<CodeEmbedding> = (0..n)
            .map(|i| embedding(&format!("f{}", i), &format!("src/f{}.ts", i), ChunkType::Function, 600))
            .collect();
        v.push(embedding("readme", "README.md", ChunkType::Documentation, 400));
        v
    }

    #[tokio::test]
    async fn test_tokens_used_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = builder(dir.path(), many(12)).await;
        let history: Vec<ConversationTurn> = (0..20)
            .map(|i| ConversationTurn::new(Role::User, format!("turn {} {}", i, "y".repeat(200))))
            .collect();
        let opts = ContextOptions {
            token_budget: 1000,
            ..Default::default()
        };
        let ctx = b.build_context("anything", &history, &opts).await.unwrap();
        assert!(ctx.tokens_used <= ctx.token_budget);
        assert!(!ctx.code.is_empty());
        assert_eq!(ctx.docs.len(), 1);
        assert!(ctx.metadata.budget_utilization <= 1.0);
        assert!(ctx.metadata.average_relevance > 0.0);
    }

    #[tokio::test]
    async fn test_history_keeps_newest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = builder(dir.path(), many(1)).await;
        let history = vec![
            ConversationTurn::new(Role::User, "a".repeat(1000)),
            ConversationTurn::new(Role::Assistant, "b".repeat(40)),
            ConversationTurn::new(Role::User, "c".repeat(40)),
        ];
        let opts = ContextOptions {
            token_budget: 200,
            weights: BudgetWeights {
                code: 0.0,
                docs: 0.0,
                history: 1.0,
            },
            ..Default::default()
        };
        let ctx = b.build_context("q", &history, &opts).await.unwrap();
        assert!(ctx.code.is_empty());
        let kept: Vec<char> = ctx
            .history
            .iter()
            .map(|t| t.content.chars().next().unwrap())
            .collect();
        assert_eq!(kept, vec!['b', 'c']);
    }

    #[tokio::test]
    async fn test_large_snippet_is_truncated_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = builder(
            dir.path(),
            vec![embedding("big", "src/big.ts", ChunkType::Function, 20_000)],
        )
        .await;
        let ctx = b
            .build_context("q", &[], &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.code.len(), 1);
        assert!(ctx.code[0].truncated);
        assert!(ctx.code[0].tokens <= 1440);
    }

    #[test]
    fn test_format_context_sections() {
        let ctx = RagContext {
            query: "q".to_string(),
            code: vec![ContextSnippet {
                source_path: "src/a.ts".to_string(),
                start_line: 1,
                end_line: 3,
                symbol: Some("alpha".to_string()),
                content: "function alpha() {}".to_string(),
                relevance: 0.9,
                tokens: 5,
                truncated: false,
            }],
            docs: Vec::new(),
            history: vec![ConversationTurn::new(Role::User, "hi")],
            token_budget: 100,
            tokens_used: 6,
            metadata: RagMetadata::default(),
        };
        let text = format_context(&ctx);
        assert!(text.contains("## Relevant code"));
        assert!(text.contains("### alpha (src/a.ts:1-3)"));
        assert!(text.contains("```ts\nfunction alpha() {}\n```"));
        assert!(!text.contains("## Documentation"));
        assert!(text.contains("**user**: hi"));
    }
}
