//! End-to-end tests over the public library API: index → embed → search →
//! context, plus the response cache, against a temporary repository.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use codectx::cache::AiCache;
use codectx::config::Config;
use codectx::context::{ContextOptions, RagContextBuilder};
use codectx::embedding::HashProvider;
use codectx::error::is_rebuild_required;
use codectx::indexer::{Indexer, ReferenceKind};
use codectx::pipeline::{embed_repository, refresh_embeddings};
use codectx::progress::NoProgress;
use codectx::search::{EmbeddingSearchEngine, SearchOptions};
use codectx::store::EmbeddingStore;
use codectx_core::models::{CodebaseIndex, ConversationTurn, Role};
use tempfile::TempDir;

const A_TS: &str = "import { foo } from './b';

export function main() {
  return foo(1);
}
";

const B_TS: &str = "export function foo(x: number) {
  return x + 1;
}

export class Base {
  run() {
    return foo(2);
  }
}
";

const VALIDATE_TS: &str = "// Input validation helpers.
export function validateInput(input: string) {
  if (!input) {
    throw new Error('invalid input');
  }
  return input.trim();
}
";

fn write_repo(root: &Path) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/a.ts"), A_TS).unwrap();
    fs::write(root.join("src/b.ts"), B_TS).unwrap();
    fs::write(root.join("src/validate.ts"), VALIDATE_TS).unwrap();
    fs::write(
        root.join("README.md"),
        "# Demo\n\nA tiny project used to exercise indexing.\n",
    )
    .unwrap();
}

fn setup() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    write_repo(tmp.path());
    let mut config = Config::for_root(tmp.path());
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = Some(128);
    (tmp, config)
}

fn edges(index: &CodebaseIndex) -> BTreeSet<(String, String)> {
    index
        .graph
        .edges()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

async fn embedded(config: &Config) -> (Indexer, EmbeddingStore) {
    let mut indexer = Indexer::new(config.clone());
    indexer.build_index().await.unwrap();
    let mut store = EmbeddingStore::new(indexer.paths().clone());
    let provider = HashProvider::new(128);
    embed_repository(
        config,
        indexer.index().unwrap(),
        &provider,
        &mut store,
        &NoProgress,
    )
    .await
    .unwrap();
    (indexer, store)
}

#[tokio::test]
async fn test_build_is_idempotent() {
    let (_tmp, config) = setup();
    let mut first = Indexer::new(config.clone());
    first.build_index().await.unwrap();
    let a = first.index().unwrap().clone();

    let mut second = Indexer::new(config);
    second.build_index().await.unwrap();
    let b = second.index().unwrap();

    let ids_a: Vec<&String> = a.symbols.keys().collect();
    let ids_b: Vec<&String> = b.symbols.keys().collect();
    assert_eq!(ids_a, ids_b);
    assert_eq!(edges(&a), edges(b));
    assert_eq!(a.total_lines, b.total_lines);
}

#[tokio::test]
async fn test_update_with_unchanged_file_keeps_totals() {
    let (_tmp, config) = setup();
    let mut indexer = Indexer::new(config);
    indexer.build_index().await.unwrap();
    let (files, lines) = {
        let index = indexer.index().unwrap();
        (index.total_files, index.total_lines)
    };

    indexer.update_index(&["src/b.ts".to_string()]).await.unwrap();
    let index = indexer.index().unwrap();
    assert_eq!(index.total_files, files);
    assert_eq!(index.total_lines, lines);
}

#[tokio::test]
async fn test_import_and_call_edges() {
    let (_tmp, config) = setup();
    let mut indexer = Indexer::new(config);
    indexer.build_index().await.unwrap();

    assert!(indexer
        .get_dependencies("src/a.ts")
        .unwrap()
        .contains(&"src/b.ts".to_string()));
    assert!(indexer
        .get_reverse_dependencies("src/b.ts")
        .unwrap()
        .contains(&"src/a.ts".to_string()));
    assert_eq!(
        indexer.get_dependencies("src/a.ts:main:3").unwrap(),
        vec!["src/b.ts:foo:1".to_string()]
    );

    let refs = indexer.find_references("foo").unwrap();
    let callers: BTreeSet<&str> = refs
        .iter()
        .filter(|r| r.kind == ReferenceKind::Call)
        .map(|r| r.from.as_str())
        .collect();
    assert!(callers.contains("src/a.ts:main:3"));
    assert!(callers.contains("src/b.ts:Base.run:6"));

    let index = indexer.index().unwrap();
    assert!(index.graph.is_consistent());
    for (from, to) in index.graph.edges() {
        assert!(index.graph.dependents(to).unwrap().contains(&from));
    }
}

#[tokio::test]
async fn test_search_ranks_validation_chunk_first() {
    let (_tmp, config) = setup();
    let (indexer, store) = embedded(&config).await;
    let mut engine = EmbeddingSearchEngine::new(Box::new(HashProvider::new(128)), store);
    let opts = SearchOptions {
        min_similarity: 0.0,
        ..SearchOptions::from_config(&config.search)
    };
    let results = engine.search("validate input", &opts).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].embedding.source_path, "src/validate.ts");
    assert!(results
        .windows(2)
        .all(|w| w[0].score() >= w[1].score()));
    drop(indexer);
}

#[tokio::test]
async fn test_search_with_other_model_requires_rebuild() {
    let (_tmp, config) = setup();
    let (_indexer, store) = embedded(&config).await;
    let mut engine = EmbeddingSearchEngine::new(Box::new(HashProvider::new(64)), store);
    let err = engine
        .search("validate input", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(is_rebuild_required(&err));
}

#[tokio::test]
async fn test_refresh_after_edit_replaces_file_embeddings() {
    let (tmp, config) = setup();
    let (mut indexer, mut store) = embedded(&config).await;

    fs::write(
        tmp.path().join("src/validate.ts"),
        "export function sanitizeEmail(email: string) {\n  return email.toLowerCase();\n}\n",
    )
    .unwrap();
    let changed = vec!["src/validate.ts".to_string()];
    indexer.update_index(&changed).await.unwrap();
    let provider = HashProvider::new(128);
    let report = refresh_embeddings(
        &config,
        indexer.index().unwrap(),
        &changed,
        &provider,
        &mut store,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(report.invalidated, 1);
    assert_eq!(report.embedded, 1);

    let symbols: Vec<String> = store
        .load_embeddings()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.source_path == "src/validate.ts")
        .filter_map(|e| e.metadata.symbol)
        .collect();
    assert_eq!(symbols, vec!["sanitizeEmail".to_string()]);
}

#[tokio::test]
async fn test_context_respects_budget() {
    let (_tmp, config) = setup();
    let (_indexer, store) = embedded(&config).await;
    let engine = EmbeddingSearchEngine::new(Box::new(HashProvider::new(128)), store);
    let mut builder = RagContextBuilder::new(engine, config.search.clone());

    let history = vec![
        ConversationTurn::new(Role::User, "How is input validated?"),
        ConversationTurn::new(Role::Assistant, "Through validateInput."),
    ];
    let opts = ContextOptions {
        token_budget: 120,
        min_similarity: 0.0,
        ..ContextOptions::from_config(&config.context)
    };
    let ctx = builder
        .build_context("validate input", &history, &opts)
        .await
        .unwrap();
    assert!(ctx.tokens_used <= ctx.token_budget);
    assert_eq!(ctx.history.len(), 2);
    assert_eq!(ctx.history[0].role, Role::User);
}

#[tokio::test]
async fn test_cache_miss_after_source_edit() {
    let (tmp, config) = setup();
    let indexer = Indexer::new(config.clone());
    let mut cache = AiCache::new(indexer.paths(), tmp.path(), config.cache.clone());

    let prompt = "summarize src/b.ts";
    cache
        .set(prompt, "gpt-4o-mini", "foo increments; Base.run calls foo", &["src/b.ts".to_string()])
        .await
        .unwrap();
    cache.set("unrelated", "gpt-4o-mini", "ok", &[]).await.unwrap();
    assert!(cache.get(prompt, "gpt-4o-mini").await.unwrap().is_some());
    let before = cache.get_stats().await.unwrap().total_entries;

    fs::write(tmp.path().join("src/b.ts"), "export const changed = true;\n").unwrap();
    assert_eq!(cache.get(prompt, "gpt-4o-mini").await.unwrap(), None);
    assert_eq!(cache.get_stats().await.unwrap().total_entries, before - 1);
}
