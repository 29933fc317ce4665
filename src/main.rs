//! # codectx CLI (`cctx`)
//!
//! The `cctx` binary indexes a repository, embeds it, and answers symbol,
//! dependency, search, and context queries against the persisted state.
//!
//! ## Usage
//!
//! ```bash
//! cctx --config ./codectx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cctx index` | Build (or with `--changed`, update) the codebase index |
//! | `cctx embed` | Chunk and embed the index |
//! | `cctx search "<query>"` | Similarity search over embeddings |
//! | `cctx context "<query>"` | Token-budgeted context for a prompt |
//! | `cctx symbols <name>` | Find functions (or `--classes`) by name |
//! | `cctx deps <id>` | Dependencies (or `--reverse` dependents) of a node |
//! | `cctx refs <name>` | Incoming references on a symbol or file |
//! | `cctx stats` | Index and embedding summary |
//! | `cctx cache stats\|clear` | Response cache maintenance |
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); results go to stdout.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use codectx::cache::AiCache;
use codectx::config::{self, Config};
use codectx::context::{format_context, ContextOptions, RagContextBuilder};
use codectx::embedding::create_provider;
use codectx::indexer::Indexer;
use codectx::pipeline::{embed_repository, refresh_embeddings};
use codectx::progress::ProgressMode;
use codectx::search::{EmbeddingSearchEngine, SearchOptions};
use codectx::store::{EmbeddingFilter, EmbeddingStore};
use codectx_core::models::{ChunkType, ConversationTurn, SearchResult};
use tracing_subscriber::EnvFilter;

/// codectx: code indexing, embedding search, and token-budgeted context
/// for AI tools.
#[derive(Parser)]
#[command(name = "cctx", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./codectx.toml")]
    config: PathBuf,

    /// Repository root, overriding `[index] root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Progress output on stderr. Defaults to human when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the codebase index, or update it for the given files.
    Index {
        /// Re-index only these files (absolute or root-relative).
        #[arg(long, num_args = 1..)]
        changed: Vec<String>,
    },

    /// Chunk the index and generate embeddings.
    ///
    /// Requires `[embedding] provider` to be set. Without `--changed` all
    /// stored embeddings are replaced.
    Embed {
        /// Invalidate and re-embed only these files.
        #[arg(long, num_args = 1..)]
        changed: Vec<String>,
    },

    /// Similarity search over stored embeddings.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Cap results per file (over-fetch, then diversify).
        #[arg(long)]
        diverse: bool,

        /// Rank by similarity alone.
        #[arg(long)]
        no_rerank: bool,

        /// Only these languages (repeatable).
        #[arg(long = "lang")]
        languages: Vec<String>,

        /// Only these chunk types: function, class, file, documentation.
        #[arg(long = "type")]
        types: Vec<String>,

        /// Glob over source paths, e.g. `src/**/*.ts`.
        #[arg(long)]
        path: Option<String>,

        /// Chunks must carry all these tags.
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Assemble token-budgeted context for a query.
    Context {
        query: String,

        /// Total token budget.
        #[arg(long)]
        budget: Option<usize>,

        /// Read conversation history (JSON array of turns) from this file,
        /// or `-` for stdin.
        #[arg(long)]
        history: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Find functions and methods (or classes) by name substring.
    Symbols {
        name: String,

        #[arg(long)]
        classes: bool,
    },

    /// Dependencies of a file path or symbol id.
    Deps {
        id: String,

        /// Show dependents instead.
        #[arg(long)]
        reverse: bool,
    },

    /// Incoming references on a symbol name or file path.
    Refs { name: String },

    /// Index and embedding summary.
    Stats,

    /// Response cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "cctx", &mut io::stdout());
        return Ok(());
    }

    let cfg = resolve_config(&cli.config, cli.root.as_deref())?;
    let progress = match cli.progress {
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Commands::Index { changed } => {
            let mut indexer = Indexer::new(cfg).with_progress(progress.reporter());
            let report = if changed.is_empty() {
                indexer.build_index().await?
            } else {
                indexer.update_index(&changed).await?
            };
            println!("index");
            println!("  files indexed: {}", report.files_indexed);
            println!("  files skipped: {}", report.files_skipped);
            println!("  files removed: {}", report.files_removed);
            println!("  symbols: {}", report.symbols);
            println!("  edges: {}", report.edges);
            println!("  elapsed: {} ms", report.elapsed_ms);
        }
        Commands::Embed { changed } => {
            if !cfg.embedding.is_enabled() {
                bail!("Embedding provider is disabled. Set [embedding] provider in config.");
            }
            let indexer = load_indexer(&cfg).await?;
            let index = indexer.index().context("index not loaded")?;
            let provider = create_provider(&cfg.embedding)?;
            let mut store = EmbeddingStore::new(indexer.paths().clone());
            let reporter = progress.reporter();
            let report = if changed.is_empty() {
                embed_repository(&cfg, index, provider.as_ref(), &mut store, reporter.as_ref())
                    .await?
            } else {
                refresh_embeddings(
                    &cfg,
                    index,
                    &changed,
                    provider.as_ref(),
                    &mut store,
                    reporter.as_ref(),
                )
                .await?
            };
            println!("embed");
            println!("  chunks: {}", report.chunks);
            println!("  embedded: {}", report.embedded);
            println!("  failed: {} ({} batches)", report.failed, report.failed_batches);
            println!("  oversized (skipped): {}", report.oversized);
            if !changed.is_empty() {
                println!("  invalidated: {}", report.invalidated);
            }
            println!(
                "  estimated cost: ${:.4} (~{} tokens)",
                report.estimated_cost, report.estimated_tokens
            );
        }
        Commands::Search {
            query,
            limit,
            diverse,
            no_rerank,
            languages,
            types,
            path,
            tags,
            json,
        } => {
            let mut engine = open_engine(&cfg)?;
            let mut opts = SearchOptions::from_config(&cfg.search);
            if let Some(limit) = limit {
                opts.limit = limit;
            }
            if no_rerank {
                opts.rerank = false;
            }
            opts.filter = EmbeddingFilter {
                languages,
                types: types
                    .iter()
                    .map(|t| t.parse::<ChunkType>())
                    .collect::<Result<Vec<_>>>()?,
                path_pattern: path,
                tags,
                ..Default::default()
            };
            let results = if diverse {
                engine.search_diverse(&query, &opts).await?
            } else {
                engine.search(&query, &opts).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Commands::Context {
            query,
            budget,
            history,
            json,
        } => {
            let history = match history {
                Some(path) => read_history(&path)?,
                None => Vec::new(),
            };
            let mut opts = ContextOptions::from_config(&cfg.context);
            if let Some(budget) = budget {
                opts.token_budget = budget;
            }
            let mut builder = RagContextBuilder::new(open_engine(&cfg)?, cfg.search.clone());
            let ctx = builder.build_context(&query, &history, &opts).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ctx)?);
            } else {
                print!("{}", format_context(&ctx));
                eprintln!(
                    "context: {} / {} tokens ({:.0}% of budget), search {} ms",
                    ctx.tokens_used,
                    ctx.token_budget,
                    ctx.metadata.budget_utilization * 100.0,
                    ctx.metadata.search_ms
                );
            }
        }
        Commands::Symbols { name, classes } => {
            let indexer = load_indexer(&cfg).await?;
            let symbols = if classes {
                indexer.search_classes(&name)?
            } else {
                indexer.search_functions(&name)?
            };
            if symbols.is_empty() {
                println!("No symbols.");
            }
            for s in symbols {
                println!("{}  {}", s.id, s.signature);
            }
        }
        Commands::Deps { id, reverse } => {
            let indexer = load_indexer(&cfg).await?;
            let nodes = if reverse {
                indexer.get_reverse_dependencies(&id)?
            } else {
                indexer.get_dependencies(&id)?
            };
            for node in nodes {
                println!("{}", node);
            }
        }
        Commands::Refs { name } => {
            let indexer = load_indexer(&cfg).await?;
            for r in indexer.find_references(&name)? {
                let kind = serde_json::to_value(r.kind)?;
                println!("{} -> {} ({})", r.from, r.to, kind.as_str().unwrap_or("?"));
            }
        }
        Commands::Stats => {
            let indexer = load_indexer(&cfg).await?;
            let stats = indexer.stats()?;
            println!("repository {}", stats.repo_id);
            println!("  updated: {}", stats.updated_at.to_rfc3339());
            println!("  files: {}", stats.files);
            println!("  lines: {}", stats.lines);
            println!(
                "  symbols: {} functions, {} methods, {} classes",
                stats.functions, stats.methods, stats.classes
            );
            println!("  edges: {}", stats.edges);
            for (lang, n) in &stats.languages {
                println!("  {}: {} files", lang, n);
            }
            println!(
                "  complexity: {} low, {} medium, {} high",
                stats.complexity.low, stats.complexity.medium, stats.complexity.high
            );
            let mut store = EmbeddingStore::new(indexer.paths().clone());
            let es = store.stats().await?;
            println!("embeddings");
            println!("  total: {} across {} files", es.total, es.files);
            if let (Some(model), Some(dims)) = (&es.model, es.dims) {
                println!("  model: {} ({} dims)", model, dims);
            }
            for (kind, n) in &es.by_type {
                println!("  {}: {}", kind, n);
            }
        }
        Commands::Cache { action } => {
            let indexer = Indexer::new(cfg.clone());
            let mut cache = AiCache::new(indexer.paths(), indexer.root(), cfg.cache.clone());
            match action {
                CacheAction::Stats => {
                    let s = cache.get_stats().await?;
                    println!("cache");
                    println!("  entries: {}", s.total_entries);
                    println!("  bytes: {} / {}", s.total_bytes, s.max_bytes);
                    println!("  hits: {}  misses: {}  hit rate: {:.1}%", s.hits, s.misses, s.hit_rate * 100.0);
                    println!("  evictions: {}", s.evictions);
                }
                CacheAction::Clear => {
                    cache.clear().await?;
                    println!("cache cleared");
                }
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Load the config file if present, else defaults. A relative `[index] root`
/// is taken relative to the config file.
fn resolve_config(path: &Path, root: Option<&Path>) -> Result<Config> {
    let mut cfg = if path.exists() {
        let mut cfg = config::load_config(path)?;
        if cfg.index.root.is_relative() {
            if let Some(dir) = path.parent() {
                cfg.index.root = dir.join(&cfg.index.root);
            }
        }
        cfg
    } else {
        Config::default()
    };
    if let Some(root) = root {
        cfg.index.root = root.to_path_buf();
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn load_indexer(cfg: &Config) -> Result<Indexer> {
    let mut indexer = Indexer::new(cfg.clone());
    if !indexer.load().await? {
        bail!(
            "No index for {}. Run `cctx index` first.",
            cfg.index.root.display()
        );
    }
    Ok(indexer)
}

fn open_engine(cfg: &Config) -> Result<EmbeddingSearchEngine> {
    if !cfg.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    let provider = create_provider(&cfg.embedding)?;
    let indexer = Indexer::new(cfg.clone());
    let store = EmbeddingStore::new(indexer.paths().clone());
    Ok(EmbeddingSearchEngine::new(provider, store))
}

fn read_history(path: &Path) -> Result<Vec<ConversationTurn>> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history: {}", path.display()))?
    };
    serde_json::from_str(&text).context("History must be a JSON array of {role, content} turns")
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        let e = &r.embedding;
        let label = e.metadata.symbol.as_deref().unwrap_or(e.chunk_type.as_str());
        println!(
            "{}. [{:.3}] {}:{}-{}  {}",
            i + 1,
            r.score(),
            e.source_path,
            e.start_line,
            e.end_line,
            label
        );
        if let Some(f) = &r.factors {
            println!(
                "    similarity {:.3}  recency {:.3}  importance {:.3}",
                f.similarity, f.recency, f.importance
            );
        }
    }
}
