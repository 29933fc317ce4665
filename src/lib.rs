//! # codectx
//!
//! Code indexing, embedding search, and token-budgeted context assembly for
//! AI-assisted developer tooling.
//!
//! codectx walks a source repository, records every function, class, and
//! method in a symbol table with a bidirectional dependency graph, cuts the
//! code into semantically labeled chunks, embeds them, and serves
//! similarity-ranked context that fits a token budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │ Indexer  │──▶│ Chunker │──▶│ Provider │──▶│   Store   │
//! │ (graph)  │   │  (core) │   │ OpenAI/  │   │  (JSON)   │
//! └──────────┘   └─────────┘   │  hash    │   └─────┬─────┘
//!                              └──────────┘         │
//!                    ┌──────────────────┬───────────┘
//!                    ▼                  ▼
//!              ┌──────────┐      ┌─────────────┐
//!              │  Search  │─────▶│ RAG context │
//!              └──────────┘      └─────────────┘
//! ```
//!
//! The response cache ([`cache`]) sits beside provider calls and is
//! independent of this pipeline.
//!
//! ## Quick Start
//!
//! ```bash
//! cctx index                       # build the codebase index
//! cctx embed                       # chunk and embed it
//! cctx search "validate input"     # ranked chunks
//! cctx context "how does auth work" --budget 4000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`frontend`] | Language front-end trait and tree-sitter extraction |
//! | [`indexer`] | Symbol table, dependency graph, incremental update |
//! | [`embedding`] | Embedding providers |
//! | [`pipeline`] | Chunk → embed → store |
//! | [`store`] | Embedding persistence and filtered loads |
//! | [`search`] | Similarity search and re-ranking |
//! | [`context`] | Token-budgeted context assembly |
//! | [`cache`] | File-aware response cache |
//! | [`storage`] | On-disk layout and atomic JSON writes |
//!
//! Pure data types and algorithms live in the `codectx-core` crate.

pub mod cache;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod frontend;
pub mod indexer;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod storage;
pub mod store;
