//! # codectx Core
//!
//! Shared, I/O-free logic for codectx: the code index data model, the
//! dependency graph, the embedding chunker, vector math and the embedding
//! provider trait, multi-factor ranking, and token-budget packing.
//!
//! This crate contains no tokio, filesystem, or network dependencies. The
//! `codectx` app crate owns persistence, repository walking, and providers.

pub mod budget;
pub mod chunk;
pub mod embedding;
pub mod graph;
pub mod models;
pub mod parsed;
pub mod rank;

use sha2::{Digest, Sha256};

/// SHA-256 of `text`, hex-encoded.
///
/// Used for file content hashes, chunk hashes, and cache keys.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
