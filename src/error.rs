//! Typed error conditions callers branch on.
//!
//! Everything else travels as [`anyhow::Error`] with context attached. These
//! variants are wrapped inside `anyhow::Error` too and recovered with
//! `downcast_ref::<Error>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No stored embedding shares the query vector's dimensionality, or the
    /// store is empty. Embeddings must be regenerated with the current
    /// provider.
    #[error(
        "no compatible embeddings: query has {query_dims} dimensions, store has {stored_dims:?}; \
         rebuild required (run `cctx embed`)"
    )]
    RebuildRequired {
        query_dims: usize,
        stored_dims: Vec<usize>,
    },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("embedding provider failed: {0}")]
    ProviderFailure(String),

    #[error("failed to write {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            name: name.into(),
        }
    }
}

/// Whether `err` carries [`Error::RebuildRequired`].
pub fn is_rebuild_required(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<Error>(), Some(Error::RebuildRequired { .. }))
}

/// Whether `err` carries [`Error::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<Error>(), Some(Error::NotFound { .. }))
}
