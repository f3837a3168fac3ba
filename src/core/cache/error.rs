//! Error types for the import cache

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::core::source::SourceError;
use crate::formats::FormatError;

/// Failures of the cache directory itself
///
/// A cache error never means the data is wrong; callers can always fall back
/// to an uncached import.
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", path.display())]
    #[diagnostic(code(quarry::cache::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write cache metadata {}: {source}", path.display())]
    #[diagnostic(code(quarry::cache::metadata))]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error in {}: {source}", path.display())]
    #[diagnostic(code(quarry::cache::database))]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("no cache entry matches '{0}'")]
    #[diagnostic(
        code(quarry::cache::no_match),
        help("run 'quarry cache list' to see entries")
    )]
    NoMatch(String),

    #[error("'{prefix}' matches {count} cache entries")]
    #[diagnostic(
        code(quarry::cache::ambiguous),
        help("use a longer fingerprint prefix")
    )]
    Ambiguous { prefix: String, count: usize },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn db(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        CacheError::Database {
            path: path.into(),
            source,
        }
    }
}

/// Everything that can stop a resolve
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error("{origin}: {source}")]
    #[diagnostic(code(quarry::import::format))]
    Format {
        origin: String,
        #[source]
        source: FormatError,
    },

    #[error("{0} changed while it was being imported")]
    #[diagnostic(code(quarry::import::changed), help("run the command again"))]
    SourceChanged(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),
}

impl ResolveError {
    /// Whether retrying without the cache could succeed
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, ResolveError::Cache(_))
    }
}
