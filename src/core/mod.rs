//! Core module - fingerprinting, normalization and the import cache

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod normalize;
pub mod options;
pub mod query;
pub mod source;

pub use cache::{
    ArtifactHandle, CacheEntry, CacheError, CacheStats, ImportCache, MissReason, PruneReport,
    Resolution, ResolveError, TableDescriptor,
};
pub use config::Config;
pub use fingerprint::{fingerprint, source_key, NORMALIZER_VERSION};
pub use normalize::{Cell, Column, ColumnType, Normalizer, Schema};
pub use options::ImportOptions;
pub use query::{run_query, QueryError, QueryResult};
pub use source::{describe_sources, RemoteFetcher, SourceDescriptor, SourceError, SourceSpec};
