//! Cache type definitions
//!
//! Sidecar entries, hit/miss results and admin reports.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use super::error::CacheError;
use crate::core::normalize::Column;
use crate::core::options::ImportOptions;
use crate::core::source::StatSnapshot;
use crate::formats::Format;

/// Sidecar format version; entries written with another version are ignored
pub const ENTRY_VERSION: u32 = 1;

// =========================================================================
// Sidecar entries
// =========================================================================

/// One cached import, persisted as `<fingerprint>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub fingerprint: String,
    pub source_key: String,
    pub options: ImportOptions,
    pub sources: Vec<SourceRecord>,
    pub tables: Vec<TableDescriptor>,
    pub created_at: DateTime<Utc>,
    /// Artifact file name, relative to the cache directory
    pub artifact: String,
    pub artifact_size: u64,
}

impl CacheEntry {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }
}

/// A source as it was when the entry was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub path: PathBuf,
    pub format: Format,
    pub stat: StatSnapshot,
}

/// One imported table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Where the rows came from (a path, or `-` for piped input)
    pub source: String,
    pub columns: Vec<Column>,
    pub row_count: u64,
}

// =========================================================================
// Resolution
// =========================================================================

/// Why a resolve did not serve a cached artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// Nothing cached for these sources yet
    NewInput,
    /// Same sources and options, but a source's size, mtime or digest changed
    ChangedSource,
    /// Same sources, different import options
    OptionsChanged,
    /// Caching turned off by the caller
    CachingDisabled,
    /// A source (stdin) can't be re-validated
    UnstableSource,
    /// The stored entry failed validation
    InvalidEntry,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::NewInput => "new input",
            MissReason::ChangedSource => "source changed",
            MissReason::OptionsChanged => "import options changed",
            MissReason::CachingDisabled => "caching disabled",
            MissReason::UnstableSource => "unstable source",
            MissReason::InvalidEntry => "invalid cache entry",
        }
    }
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An artifact ready for the query engine
///
/// Uncached artifacts live in a temporary file that is deleted when the
/// handle is dropped.
#[derive(Debug)]
pub struct ArtifactHandle {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl ArtifactHandle {
    pub(crate) fn cached(path: PathBuf) -> Self {
        Self { path, temp: None }
    }

    pub(crate) fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Open a read-only connection to the artifact
    pub fn connect(&self) -> Result<Connection, CacheError> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CacheError::db(&self.path, e))
    }
}

/// Outcome of [`ImportCache::resolve`](super::ImportCache::resolve)
#[derive(Debug)]
pub struct Resolution {
    pub handle: ArtifactHandle,
    pub cache_hit: bool,
    pub miss_reason: Option<MissReason>,
    /// `None` when the import was not cacheable
    pub fingerprint: Option<String>,
    pub tables: Vec<TableDescriptor>,
    /// Normalizer warnings from a fresh import
    pub warnings: Vec<String>,
}

// =========================================================================
// Admin reports
// =========================================================================

/// Cache directory statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub tables: usize,
    pub rows: u64,
    /// Artifacts plus sidecars, in bytes
    pub total_bytes: u64,
    /// Artifacts with no sidecar pointing at them
    pub orphans: usize,
    /// Leftovers from interrupted imports
    pub temp_files: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// What a prune removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub orphan_artifacts: usize,
    pub dangling_entries: usize,
    pub temp_files: usize,
    pub bytes_freed: u64,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.orphan_artifacts + self.dangling_entries + self.temp_files
    }
}
