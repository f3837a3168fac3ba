//! Import cache - materialized copies of structured files, keyed by fingerprint
//!
//! This module provides a file-backed cache that:
//! - Fingerprints sources (path, size, mtime or digest) plus import options
//! - Serves a previously sealed SQLite artifact when the fingerprint matches
//!   and every recorded stat still holds
//! - Otherwise imports afresh, seals a new artifact, writes its sidecar and
//!   evicts entries it supersedes
//!
//! Layout of the cache directory:
//! - `<fingerprint>.json` sidecar per entry
//! - `<fingerprint>-<millis>.db` artifact per entry
//! - `.tmp-*` files while a write is in progress
//!
//! The cache assumes a single writer. Every publish is temp-then-rename, so
//! an interrupted import never leaves a visible entry.

mod artifact;
mod error;
mod import;
mod metadata;
mod types;

pub use artifact::{quote_ident, ArtifactStore, ArtifactWriter};
pub use error::{CacheError, ResolveError};
pub use metadata::MetadataStore;
pub use types::*;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::fingerprint::{fingerprint, source_key};
use crate::core::options::ImportOptions;
use crate::core::source::SourceDescriptor;

use self::import::{import_sources, ImportOutcome};
use self::metadata::{read_entry, remove_if_exists};

/// The import cache rooted at one directory
#[derive(Debug, Clone)]
pub struct ImportCache {
    dir: PathBuf,
    metadata: MetadataStore,
    artifacts: ArtifactStore,
}

impl ImportCache {
    /// Open (creating if needed) the cache directory
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            metadata: MetadataStore::new(dir),
            artifacts: ArtifactStore::new(dir),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get an artifact holding `sources`, importing only when needed
    pub fn resolve(
        &self,
        sources: &[SourceDescriptor],
        options: &ImportOptions,
    ) -> Result<Resolution, ResolveError> {
        if sources.iter().any(|s| !s.is_stable()) {
            info!(reason = %MissReason::UnstableSource, "cache miss");
            return Self::import_uncached(sources, options, MissReason::UnstableSource);
        }

        let fp = fingerprint(sources, options);
        let key = source_key(sources);

        let stale = self.metadata.get(&fp);
        let reason = match &stale {
            Some(entry) => match self.validate(entry, sources) {
                Some(handle) => {
                    info!(fingerprint = %fp, "cache hit");
                    return Ok(Resolution {
                        handle,
                        cache_hit: true,
                        miss_reason: None,
                        fingerprint: Some(fp),
                        tables: entry.tables.clone(),
                        warnings: Vec::new(),
                    });
                }
                None => MissReason::InvalidEntry,
            },
            None if self.metadata.exists(&fp) => MissReason::InvalidEntry,
            None => self.explain_miss(&key, sources, options),
        };
        info!(fingerprint = %fp, reason = %reason, "cache miss");

        let staged = self.artifacts.stage()?;
        let outcome = import_sources(&staged, sources, options)?;
        let (artifact, artifact_size) = self.artifacts.seal(staged, &fp)?;

        let entry = CacheEntry {
            version: ENTRY_VERSION,
            fingerprint: fp.clone(),
            source_key: key,
            options: options.clone(),
            sources: sources
                .iter()
                .filter_map(|s| {
                    Some(SourceRecord {
                        path: s.path.clone()?,
                        format: s.format,
                        stat: s.stat.clone()?,
                    })
                })
                .collect(),
            tables: outcome.tables.clone(),
            created_at: Utc::now(),
            artifact: artifact.clone(),
            artifact_size,
        };

        if let Err(e) = self.metadata.put(&entry) {
            if let Err(cleanup) = self.artifacts.remove(&artifact) {
                warn!(error = %cleanup, "could not remove unpublished artifact");
            }
            return Err(e.into());
        }

        if let Some(old) = stale.filter(|old| old.artifact != artifact) {
            self.discard_artifact(&old.artifact);
        }
        self.evict_superseded(&entry);

        let ImportOutcome { tables, warnings } = outcome;
        Ok(Resolution {
            handle: ArtifactHandle::cached(self.artifacts.path(&artifact)),
            cache_hit: false,
            miss_reason: Some(reason),
            fingerprint: Some(fp),
            tables,
            warnings,
        })
    }

    /// Import into a temporary artifact that disappears with the handle
    pub fn import_uncached(
        sources: &[SourceDescriptor],
        options: &ImportOptions,
        reason: MissReason,
    ) -> Result<Resolution, ResolveError> {
        let temp = tempfile::Builder::new()
            .prefix("quarry-")
            .suffix(".db")
            .tempfile()
            .map_err(|e| CacheError::io(std::env::temp_dir(), e))?
            .into_temp_path();

        let ImportOutcome { tables, warnings } = import_sources(&temp, sources, options)?;
        debug!(path = %temp.display(), reason = %reason, "uncached import");

        Ok(Resolution {
            handle: ArtifactHandle::temporary(temp),
            cache_hit: false,
            miss_reason: Some(reason),
            fingerprint: None,
            tables,
            warnings,
        })
    }

    /// Check a stored entry against the sources as they are now
    fn validate(&self, entry: &CacheEntry, sources: &[SourceDescriptor]) -> Option<ArtifactHandle> {
        if entry.sources.len() != sources.len() || entry.tables.len() != sources.len() {
            debug!(fingerprint = %entry.fingerprint, "entry describes a different source count");
            return None;
        }

        let stats_match = entry.sources.iter().zip(sources).all(|(recorded, current)| {
            current.path.as_ref() == Some(&recorded.path)
                && current.stat.as_ref() == Some(&recorded.stat)
        });
        if !stats_match {
            debug!(fingerprint = %entry.fingerprint, "recorded stat differs");
            return None;
        }

        let names_match = entry
            .tables
            .iter()
            .zip(sources)
            .all(|(table, current)| table.name == current.table);
        if !names_match {
            debug!(fingerprint = %entry.fingerprint, "recorded table names differ");
            return None;
        }

        if self.artifacts.size(&entry.artifact) != Some(entry.artifact_size) {
            debug!(artifact = %entry.artifact, "artifact missing or resized");
            return None;
        }

        Some(ArtifactHandle::cached(self.artifacts.path(&entry.artifact)))
    }

    /// Why there is no entry for these exact inputs
    fn explain_miss(
        &self,
        key: &str,
        sources: &[SourceDescriptor],
        options: &ImportOptions,
    ) -> MissReason {
        let related: Vec<CacheEntry> = match self.metadata.list() {
            Ok(entries) => entries.into_iter().filter(|e| e.source_key == key).collect(),
            Err(e) => {
                warn!(error = %e, "could not list cache entries");
                Vec::new()
            }
        };

        let names: Vec<&str> = sources.iter().map(|s| s.table.as_str()).collect();
        if related
            .iter()
            .any(|e| &e.options == options && table_names(e) == names)
        {
            MissReason::ChangedSource
        } else if related.iter().any(|e| &e.options != options) {
            MissReason::OptionsChanged
        } else {
            MissReason::NewInput
        }
    }

    /// Drop entries for the same sources, options and table names that
    /// `current` replaces
    fn evict_superseded(&self, current: &CacheEntry) {
        let entries = match self.metadata.list() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not list cache entries for eviction");
                return;
            }
        };

        for old in entries {
            if old.source_key == current.source_key
                && old.fingerprint != current.fingerprint
                && old.options.same_shape(&current.options)
                && table_names(&old) == table_names(current)
            {
                debug!(fingerprint = %old.fingerprint, "evicting superseded entry");
                if let Err(e) = self.remove_entry(&old) {
                    warn!(fingerprint = %old.fingerprint, error = %e, "could not evict entry");
                }
            }
        }
    }

    fn discard_artifact(&self, name: &str) {
        if let Err(e) = self.artifacts.remove(name) {
            warn!(artifact = %name, error = %e, "could not remove stale artifact");
        }
    }

    /// Sidecar first, so a failure leaves an orphan artifact rather than
    /// an entry pointing at nothing
    fn remove_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.metadata.remove(&entry.fingerprint)?;
        self.artifacts.remove(&entry.artifact)?;
        Ok(())
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    /// All entries, newest first
    pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        self.metadata.list()
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.metadata.list()?;
        let live: HashSet<&str> = entries.iter().map(|e| e.artifact.as_str()).collect();

        let mut stats = CacheStats {
            entries: entries.len(),
            tables: entries.iter().map(|e| e.tables.len()).sum(),
            rows: entries.iter().map(|e| e.total_rows()).sum(),
            oldest: entries.iter().map(|e| e.created_at).min(),
            newest: entries.iter().map(|e| e.created_at).max(),
            ..Default::default()
        };

        for path in self.artifacts.files()? {
            stats.total_bytes += file_size(&path);
            if !live.contains(file_name(&path)) {
                stats.orphans += 1;
            }
        }
        for path in self.metadata.files()? {
            stats.total_bytes += file_size(&path);
        }
        stats.temp_files = self.artifacts.temp_files()?.len();

        Ok(stats)
    }

    /// Remove the single entry whose fingerprint starts with `prefix`
    pub fn clear(&self, prefix: &str) -> Result<CacheEntry, CacheError> {
        let mut matches: Vec<CacheEntry> = self
            .metadata
            .list()?
            .into_iter()
            .filter(|e| !prefix.is_empty() && e.fingerprint.starts_with(prefix))
            .collect();

        match matches.len() {
            0 => Err(CacheError::NoMatch(prefix.to_string())),
            1 => {
                let entry = matches.remove(0);
                self.remove_entry(&entry)?;
                info!(fingerprint = %entry.fingerprint, "cache entry cleared");
                Ok(entry)
            }
            count => Err(CacheError::Ambiguous {
                prefix: prefix.to_string(),
                count,
            }),
        }
    }

    /// Remove every entry and artifact; returns the number of entries removed
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        let removed = self.metadata.list()?.len();
        self.metadata.remove_all()?;
        for path in self.artifacts.files()? {
            remove_if_exists(&path)?;
        }
        info!(entries = removed, "cache cleared");
        Ok(removed)
    }

    /// Remove orphaned artifacts, sidecars without a usable artifact and
    /// leftover temporary files
    pub fn prune(&self) -> Result<PruneReport, CacheError> {
        let mut report = PruneReport::default();
        let mut live: HashSet<String> = HashSet::new();

        for path in self.metadata.files()? {
            let usable = read_entry(&path).filter(|entry| {
                file_name(&path) == format!("{}.json", entry.fingerprint)
                    && self.artifacts.exists(&entry.artifact)
            });
            match usable {
                Some(entry) => {
                    live.insert(entry.artifact);
                }
                None => {
                    report.bytes_freed += file_size(&path);
                    if remove_if_exists(&path)? {
                        report.dangling_entries += 1;
                    }
                }
            }
        }

        for path in self.artifacts.files()? {
            if !live.contains(file_name(&path)) {
                report.bytes_freed += file_size(&path);
                if remove_if_exists(&path)? {
                    report.orphan_artifacts += 1;
                }
            }
        }

        for path in self.artifacts.temp_files()? {
            report.bytes_freed += file_size(&path);
            if remove_if_exists(&path)? {
                report.temp_files += 1;
            }
        }

        info!(removed = report.total(), bytes = report.bytes_freed, "cache pruned");
        Ok(report)
    }
}

fn table_names(entry: &CacheEntry) -> Vec<&str> {
    entry.tables.iter().map(|t| t.name.as_str()).collect()
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
