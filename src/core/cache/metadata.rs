//! Sidecar metadata store - one `<fingerprint>.json` per cache entry

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::error::CacheError;
use super::types::{CacheEntry, ENTRY_VERSION};

/// Prefix shared by every in-progress file in the cache directory
pub const TEMP_PREFIX: &str = ".tmp-";

const SIDECAR_EXT: &str = "json";

/// Reads and writes cache entries
///
/// Corrupt or foreign sidecars are skipped (a miss), never an error.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn sidecar_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, SIDECAR_EXT))
    }

    /// Whether a sidecar file exists, readable or not
    pub fn exists(&self, fingerprint: &str) -> bool {
        self.sidecar_path(fingerprint).is_file()
    }

    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let entry = read_entry(&self.sidecar_path(fingerprint))?;
        if entry.fingerprint != fingerprint {
            warn!(
                fingerprint,
                recorded = %entry.fingerprint,
                "sidecar fingerprint mismatch, ignoring entry"
            );
            return None;
        }
        Some(entry)
    }

    /// Write `entry` atomically: temp file in the cache directory, then rename
    pub fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.sidecar_path(&entry.fingerprint);
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".json")
            .tempfile_in(&self.dir)
            .map_err(|e| CacheError::io(&self.dir, e))?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, entry).map_err(|e| {
                CacheError::Serialization {
                    path: path.clone(),
                    source: e,
                }
            })?;
            writer
                .flush()
                .map_err(|e| CacheError::io(temp.path(), e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io(temp.path(), e))?;

        temp.persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;
        Ok(())
    }

    /// All readable entries, newest first
    pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries: Vec<CacheEntry> = self
            .files()?
            .iter()
            .filter_map(|path| read_entry(path))
            .collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(entries)
    }

    /// Remove one sidecar; returns whether it existed
    pub fn remove(&self, fingerprint: &str) -> Result<bool, CacheError> {
        remove_if_exists(&self.sidecar_path(fingerprint))
    }

    /// Remove every sidecar; returns how many were removed
    pub fn remove_all(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.files()? {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every sidecar file in the directory, readable or not
    pub fn files(&self) -> Result<Vec<PathBuf>, CacheError> {
        cache_files(&self.dir, |name| {
            !name.starts_with(TEMP_PREFIX) && name.ends_with(&format!(".{}", SIDECAR_EXT))
        })
    }
}

/// Read a sidecar, treating anything unexpected as absent
pub(crate) fn read_entry(path: &Path) -> Option<CacheEntry> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable cache metadata");
            return None;
        }
    };

    match serde_json::from_str::<CacheEntry>(&contents) {
        Ok(entry) if entry.version == ENTRY_VERSION => Some(entry),
        Ok(entry) => {
            warn!(
                path = %path.display(),
                version = entry.version,
                "cache metadata from another version, ignoring"
            );
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache metadata, ignoring");
            None
        }
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Regular files in `dir` whose names pass `keep`, sorted by name
pub(crate) fn cache_files(
    dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, CacheError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(dir, e)),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name_matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| keep(name));
        if is_file && name_matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
