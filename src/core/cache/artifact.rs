//! Artifact store - SQLite files holding imported tables
//!
//! An artifact is staged as a `.tmp-*.db` file, filled through an
//! [`ArtifactWriter`], then sealed by renaming it to
//! `<fingerprint>-<millis>.db`. Sealed artifacts are never written again.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params_from_iter, Connection};
use tempfile::TempPath;
use tracing::debug;

use super::error::{CacheError, ResolveError};
use super::metadata::{cache_files, remove_if_exists, TEMP_PREFIX};
use crate::core::normalize::{Cell, Column};

const ARTIFACT_EXT: &str = "db";

/// Manages artifact files in the cache directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Create an empty temporary artifact, removed unless sealed
    pub fn stage(&self) -> Result<TempPath, CacheError> {
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".db")
            .tempfile_in(&self.dir)
            .map_err(|e| CacheError::io(&self.dir, e))?;
        Ok(temp.into_temp_path())
    }

    /// Publish a staged artifact under a fresh name; returns `(name, size)`
    pub fn seal(&self, staged: TempPath, fingerprint: &str) -> Result<(String, u64), CacheError> {
        let mut millis = Utc::now().timestamp_millis();
        let mut name = artifact_name(fingerprint, millis);
        while self.path(&name).exists() {
            millis += 1;
            name = artifact_name(fingerprint, millis);
        }

        let path = self.path(&name);
        staged
            .persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;
        let size = fs::metadata(&path)
            .map_err(|e| CacheError::io(&path, e))?
            .len();

        debug!(artifact = %name, size, "artifact sealed");
        Ok((name, size))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Current size on disk, if the artifact exists
    pub fn size(&self, name: &str) -> Option<u64> {
        fs::metadata(self.path(name)).ok().map(|m| m.len())
    }

    pub fn remove(&self, name: &str) -> Result<bool, CacheError> {
        remove_if_exists(&self.path(name))
    }

    /// Sealed artifact files
    pub fn files(&self) -> Result<Vec<PathBuf>, CacheError> {
        cache_files(&self.dir, |name| {
            !name.starts_with(TEMP_PREFIX) && name.ends_with(&format!(".{}", ARTIFACT_EXT))
        })
    }

    /// Leftovers from interrupted writes (artifacts and sidecars alike)
    pub fn temp_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        cache_files(&self.dir, |name| name.starts_with(TEMP_PREFIX))
    }
}

fn artifact_name(fingerprint: &str, millis: i64) -> String {
    format!("{}-{}.{}", fingerprint, millis, ARTIFACT_EXT)
}

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Writes tables into a staged artifact
pub struct ArtifactWriter {
    conn: Connection,
    path: PathBuf,
}

impl ArtifactWriter {
    pub fn create(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path).map_err(|e| CacheError::db(path, e))?;

        // The file is private until sealed; a crash just leaves a temp file
        conn.execute_batch("PRAGMA journal_mode=OFF; PRAGMA synchronous=OFF;")
            .map_err(|e| CacheError::db(path, e))?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Create `table` and stream `rows` into it; returns the row count
    pub fn write_table(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: impl Iterator<Item = Result<Vec<Cell>, ResolveError>>,
    ) -> Result<u64, ResolveError> {
        let path = self.path.clone();
        let db = |e: rusqlite::Error| ResolveError::from(CacheError::db(&path, e));

        let column_defs = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders
        );

        let tx = self.conn.transaction().map_err(db)?;
        tx.execute(
            &format!("CREATE TABLE {} ({})", quote_ident(table), column_defs),
            [],
        )
        .map_err(db)?;

        let mut count = 0u64;
        {
            let mut stmt = tx.prepare_cached(&insert).map_err(db)?;
            for row in rows {
                let row = row?;
                stmt.execute(params_from_iter(row.iter())).map_err(db)?;
                count += 1;
            }
        }
        tx.commit().map_err(db)?;

        debug!(table, rows = count, columns = columns.len(), "table written");
        Ok(count)
    }

    /// Close the connection so the file can be sealed
    pub fn finish(self) -> Result<(), CacheError> {
        let path = self.path;
        self.conn
            .close()
            .map_err(|(_, e)| CacheError::db(&path, e))
    }
}
