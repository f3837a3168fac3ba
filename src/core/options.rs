//! Import options - everything that decides how bytes become rows

use serde::{Deserialize, Serialize};

use crate::formats::{Format, ImportOption};

/// Options for one import
///
/// Every field participates in the fingerprint: two runs that differ in any
/// of them never share a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Declared format, overriding extension detection for every source
    pub format: Option<Format>,

    /// Field delimiter for delimited text
    pub delimiter: Option<char>,

    /// Maximum records imported per source
    pub row_limit: Option<u64>,

    /// Positional table-name overrides
    pub table_names: Vec<String>,

    /// Dotted path (or markup element name) selecting the record collection
    pub collection: Option<String>,

    /// Treat the first delimited row as data
    pub no_header: bool,

    /// Identify sources by content digest instead of modification time
    pub content_digest: bool,
}

impl ImportOptions {
    /// Adapter-level options the user explicitly asked for
    pub fn requested(&self) -> Vec<ImportOption> {
        let mut requested = Vec::new();
        if self.delimiter.is_some() {
            requested.push(ImportOption::Delimiter);
        }
        if self.no_header {
            requested.push(ImportOption::NoHeader);
        }
        if self.collection.is_some() {
            requested.push(ImportOption::Collection);
        }
        requested
    }

    /// Whether two option sets would import the same sources the same way,
    /// ignoring how source identity is computed
    pub fn same_shape(&self, other: &ImportOptions) -> bool {
        Self {
            content_digest: false,
            ..self.clone()
        } == Self {
            content_digest: false,
            ..other.clone()
        }
    }
}
