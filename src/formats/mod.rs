//! Format adapters - turn source bytes into lazy record streams
//!
//! Each supported input format implements [`FormatAdapter`]. An adapter
//! declares which import options it honours, and fails fast on malformed
//! input: the first bad record ends the stream with an error and the import
//! is abandoned.
//!
//! Records are JSON-shaped maps regardless of the source format. Flat
//! formats produce string values (which the normalizer type-infers), document
//! formats produce typed values and nested objects.

mod delimited;
mod json;
mod jsonl;
mod toml;
mod xml;
mod yaml;

pub use self::delimited::CsvAdapter;
pub use self::json::JsonAdapter;
pub use self::jsonl::JsonLinesAdapter;
pub use self::toml::TomlAdapter;
pub use self::xml::XmlAdapter;
pub use self::yaml::YamlAdapter;

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::options::ImportOptions;

/// One raw record as produced by an adapter.
pub type Record = serde_json::Map<String, Value>;

/// Key used for scalar records (e.g. a JSON array of numbers).
pub const VALUE_KEY: &str = "value";

/// Key holding markup element text when the element also has attributes or children.
pub const TEXT_KEY: &str = "#text";

/// Prefix marking markup attributes; `@` cannot start an element name.
pub const ATTRIBUTE_PREFIX: &str = "@";

/// Supported (and recognized-but-external) input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Csv,
    Tsv,
    Json,
    Jsonl,
    Xml,
    Yaml,
    Toml,
    Spreadsheet,
    Parquet,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Tsv => "tsv",
            Format::Json => "json",
            Format::Jsonl => "jsonl",
            Format::Xml => "xml",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
            Format::Spreadsheet => "spreadsheet",
            Format::Parquet => "parquet",
        }
    }

    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Format::Csv),
            "tsv" | "tab" => Some(Format::Tsv),
            "json" => Some(Format::Json),
            "jsonl" | "ndjson" => Some(Format::Jsonl),
            "xml" => Some(Format::Xml),
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            "xlsx" | "xls" | "ods" => Some(Format::Spreadsheet),
            "parquet" => Some(Format::Parquet),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "tsv" => Ok(Format::Tsv),
            "json" => Ok(Format::Json),
            "jsonl" | "ndjson" => Ok(Format::Jsonl),
            "xml" => Ok(Format::Xml),
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            "xlsx" | "spreadsheet" => Ok(Format::Spreadsheet),
            "parquet" => Ok(Format::Parquet),
            _ => Err(format!(
                "Unknown format: '{}'. Supported: csv, tsv, json, jsonl, xml, yaml, toml",
                s
            )),
        }
    }
}

/// Import options an adapter may or may not honour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOption {
    Delimiter,
    NoHeader,
    Collection,
}

impl ImportOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportOption::Delimiter => "delimiter",
            ImportOption::NoHeader => "no-header",
            ImportOption::Collection => "collection",
        }
    }
}

/// Errors raised while reading a source in a given format
#[derive(Debug, Error, Diagnostic)]
pub enum FormatError {
    #[error("malformed {format} at record {record}: {message}")]
    #[diagnostic(code(quarry::format::malformed))]
    Malformed {
        format: Format,
        record: u64,
        message: String,
    },

    #[error("malformed {format} at line {line}: {message}")]
    #[diagnostic(code(quarry::format::malformed))]
    MalformedLine {
        format: Format,
        line: u64,
        message: String,
    },

    #[error("{format} input does not accept the `{option}` option")]
    #[diagnostic(
        code(quarry::format::unsupported_option),
        help("delimiter and no-header apply to csv/tsv; collection applies to json, yaml, toml and xml")
    )]
    UnsupportedOption {
        format: Format,
        option: &'static str,
    },

    #[error("invalid delimiter {0:?}: must be a single ASCII character")]
    #[diagnostic(code(quarry::format::delimiter))]
    InvalidDelimiter(char),

    #[error("collection `{path}` not found in {format} document")]
    #[diagnostic(code(quarry::format::collection))]
    CollectionNotFound { format: Format, path: String },

    #[error("{0} sources need an external adapter")]
    #[diagnostic(
        code(quarry::format::unsupported),
        help("convert the file to csv or json first")
    )]
    UnsupportedFormat(Format),

    #[error("I/O error reading {format} input: {source}")]
    #[diagnostic(code(quarry::format::io))]
    Io {
        format: Format,
        #[source]
        source: std::io::Error,
    },
}

/// Lazy sequence of records read from one source
///
/// Dropping the stream closes the underlying reader.
pub struct RecordStream<'a> {
    declared: Vec<String>,
    records: Box<dyn Iterator<Item = Result<Record, FormatError>> + 'a>,
}

impl<'a> RecordStream<'a> {
    pub fn new(records: impl Iterator<Item = Result<Record, FormatError>> + 'a) -> Self {
        Self {
            declared: Vec::new(),
            records: Box::new(records),
        }
    }

    /// Columns known before any record is read (e.g. a CSV header row)
    pub fn with_declared_columns(mut self, columns: Vec<String>) -> Self {
        self.declared = columns;
        self
    }

    pub fn declared_columns(&self) -> &[String] {
        &self.declared
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

/// Contract every importer satisfies
pub trait FormatAdapter {
    /// Format this adapter reads
    fn format(&self) -> Format;

    /// Whether the adapter honours the given import option
    fn accepts(&self, option: ImportOption) -> bool;

    /// Whether values arrive as untyped text that needs type inference
    fn infers_types(&self) -> bool {
        false
    }

    /// Start reading records from `input`
    fn open<'a>(&self, input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError>;
}

/// Build the adapter for `format`, rejecting options it does not accept
pub fn adapter_for(
    format: Format,
    options: &ImportOptions,
) -> Result<Box<dyn FormatAdapter>, FormatError> {
    let has_header = !options.no_header;
    let collection = options.collection.clone();

    let adapter: Box<dyn FormatAdapter> = match format {
        Format::Csv => Box::new(CsvAdapter::new(
            Format::Csv,
            options.delimiter.unwrap_or(','),
            has_header,
        )?),
        Format::Tsv => Box::new(CsvAdapter::new(
            Format::Tsv,
            options.delimiter.unwrap_or('\t'),
            has_header,
        )?),
        Format::Json => Box::new(JsonAdapter::new(collection)),
        Format::Jsonl => Box::new(JsonLinesAdapter),
        Format::Xml => Box::new(XmlAdapter::new(collection)),
        Format::Yaml => Box::new(YamlAdapter::new(collection)),
        Format::Toml => Box::new(TomlAdapter::new(collection)),
        Format::Spreadsheet | Format::Parquet => {
            return Err(FormatError::UnsupportedFormat(format))
        }
    };

    for option in options.requested() {
        if !adapter.accepts(option) {
            return Err(FormatError::UnsupportedOption {
                format,
                option: option.as_str(),
            });
        }
    }

    Ok(adapter)
}

/// Pick the record list out of a parsed document
///
/// Without a collection path, a top-level array yields one record per element
/// and anything else is a single record. With a dotted path, the value at
/// that path is used the same way.
pub(crate) fn document_records(
    format: Format,
    root: Value,
    collection: Option<&str>,
) -> Result<Vec<Record>, FormatError> {
    let selected = match collection {
        None => root,
        Some(path) => {
            let mut current = root;
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                current = match current {
                    Value::Object(mut map) => map.remove(segment),
                    Value::Array(mut items) => segment
                        .parse::<usize>()
                        .ok()
                        .filter(|i| *i < items.len())
                        .map(|i| items.swap_remove(i)),
                    _ => None,
                }
                .ok_or_else(|| FormatError::CollectionNotFound {
                    format,
                    path: path.to_string(),
                })?;
            }
            current
        }
    };

    Ok(match selected {
        Value::Array(items) => items.into_iter().map(into_record).collect(),
        Value::Null => Vec::new(),
        other => vec![into_record(other)],
    })
}

/// Wrap a value as a record; non-objects land under [`VALUE_KEY`]
pub(crate) fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => {
            let mut record = Record::new();
            record.insert(VALUE_KEY.to_string(), other);
            record
        }
    }
}
