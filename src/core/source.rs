//! Source descriptors - one physical input and its recorded stat snapshot

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::core::options::ImportOptions;
use crate::formats::Format;

/// Table name given to piped input
pub const STDIN_TABLE: &str = "stdin";

/// What the user asked to import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A local file
    Path(PathBuf),
    /// Standard input (`-`)
    Stdin,
    /// A URL, resolved to a local file by a [`RemoteFetcher`]
    Remote(String),
}

impl SourceSpec {
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            SourceSpec::Stdin
        } else if is_url(arg) {
            SourceSpec::Remote(arg.to_string())
        } else {
            SourceSpec::Path(PathBuf::from(arg))
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Path(path) => write!(f, "{}", path.display()),
            SourceSpec::Stdin => f.write_str("-"),
            SourceSpec::Remote(url) => f.write_str(url),
        }
    }
}

fn is_url(arg: &str) -> bool {
    match arg.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Downloads remote sources to local files before they are fingerprinted
pub trait RemoteFetcher {
    fn fetch(&self, url: &str) -> Result<PathBuf, SourceError>;
}

/// Modification time with sub-second precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedTime {
    pub secs: i64,
    pub nanos: u32,
}

/// Identity of a file's contents at a point in time
///
/// Stat mode records size and modification time; digest mode records size
/// and a SHA-256 of the bytes instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<ModifiedTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl StatSnapshot {
    /// Capture the current snapshot of `path`
    pub fn capture(path: &Path, content_digest: bool) -> Result<Self, SourceError> {
        let metadata = fs::metadata(path).map_err(|e| SourceError::io(path, e))?;
        if !metadata.is_file() {
            return Err(SourceError::NotAFile(path.to_path_buf()));
        }

        if content_digest {
            Ok(Self {
                size: metadata.len(),
                modified: None,
                digest: Some(digest_file(path)?),
            })
        } else {
            let modified = metadata
                .modified()
                .map_err(|e| SourceError::io(path, e))?
                .duration_since(UNIX_EPOCH)
                .map(|d| ModifiedTime {
                    secs: d.as_secs() as i64,
                    nanos: d.subsec_nanos(),
                })
                .unwrap_or(ModifiedTime { secs: 0, nanos: 0 });
            Ok(Self {
                size: metadata.len(),
                modified: Some(modified),
                digest: None,
            })
        }
    }
}

/// SHA-256 of a file's bytes, streamed
fn digest_file(path: &Path) -> Result<String, SourceError> {
    let mut file = File::open(path).map_err(|e| SourceError::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| SourceError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// One input ready for import
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    /// The argument as the user typed it
    pub origin: String,
    /// Canonical absolute path; `None` for piped input
    pub path: Option<PathBuf>,
    pub format: Format,
    pub table: String,
    /// Stat snapshot taken when the source was described
    pub stat: Option<StatSnapshot>,
    buffered: Option<Arc<[u8]>>,
}

impl SourceDescriptor {
    /// Describe a local file
    pub fn local(
        origin: impl Into<String>,
        path: &Path,
        format: Format,
        table: impl Into<String>,
        content_digest: bool,
    ) -> Result<Self, SourceError> {
        let canonical = fs::canonicalize(path).map_err(|e| SourceError::io(path, e))?;
        let stat = StatSnapshot::capture(&canonical, content_digest)?;
        Ok(Self {
            origin: origin.into(),
            path: Some(canonical),
            format,
            table: table.into(),
            stat: Some(stat),
            buffered: None,
        })
    }

    /// Describe piped bytes, held in memory so they can be read more than once
    pub fn piped(bytes: impl Into<Arc<[u8]>>, format: Format, table: impl Into<String>) -> Self {
        Self {
            origin: "-".to_string(),
            path: None,
            format,
            table: table.into(),
            stat: None,
            buffered: Some(bytes.into()),
        }
    }

    /// Piped input can't be re-validated later, so it is never cached
    pub fn is_stable(&self) -> bool {
        self.path.is_some()
    }

    /// Open a fresh reader positioned at the start of the source
    pub fn open(&self) -> Result<Box<dyn BufRead + '_>, SourceError> {
        match (&self.path, &self.buffered) {
            (Some(path), _) => {
                let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
                Ok(Box::new(BufReader::new(file)))
            }
            (None, Some(bytes)) => Ok(Box::new(Cursor::new(&bytes[..]))),
            (None, None) => Err(SourceError::Closed(self.origin.clone())),
        }
    }

    /// Whether the file still matches the snapshot taken at describe time
    pub fn is_unchanged(&self) -> Result<bool, SourceError> {
        match (&self.path, &self.stat) {
            (Some(path), Some(stat)) => {
                let now = StatSnapshot::capture(path, stat.digest.is_some())?;
                Ok(&now == stat)
            }
            _ => Ok(false),
        }
    }
}

/// Resolve user arguments into descriptors
///
/// Remote sources go through `fetcher`; standard input is read once into
/// memory. Table names are derived from file stems unless overridden.
pub fn describe_sources(
    specs: &[SourceSpec],
    options: &ImportOptions,
    fetcher: Option<&dyn RemoteFetcher>,
) -> Result<Vec<SourceDescriptor>, SourceError> {
    describe_sources_with(specs, options, fetcher, || {
        let mut bytes = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .map_err(|e| SourceError::io(Path::new("-"), e))?;
        Ok(bytes)
    })
}

/// [`describe_sources`] with an explicit reader for piped input
pub fn describe_sources_with(
    specs: &[SourceSpec],
    options: &ImportOptions,
    fetcher: Option<&dyn RemoteFetcher>,
    read_stdin: impl FnOnce() -> Result<Vec<u8>, SourceError>,
) -> Result<Vec<SourceDescriptor>, SourceError> {
    if specs.is_empty() {
        return Err(SourceError::NoSources);
    }
    if specs.iter().filter(|s| **s == SourceSpec::Stdin).count() > 1 {
        return Err(SourceError::StdinRepeated);
    }
    if options.table_names.len() > specs.len() {
        return Err(SourceError::TooManyTableNames {
            names: options.table_names.len(),
            sources: specs.len(),
        });
    }

    let mut read_stdin = Some(read_stdin);
    let mut descriptors = Vec::with_capacity(specs.len());

    for spec in specs {
        let descriptor = match spec {
            SourceSpec::Stdin => {
                let format = options.format.unwrap_or(Format::Csv);
                let bytes = match read_stdin.take() {
                    Some(read) => read()?,
                    None => return Err(SourceError::StdinRepeated),
                };
                debug!(bytes = bytes.len(), "buffered standard input");
                SourceDescriptor::piped(bytes, format, STDIN_TABLE)
            }
            SourceSpec::Path(path) => {
                let format = detect_format(path, options)?;
                let table = table_stem(path);
                SourceDescriptor::local(spec.to_string(), path, format, table, options.content_digest)?
            }
            SourceSpec::Remote(url) => {
                let fetcher = fetcher.ok_or_else(|| SourceError::NoFetcher(url.clone()))?;
                let local = fetcher.fetch(url)?;
                let format = match options.format {
                    Some(format) => format,
                    None => Format::from_path(&local)
                        .or_else(|| Format::from_path(Path::new(url_path(url))))
                        .ok_or_else(|| SourceError::UnknownFormat(PathBuf::from(url)))?,
                };
                let table = table_stem(Path::new(url_path(url)));
                debug!(url = %url, path = %local.display(), "fetched remote source");
                SourceDescriptor::local(url.clone(), &local, format, table, options.content_digest)?
            }
        };
        descriptors.push(descriptor);
    }

    assign_table_names(&mut descriptors, &options.table_names)?;
    Ok(descriptors)
}

fn detect_format(path: &Path, options: &ImportOptions) -> Result<Format, SourceError> {
    match options.format {
        Some(format) => Ok(format),
        None => Format::from_path(path).ok_or_else(|| SourceError::UnknownFormat(path.to_path_buf())),
    }
}

/// Path part of a URL, without query or fragment
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split(['?', '#']).next().unwrap_or(rest)
}

fn table_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_table_name(&stem)
}

/// Reduce a name to `[A-Za-z0-9_]`, never starting with a digit
pub fn sanitize_table_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("source");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Apply positional overrides, then de-duplicate derived names
fn assign_table_names(
    descriptors: &mut [SourceDescriptor],
    overrides: &[String],
) -> Result<(), SourceError> {
    let mut taken: Vec<String> = Vec::new();

    for name in overrides {
        if !is_valid_table_name(name) {
            return Err(SourceError::InvalidTableName(name.clone()));
        }
        if taken.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            return Err(SourceError::DuplicateTableName(name.clone()));
        }
        taken.push(name.clone());
    }

    for (index, descriptor) in descriptors.iter_mut().enumerate() {
        if let Some(name) = overrides.get(index) {
            descriptor.table = name.clone();
            continue;
        }
        let base = descriptor.table.clone();
        let mut candidate = base.clone();
        let mut n = 2;
        while taken.iter().any(|t| t.eq_ignore_ascii_case(&candidate)) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        taken.push(candidate.clone());
        descriptor.table = candidate;
    }

    Ok(())
}

/// Errors resolving or reading a source
#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("no sources given")]
    #[diagnostic(code(quarry::source::none))]
    NoSources,

    #[error("source not found: {}", .0.display())]
    #[diagnostic(code(quarry::source::not_found))]
    NotFound(PathBuf),

    #[error("{}: {source}", path.display())]
    #[diagnostic(code(quarry::source::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not a regular file: {}", .0.display())]
    #[diagnostic(code(quarry::source::not_a_file))]
    NotAFile(PathBuf),

    #[error("cannot detect the format of {}", .0.display())]
    #[diagnostic(
        code(quarry::source::unknown_format),
        help("pass --format csv|tsv|json|jsonl|xml|yaml|toml")
    )]
    UnknownFormat(PathBuf),

    #[error("standard input can only be used once")]
    #[diagnostic(code(quarry::source::stdin))]
    StdinRepeated,

    #[error("no fetcher configured for remote source {0}")]
    #[diagnostic(
        code(quarry::source::remote),
        help("download the file and pass its local path")
    )]
    NoFetcher(String),

    #[error("fetching {url} failed: {message}")]
    #[diagnostic(code(quarry::source::fetch))]
    Fetch { url: String, message: String },

    #[error("{names} table names given for {sources} sources")]
    #[diagnostic(code(quarry::source::table_names))]
    TooManyTableNames { names: usize, sources: usize },

    #[error("invalid table name '{0}'")]
    #[diagnostic(
        code(quarry::source::table_name),
        help("table names use letters, digits and '_' and do not start with a digit")
    )]
    InvalidTableName(String),

    #[error("table name '{0}' given more than once")]
    #[diagnostic(code(quarry::source::table_name))]
    DuplicateTableName(String),

    #[error("source {0} can no longer be read")]
    #[diagnostic(code(quarry::source::closed))]
    Closed(String),
}

impl SourceError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            SourceError::NotFound(path.to_path_buf())
        } else {
            SourceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn no_stdin() -> Result<Vec<u8>, SourceError> {
        panic!("stdin should not be read")
    }

    #[test]
    fn test_parse_spec() {
        assert_eq!(SourceSpec::parse("-"), SourceSpec::Stdin);
        assert_eq!(
            SourceSpec::parse("s3://bucket/a.csv"),
            SourceSpec::Remote("s3://bucket/a.csv".to_string())
        );
        assert_eq!(
            SourceSpec::parse("data/a.csv"),
            SourceSpec::Path(PathBuf::from("data/a.csv"))
        );
        assert_eq!(
            SourceSpec::parse("c:/odd://name.csv"),
            SourceSpec::Path(PathBuf::from("c:/odd://name.csv"))
        );
    }

    #[test]
    fn test_sanitize_table_name() {
        assert_eq!(sanitize_table_name("sales-2024 q1"), "sales_2024_q1");
        assert_eq!(sanitize_table_name("2024"), "_2024");
        assert_eq!(sanitize_table_name(""), "source");
    }

    #[test]
    fn test_describe_detects_format_and_table() {
        let tmp = tempdir().unwrap();
        let path = write(tmp.path(), "people.csv", "a\n1\n");
        let sources = describe_sources_with(
            &[SourceSpec::Path(path.clone())],
            &ImportOptions::default(),
            None,
            no_stdin,
        )
        .unwrap();

        assert_eq!(sources[0].format, Format::Csv);
        assert_eq!(sources[0].table, "people");
        assert_eq!(sources[0].path, Some(fs::canonicalize(&path).unwrap()));
        assert_eq!(sources[0].stat.as_ref().unwrap().size, 4);
        assert!(sources[0].is_stable());
    }

    #[test]
    fn test_duplicate_stems_get_suffix() {
        let tmp = tempdir().unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        let a = write(tmp.path(), "data.csv", "x\n1\n");
        let b = write(&tmp.path().join("b"), "DATA.json", "[]");
        let sources = describe_sources_with(
            &[SourceSpec::Path(a), SourceSpec::Path(b)],
            &ImportOptions::default(),
            None,
            no_stdin,
        )
        .unwrap();
        assert_eq!(sources[0].table, "data");
        assert_eq!(sources[1].table, "DATA_2");
    }

    #[test]
    fn test_table_overrides() {
        let tmp = tempdir().unwrap();
        let a = write(tmp.path(), "a.csv", "x\n");
        let b = write(tmp.path(), "b.csv", "x\n");
        let options = ImportOptions {
            table_names: vec!["b".to_string()],
            ..Default::default()
        };
        let sources = describe_sources_with(
            &[SourceSpec::Path(a.clone()), SourceSpec::Path(b.clone())],
            &options,
            None,
            no_stdin,
        )
        .unwrap();
        assert_eq!(sources[0].table, "b");
        assert_eq!(sources[1].table, "b_2");

        let bad = ImportOptions {
            table_names: vec!["1abc".to_string()],
            ..Default::default()
        };
        let err = describe_sources_with(&[SourceSpec::Path(a)], &bad, None, no_stdin).unwrap_err();
        assert!(matches!(err, SourceError::InvalidTableName(_)));
    }

    #[test]
    fn test_missing_file() {
        let tmp = tempdir().unwrap();
        let err = describe_sources_with(
            &[SourceSpec::Path(tmp.path().join("nope.csv"))],
            &ImportOptions::default(),
            None,
            no_stdin,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_unknown_extension_needs_format() {
        let tmp = tempdir().unwrap();
        let path = write(tmp.path(), "data.txt", "a\n");
        let err = describe_sources_with(
            &[SourceSpec::Path(path.clone())],
            &ImportOptions::default(),
            None,
            no_stdin,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::UnknownFormat(_)));

        let options = ImportOptions {
            format: Some(Format::Tsv),
            ..Default::default()
        };
        let sources =
            describe_sources_with(&[SourceSpec::Path(path)], &options, None, no_stdin).unwrap();
        assert_eq!(sources[0].format, Format::Tsv);
    }

    #[test]
    fn test_stdin_is_buffered_and_rereadable() {
        let sources = describe_sources_with(
            &[SourceSpec::Stdin],
            &ImportOptions::default(),
            None,
            || Ok(b"a,b\n1,2\n".to_vec()),
        )
        .unwrap();
        let source = &sources[0];
        assert!(!source.is_stable());
        assert_eq!(source.table, STDIN_TABLE);
        assert_eq!(source.format, Format::Csv);

        for _ in 0..2 {
            let mut text = String::new();
            source.open().unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "a,b\n1,2\n");
        }
    }

    #[test]
    fn test_stdin_twice_is_rejected() {
        let err = describe_sources_with(
            &[SourceSpec::Stdin, SourceSpec::Stdin],
            &ImportOptions::default(),
            None,
            || Ok(Vec::new()),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::StdinRepeated));
    }

    #[test]
    fn test_remote_without_fetcher() {
        let err = describe_sources_with(
            &[SourceSpec::Remote("https://example.com/a.csv".to_string())],
            &ImportOptions::default(),
            None,
            no_stdin,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::NoFetcher(_)));
    }

    struct LocalCopy(PathBuf);

    impl RemoteFetcher for LocalCopy {
        fn fetch(&self, _url: &str) -> Result<PathBuf, SourceError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_remote_with_fetcher() {
        let tmp = tempdir().unwrap();
        let local = write(tmp.path(), "download.bin", "[{\"a\":1}]");
        let fetcher = LocalCopy(local);
        let sources = describe_sources_with(
            &[SourceSpec::Remote(
                "https://example.com/exports/orders.json?sig=1".to_string(),
            )],
            &ImportOptions::default(),
            Some(&fetcher),
            no_stdin,
        )
        .unwrap();
        assert_eq!(sources[0].format, Format::Json);
        assert_eq!(sources[0].table, "orders");
        assert!(sources[0].is_stable());
    }

    #[test]
    fn test_digest_snapshot_ignores_mtime() {
        let tmp = tempdir().unwrap();
        let path = write(tmp.path(), "a.csv", "x\n1\n");
        let snapshot = StatSnapshot::capture(&path, true).unwrap();
        assert!(snapshot.modified.is_none());
        assert_eq!(snapshot.digest.as_ref().unwrap().len(), 64);

        let again = StatSnapshot::capture(&path, true).unwrap();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn test_change_is_detected() {
        let tmp = tempdir().unwrap();
        let path = write(tmp.path(), "a.csv", "x\n1\n");
        let source = SourceDescriptor::local("a.csv", &path, Format::Csv, "a", false).unwrap();
        assert!(source.is_unchanged().unwrap());

        write(tmp.path(), "a.csv", "x\n1\n2\n");
        assert!(!source.is_unchanged().unwrap());
    }
}
