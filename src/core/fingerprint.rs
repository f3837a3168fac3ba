//! Fingerprint calculation - deterministic cache keys for inputs + options
//!
//! Every field is written as `tag, length, bytes` so distinct field
//! sequences never produce the same byte stream. The SQL text and output
//! options are deliberately absent.

use sha2::{Digest, Sha256};

use crate::core::options::ImportOptions;
use crate::core::source::SourceDescriptor;

/// Bumped whenever normalization rules change, invalidating every entry
pub const NORMALIZER_VERSION: u32 = 2;

/// Hex digits kept from the SHA-256 output
const FINGERPRINT_LEN: usize = 32;

struct FieldHasher(Sha256);

impl FieldHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(Sha256::new());
        hasher.field(b'D', domain.as_bytes());
        hasher
    }

    fn field(&mut self, tag: u8, bytes: &[u8]) {
        self.0.update([tag]);
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn optional(&mut self, tag: u8, bytes: Option<&[u8]>) {
        match bytes {
            Some(bytes) => self.field(tag, bytes),
            None => self.0.update([tag, 0xff]),
        }
    }

    fn finish(self) -> String {
        let hex = format!("{:x}", self.0.finalize());
        hex[..FINGERPRINT_LEN].to_string()
    }
}

/// Compute the cache key for `sources` imported with `options`
///
/// Callers only fingerprint stable sources; a piped source contributes its
/// origin marker and no stat, so it could never validate anyway.
pub fn fingerprint(sources: &[SourceDescriptor], options: &ImportOptions) -> String {
    let mut hasher = FieldHasher::new("quarry-import");

    hasher.field(b'n', &(sources.len() as u64).to_le_bytes());
    for source in sources {
        let path = source
            .path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.origin.clone());
        hasher.field(b'p', path.as_bytes());
        hasher.field(b'f', source.format.as_str().as_bytes());
        hasher.field(b'N', source.table.as_bytes());

        let stat = source.stat.as_ref();
        hasher.optional(b's', stat.map(|s| s.size.to_le_bytes()).as_ref().map(|b| &b[..]));
        match stat.and_then(|s| s.digest.as_ref()) {
            Some(digest) => hasher.field(b'h', digest.as_bytes()),
            None => {
                let modified = stat.and_then(|s| s.modified).map(|m| {
                    let mut bytes = [0u8; 12];
                    bytes[..8].copy_from_slice(&m.secs.to_le_bytes());
                    bytes[8..].copy_from_slice(&m.nanos.to_le_bytes());
                    bytes
                });
                hasher.optional(b'm', modified.as_ref().map(|b| &b[..]));
            }
        }
    }

    hasher.optional(b'F', options.format.map(|f| f.as_str().as_bytes()));
    let delimiter = options.delimiter.map(String::from);
    hasher.optional(b'd', delimiter.as_deref().map(str::as_bytes));
    hasher.optional(
        b'l',
        options.row_limit.map(|l| l.to_le_bytes()).as_ref().map(|b| &b[..]),
    );
    hasher.field(b't', &(options.table_names.len() as u64).to_le_bytes());
    for name in &options.table_names {
        hasher.field(b'T', name.as_bytes());
    }
    hasher.optional(b'c', options.collection.as_deref().map(str::as_bytes));
    hasher.field(b'H', &[options.no_header as u8]);
    hasher.field(b'g', &[options.content_digest as u8]);
    hasher.field(b'V', &NORMALIZER_VERSION.to_le_bytes());

    hasher.finish()
}

/// Hash of the canonical source paths alone
///
/// Entries sharing a source key describe the same logical inputs, possibly
/// at different points in time.
pub fn source_key(sources: &[SourceDescriptor]) -> String {
    let mut hasher = FieldHasher::new("quarry-sources");
    hasher.field(b'n', &(sources.len() as u64).to_le_bytes());
    for source in sources {
        let path = source
            .path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.origin.clone());
        hasher.field(b'p', path.as_bytes());
    }
    hasher.finish()
}
