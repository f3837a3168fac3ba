//! Shared helper functions for CLI commands
//!
//! Settings resolution and the cached-import path used by both `query` and
//! `import`.

use console::style;
use miette::Result;
use tracing::warn;

use crate::cli::args::{GlobalOpts, ImportFlags};
use crate::core::cache::{ImportCache, MissReason, Resolution};
use crate::core::config::Config;
use crate::core::source::{describe_sources, SourceSpec};

/// Configuration with the command-line layer applied
pub fn load_config(global: &GlobalOpts) -> Config {
    let mut config = Config::load();
    global.apply(&mut config);
    config
}

/// Resolve `sources` to an artifact, through the cache when enabled
///
/// A failing cache directory never fails the command: the import is retried
/// uncached with a warning.
pub fn resolve_sources(
    config: &Config,
    flags: &ImportFlags,
    sources: &[String],
) -> Result<Resolution> {
    let options = flags.to_options(config);
    let specs: Vec<SourceSpec> = sources.iter().map(|s| SourceSpec::parse(s)).collect();
    let descriptors = describe_sources(&specs, &options, None)?;

    if !config.caching_enabled() {
        return Ok(ImportCache::import_uncached(
            &descriptors,
            &options,
            MissReason::CachingDisabled,
        )?);
    }

    let cache_dir = config.cache_dir();
    let cache = match ImportCache::open(&cache_dir) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(error = %e, "cache unavailable, importing without it");
            return Ok(ImportCache::import_uncached(
                &descriptors,
                &options,
                MissReason::CachingDisabled,
            )?);
        }
    };

    match cache.resolve(&descriptors, &options) {
        Ok(resolution) => Ok(resolution),
        Err(e) if e.is_cache_failure() => {
            warn!(error = %e, "cache write failed, importing without it");
            Ok(ImportCache::import_uncached(
                &descriptors,
                &options,
                MissReason::CachingDisabled,
            )?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Shorten a fingerprint for tables
///
/// Sidecars can be edited by hand, so the cut must not split a character.
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

/// Coarse age for listings: `42s`, `5m`, `3h`, `2d`
pub fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Green check mark prefix used by successful commands
pub fn ok_mark() -> console::StyledObject<&'static str> {
    style("✓").green()
}
