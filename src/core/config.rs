//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Local config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = ".quarry.yaml";

/// quarry configuration with layered hierarchy
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where sidecars and artifacts live
    pub cache_dir: Option<PathBuf>,

    /// Whether imports are cached at all
    pub cache: Option<bool>,

    /// Identify sources by content digest rather than modification time
    pub content_digest: Option<bool>,

    /// Default per-source record limit
    pub row_limit: Option<u64>,
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load() -> Self {
        let mut config = Config::default();

        // 1. Built-in defaults (already in Default impl)

        // 2. Global user config (~/.config/quarry/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::read_file(&global_path) {
                config.merge(global);
            }
        }

        // 3. Local config (./.quarry.yaml)
        if let Some(local) = Self::read_file(Path::new(LOCAL_CONFIG_FILE)) {
            config.merge(local);
        }

        // 4. Environment variables
        config.merge(Self::from_env(|key| std::env::var(key).ok()));

        config
    }

    /// Parse one YAML layer; a missing file is silently skipped
    fn read_file(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read config file");
                return None;
            }
        };
        match serde_yml::from_str::<Config>(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring invalid config file");
                None
            }
        }
    }

    /// Environment layer: `QUARRY_CACHE_DIR`, `QUARRY_NO_CACHE`, `QUARRY_DIGEST`
    fn from_env(var: impl Fn(&str) -> Option<String>) -> Config {
        let mut config = Config::default();
        if let Some(dir) = var("QUARRY_CACHE_DIR").filter(|d| !d.is_empty()) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = var("QUARRY_NO_CACHE").and_then(|v| parse_flag(&v)) {
            config.cache = Some(!flag);
        }
        if let Some(flag) = var("QUARRY_DIGEST").and_then(|v| parse_flag(&v)) {
            config.content_digest = Some(flag);
        }
        config
    }

    /// Get the path to the global config file
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "quarry")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir;
        }
        if other.cache.is_some() {
            self.cache = other.cache;
        }
        if other.content_digest.is_some() {
            self.content_digest = other.content_digest;
        }
        if other.row_limit.is_some() {
            self.row_limit = other.row_limit;
        }
    }

    /// Effective cache directory, falling back to the platform cache dir
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("", "", "quarry")
                    .map(|dirs| dirs.cache_dir().to_path_buf())
            })
            .unwrap_or_else(|| std::env::temp_dir().join("quarry-cache"))
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.unwrap_or(true)
    }

    pub fn content_digest(&self) -> bool {
        self.content_digest.unwrap_or(false)
    }
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.caching_enabled());
        assert!(!config.content_digest());
        assert!(config.cache_dir().ends_with("quarry") || config.cache_dir().ends_with("quarry-cache"));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config {
            cache_dir: Some(PathBuf::from("/a")),
            row_limit: Some(5),
            ..Default::default()
        };
        base.merge(Config {
            cache_dir: Some(PathBuf::from("/b")),
            cache: Some(false),
            ..Default::default()
        });
        assert_eq!(base.cache_dir, Some(PathBuf::from("/b")));
        assert_eq!(base.row_limit, Some(5));
        assert!(!base.caching_enabled());
    }

    #[test]
    fn test_read_yaml_layer() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "cache_dir: /var/cache/q\ncontent_digest: true\nrow_limit: 100\n").unwrap();

        let config = Config::read_file(&path).unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/q")));
        assert!(config.content_digest());
        assert_eq!(config.row_limit, Some(100));
    }

    #[test]
    fn test_invalid_yaml_is_skipped() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "row_limit: [oops\n").unwrap();
        assert!(Config::read_file(&path).is_none());
        assert!(Config::read_file(&tmp.path().join("absent.yaml")).is_none());
    }

    #[test]
    fn test_env_layer() {
        let vars: HashMap<&str, &str> = [
            ("QUARRY_CACHE_DIR", "/tmp/qc"),
            ("QUARRY_NO_CACHE", "yes"),
            ("QUARRY_DIGEST", "0"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/qc")));
        assert_eq!(config.cache, Some(false));
        assert_eq!(config.content_digest, Some(false));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
