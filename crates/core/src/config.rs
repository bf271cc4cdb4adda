//! Config file parsing for `~/.config/epub-reader/config.toml`.
//!
//! Use `library_options_from_config` to turn the loaded config (after
//! environment overrides) into the options a [`Library`](crate::library::Library)
//! is opened with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::library::LibraryOptions;
use crate::security::SecurityLimits;

pub const ENV_BOOKS_DIR: &str = "BOOKS_DIR";
pub const ENV_CACHE_SIZE: &str = "MAX_BOOK_CACHE_SIZE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory holding one `{id}/` folder per book.
    pub books_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_capacity() -> usize {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_archive_mb: u64,
    pub max_toc_depth: usize,
    pub max_chapter_index: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_archive_mb: 500,
            max_toc_depth: 10,
            max_chapter_index: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_compression_ratio: Option<u64>,
    pub max_file_count: Option<u64>,
    pub max_resource_mb: Option<u64>,
    pub max_total_mb: Option<u64>,
    pub max_nesting_depth: Option<u32>,
}

impl AppConfig {
    /// Apply `BOOKS_DIR` and `MAX_BOOK_CACHE_SIZE` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = get(ENV_BOOKS_DIR).filter(|d| !d.trim().is_empty()) {
            self.library.books_dir = Some(dir);
        }
        if let Some(raw) = get(ENV_CACHE_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.cache.capacity = n,
                Err(_) => tracing::warn!("Ignoring {}={:?}: not a number", ENV_CACHE_SIZE, raw),
            }
        }
    }

    /// Books root: configured, else the platform data dir, else `./books`.
    pub fn books_dir(&self) -> PathBuf {
        match &self.library.books_dir {
            Some(dir) => PathBuf::from(dir),
            None => default_books_dir(),
        }
    }
}

pub fn default_books_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(mut p) => {
            p.push("epub-reader");
            p.push("books");
            p
        }
        None => PathBuf::from("books"),
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("epub-reader");
        p.push("config.toml");
        p
    })
}

/// Load config from the default path, falling back to defaults when the file
/// is missing or unreadable.
pub fn load_config() -> AppConfig {
    let Some(path) = config_path() else {
        return AppConfig::default();
    };
    if !path.exists() {
        return AppConfig::default();
    }
    match load_config_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("{}; using defaults", e);
            AppConfig::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<AppConfig>(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

/// Build security limits from config. Uses defaults for any unset values.
pub fn security_limits_from_config(cfg: &AppConfig) -> SecurityLimits {
    let mb = |v: u64| v.saturating_mul(1024).saturating_mul(1024);
    let mut limits = SecurityLimits {
        max_archive_bytes: mb(cfg.limits.max_archive_mb),
        ..SecurityLimits::default()
    };
    let s = &cfg.security;
    if let Some(r) = s.max_compression_ratio {
        limits.max_compression_ratio = r;
    }
    if let Some(n) = s.max_file_count {
        limits.max_file_count = n;
    }
    if let Some(m) = s.max_resource_mb {
        limits.max_resource_size_bytes = mb(m);
    }
    if let Some(m) = s.max_total_mb {
        limits.max_total_size_bytes = mb(m);
    }
    if let Some(d) = s.max_nesting_depth {
        limits.max_nesting_depth = d;
    }
    limits
}

pub fn library_options_from_config(cfg: &AppConfig) -> LibraryOptions {
    LibraryOptions {
        books_root: cfg.books_dir(),
        cache_capacity: cfg.cache.capacity,
        max_toc_depth: cfg.limits.max_toc_depth,
        max_chapter_index: cfg.limits.max_chapter_index,
        limits: security_limits_from_config(cfg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [cache]
            capacity = 3

            [limits]
            max_toc_depth = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cache.capacity, 3);
        assert_eq!(cfg.limits.max_toc_depth, 4);
        assert_eq!(cfg.limits.max_chapter_index, 10_000);
        assert_eq!(cfg.limits.max_archive_mb, 500);
        assert_eq!(cfg.library.books_dir, None);
    }

    #[test]
    fn env_overrides_win() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides_from(|key| match key {
            ENV_BOOKS_DIR => Some("/data/books".to_string()),
            ENV_CACHE_SIZE => Some("25".to_string()),
            _ => None,
        });
        assert_eq!(cfg.books_dir(), PathBuf::from("/data/books"));
        assert_eq!(cfg.cache.capacity, 25);

        cfg.apply_overrides_from(|key| (key == ENV_CACHE_SIZE).then(|| "lots".to_string()));
        assert_eq!(cfg.cache.capacity, 25);
    }

    #[test]
    fn limits_flow_into_library_options() {
        let mut cfg = AppConfig::default();
        cfg.limits.max_archive_mb = 2;
        cfg.security.max_nesting_depth = Some(64);
        let opts = library_options_from_config(&cfg);
        assert_eq!(opts.limits.max_archive_bytes, 2 * 1024 * 1024);
        assert_eq!(opts.limits.max_nesting_depth, 64);
        assert_eq!(opts.cache_capacity, 10);
    }

    #[test]
    fn write_then_load_roundtrips_and_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.library.books_dir = Some("/tmp/b".into());
        write_config(&path, &cfg).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);

        std::fs::write(&path, "[cache]\ncapacity = \"many\"").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse { .. })));
    }
}
