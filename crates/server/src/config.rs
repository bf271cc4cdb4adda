//! Server configuration (library options, bind address).

use epub_reader_core::config::{library_options_from_config, load_config};
use epub_reader_core::library::LibraryOptions;

pub const ENV_BIND: &str = "READER_BIND";
pub const DEFAULT_BIND: &str = "127.0.0.1:8123";

/// Configuration for the reader server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Options the library is opened with.
    pub library: LibraryOptions,
    /// Host:port to bind (e.g. "127.0.0.1:8123" or "0.0.0.0:8123").
    pub bind: String,
}

impl ServerConfig {
    /// Build config from the config file plus environment.
    /// - `BOOKS_DIR`, `MAX_BOOK_CACHE_SIZE`: see the core config
    /// - `READER_BIND`: host:port (default: 127.0.0.1:8123)
    pub fn from_env() -> Self {
        let mut cfg = load_config();
        cfg.apply_env_overrides();
        let bind = std::env::var(ENV_BIND)
            .ok()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        Self {
            library: library_options_from_config(&cfg),
            bind,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind
    }

    /// Largest upload body accepted by `PUT /api/books`.
    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.library.limits.max_archive_bytes).unwrap_or(usize::MAX)
    }
}
