//! HTTP adapter over the EPUB reader library.
//!
//! Uploads are ingested into the books directory; chapters and images are
//! served through the library's cache. All core calls are blocking and run on
//! tokio's blocking pool.

pub mod api;
pub mod config;

use std::sync::Arc;

use axum::Router;
use epub_reader_core::error::LibraryError;
use epub_reader_core::library::Library;

use crate::config::ServerConfig;

/// Shared application state (library and config).
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Library>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, LibraryError> {
        let library = Arc::new(Library::open(config.library.clone())?);
        Ok(Self { library, config })
    }
}

/// Build API routes (under /api, plus /health) with state.
pub fn api_routes(state: AppState) -> Router {
    api::routes(state)
}
