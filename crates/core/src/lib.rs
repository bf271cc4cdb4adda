pub mod archive;
pub mod cache;
pub mod config;
pub mod document;
pub mod encoding;
pub mod error;
pub mod href;
pub mod images;
pub mod ingest;
pub mod library;
pub mod normalize;
pub mod progress;
pub mod record;
pub mod security;
pub mod toc;
pub mod validate;

pub mod prelude {
    pub use crate::document::*;
    pub use crate::error::*;
    pub use crate::ingest::{IngestReport, IngestSource};
    pub use crate::library::{BookSummary, ChapterView, Health, ImageData, Library, LibraryOptions};
}
