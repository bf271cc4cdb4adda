//! The library: a books directory plus the cache in front of it.
//!
//! Every identifier-bearing call is validated before anything touches the
//! filesystem; reads go through the [`BookCache`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::cache::{BookCache, BookLoader, CacheStats, LoadedBook};
use crate::document::{BookId, BookRecord, BOOK_ID_SUFFIX};
use crate::error::{LibraryError, LoadError, RecordError, ValidationError};
use crate::images::mime_for_name;
use crate::ingest::{self, IngestReport, IngestSource};
use crate::progress::ProgressHandler;
use crate::record::{self, IMAGES_DIR};
use crate::security::SecurityLimits;
use crate::validate::{validate_book_id, validate_chapter_index, validate_image_name};

#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub books_root: PathBuf,
    pub cache_capacity: usize,
    pub max_toc_depth: usize,
    pub max_chapter_index: usize,
    pub limits: SecurityLimits,
}

impl LibraryOptions {
    pub fn new(books_root: impl Into<PathBuf>) -> Self {
        Self {
            books_root: books_root.into(),
            cache_capacity: 10,
            max_toc_depth: 10,
            max_chapter_index: 10_000,
            limits: SecurityLimits::default(),
        }
    }
}

/// Summary for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSummary {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub chapter_count: usize,
}

/// One chapter plus what a reader page needs around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterView {
    pub book_id: BookId,
    pub book_title: String,
    pub index: usize,
    pub title: String,
    pub html: String,
    pub toc_path: Vec<String>,
    pub chapter_count: usize,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub cache_entries: usize,
    pub capacity: usize,
    pub books_root_accessible: bool,
    pub stats: CacheStats,
}

/// Read `{root}/{id}/book.json`.
fn load_from_disk(root: &Path, id: &BookId) -> Result<LoadedBook, LoadError> {
    let dir = record::book_dir(root, id);
    let id_str = id.to_string();
    match record::read_record(&dir) {
        Ok(stored) => Ok(LoadedBook {
            record: stored.record,
            digest: stored.digest,
        }),
        Err(RecordError::Io(e)) if e.kind() == ErrorKind::NotFound => Err(LoadError::NotFound(id_str)),
        Err(RecordError::IncompatibleFormat { found, expected }) => Err(LoadError::IncompatibleFormat {
            id: id_str,
            found,
            expected,
        }),
        Err(RecordError::Corrupt(detail)) => Err(LoadError::Corrupt { id: id_str, detail }),
        Err(RecordError::Serialize(e)) => Err(LoadError::Corrupt {
            id: id_str,
            detail: e.to_string(),
        }),
        Err(e @ (RecordError::Io(_) | RecordError::Restore { .. })) => Err(LoadError::Io {
            id: id_str,
            detail: e.to_string(),
        }),
    }
}

/// Loads records on cache misses.
struct DiskLoader {
    root: PathBuf,
}

impl BookLoader for DiskLoader {
    fn load(&self, id: &BookId) -> Result<LoadedBook, LoadError> {
        load_from_disk(&self.root, id)
    }
}

fn summary(id: BookId, book: &BookRecord) -> BookSummary {
    BookSummary {
        id,
        title: book.metadata.title.clone(),
        author: book.metadata.author_display(),
        chapter_count: book.chapter_count(),
    }
}

#[derive(Debug)]
pub struct Library {
    options: LibraryOptions,
    cache: BookCache,
}

impl Library {
    /// Open (creating if needed) the books directory and sweep leftovers of
    /// interrupted ingestions.
    pub fn open(options: LibraryOptions) -> Result<Self, LibraryError> {
        fs::create_dir_all(&options.books_root)?;
        record::recover_interrupted(&options.books_root)?;

        let cache = BookCache::new(
            options.cache_capacity,
            DiskLoader {
                root: options.books_root.clone(),
            },
        );
        tracing::info!(
            "Opened library at {} (cache capacity {})",
            options.books_root.display(),
            cache.capacity()
        );
        Ok(Self { options, cache })
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    pub fn books_root(&self) -> &Path {
        &self.options.books_root
    }

    pub fn cache(&self) -> &BookCache {
        &self.cache
    }

    pub fn ingest(&self, source: IngestSource) -> Result<IngestReport, LibraryError> {
        self.ingest_with_progress(source, None)
    }

    pub fn ingest_with_progress(
        &self,
        source: IngestSource,
        progress: Option<&dyn ProgressHandler>,
    ) -> Result<IngestReport, LibraryError> {
        let report = ingest::ingest(source, &self.options, progress)?;
        self.cache.invalidate(&report.book_id);
        Ok(report)
    }

    /// Load a book by its raw (request-supplied) id.
    pub fn book(&self, raw_id: &str) -> Result<Arc<BookRecord>, LibraryError> {
        let id = validate_book_id(raw_id, &self.options.books_root)?;
        self.load(&id)
    }

    fn load(&self, id: &BookId) -> Result<Arc<BookRecord>, LibraryError> {
        self.cache.get(id).map_err(|e| match e {
            LoadError::NotFound(id) => LibraryError::BookNotFound(id),
            other => LibraryError::Load(other),
        })
    }

    /// All readable books, sorted by case-folded title. Unreadable entries are
    /// skipped with a warning.
    ///
    /// Resident records are used as they are; everything else is read from
    /// disk without entering the cache, so a listing never evicts.
    pub fn list_books(&self) -> Result<Vec<BookSummary>, LibraryError> {
        let mut books = Vec::new();
        for entry in fs::read_dir(&self.options.books_root)?.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(BOOK_ID_SUFFIX) {
                continue;
            }
            let Ok(id) = validate_book_id(&name, &self.options.books_root) else {
                continue;
            };
            if let Some(book) = self.cache.peek(&id) {
                books.push(summary(id, &book));
                continue;
            }
            match load_from_disk(&self.options.books_root, &id) {
                Ok(loaded) => books.push(summary(id, &loaded.record)),
                Err(e) => tracing::warn!("Skipping {}: {}", name, e),
            }
        }
        books.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(books)
    }

    pub fn get_chapter(&self, raw_id: &str, raw_index: &str) -> Result<ChapterView, LibraryError> {
        let id = validate_book_id(raw_id, &self.options.books_root)?;
        let index = validate_chapter_index(raw_index, self.options.max_chapter_index)?;
        let book = self.load(&id)?;

        let count = book.chapter_count();
        let chapter = book.chapter(index).ok_or_else(|| LibraryError::ChapterNotFound {
            id: id.to_string(),
            index,
            count,
        })?;

        Ok(ChapterView {
            book_id: id,
            book_title: book.metadata.title.clone(),
            index,
            title: chapter.title.clone(),
            html: chapter.html.clone(),
            toc_path: book.toc_path(index),
            chapter_count: count,
            prev: index.checked_sub(1),
            next: (index + 1 < count).then_some(index + 1),
        })
    }

    pub fn get_image(&self, raw_id: &str, raw_name: &str) -> Result<ImageData, LibraryError> {
        let id = validate_book_id(raw_id, &self.options.books_root)?;
        let book_dir = record::book_dir(&self.options.books_root, &id);
        let images_dir = book_dir.join(IMAGES_DIR);
        let name = validate_image_name(raw_name, &images_dir)?;

        if !book_dir.is_dir() {
            return Err(LibraryError::BookNotFound(id.to_string()));
        }
        let not_found = || LibraryError::ImageNotFound {
            id: id.to_string(),
            name: name.clone(),
        };
        let path = match images_dir.join(&name).canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        // a symlink inside images/ must not lead elsewhere
        let base = images_dir.canonicalize()?;
        if !path.starts_with(&base) {
            return Err(ValidationError::PathTraversal { value: name.clone() }.into());
        }
        if !path.is_file() {
            return Err(not_found());
        }

        Ok(ImageData {
            bytes: fs::read(&path)?,
            mime_type: mime_for_name(&name),
        })
    }

    pub fn delete_book(&self, raw_id: &str) -> Result<(), LibraryError> {
        let id = validate_book_id(raw_id, &self.options.books_root)?;
        let dir = record::book_dir(&self.options.books_root, &id);
        if !dir.is_dir() {
            return Err(LibraryError::BookNotFound(id.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        self.cache.invalidate(&id);
        tracing::info!("Deleted {}", id);
        Ok(())
    }

    pub fn health(&self) -> Health {
        let stats = self.cache.stats();
        Health {
            cache_entries: stats.resident,
            capacity: stats.capacity,
            books_root_accessible: fs::read_dir(&self.options.books_root).is_ok(),
            stats,
        }
    }
}
