//! One-shot ingestion: archive bytes in, committed book directory out.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::archive::{self, check_archive_size};
use crate::document::{BookId, BookRecord, Chapter, TocEntry};
use crate::error::{AssetError, LibraryError};
use crate::href;
use crate::images::ImageStore;
use crate::library::LibraryOptions;
use crate::normalize::{normalize_chapter, LinkContext};
use crate::progress::{emit_progress, IngestStage, ProgressHandler};
use crate::record::{self, Staging};
use crate::toc::{build_toc, section_title, ChapterRef, TocSource};

const STEPS: u64 = 5;

/// Where the archive comes from.
#[derive(Debug, Clone)]
pub enum IngestSource {
    Path(PathBuf),
    /// An upload: original file name plus content.
    Bytes { name: String, data: Vec<u8> },
}

/// A recoverable problem met during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestIssue {
    pub code: &'static str,
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub book_id: BookId,
    pub title: String,
    pub chapter_count: usize,
    pub image_count: usize,
    pub toc_source: TocSource,
    pub issues: Vec<IngestIssue>,
}

fn issue(code: &'static str, message: impl Into<String>, location: Option<&str>) -> IngestIssue {
    IngestIssue {
        code,
        message: message.into(),
        location: location.map(str::to_string),
    }
}

fn read_source(source: IngestSource, opts: &LibraryOptions) -> Result<(String, Vec<u8>), LibraryError> {
    match source {
        IngestSource::Path(path) => {
            let size = fs::metadata(&path)?.len();
            check_archive_size(size, &opts.limits)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok((name, fs::read(&path)?))
        }
        IngestSource::Bytes { name, data } => {
            check_archive_size(data.len() as u64, &opts.limits)?;
            Ok((name, data))
        }
    }
}

/// Ingest one archive into `opts.books_root`. Nothing is written under the
/// book's final directory unless every structural step succeeds.
pub fn ingest(
    source: IngestSource,
    opts: &LibraryOptions,
    progress: Option<&dyn ProgressHandler>,
) -> Result<IngestReport, LibraryError> {
    let (source_name, data) = read_source(source, opts)?;
    let id = BookId::derive(&source_name);
    tracing::info!("Ingesting {} as {}", source_name, id);
    emit_progress(progress, IngestStage::Open, 1, Some(STEPS), Some(source_name.as_str()));

    let package = archive::read_epub(&data, &opts.limits)?;
    drop(data);

    let mut issues: Vec<IngestIssue> = package
        .decisions
        .iter()
        .map(|d| issue("fallback", &d.decision, Some(d.subject.as_str())))
        .collect();

    let staging = Staging::create(&opts.books_root)?;

    emit_progress(progress, IngestStage::Images, 2, Some(STEPS), None);
    let mut images = ImageStore::create(&staging.images_dir())?;
    for entry in &package.images {
        match images.store(&entry.path, &entry.media_type, &entry.data) {
            Ok(_) => {}
            Err(e @ (AssetError::InvalidSignature { .. } | AssetError::SignatureMismatch { .. })) => {
                tracing::warn!("Dropping image: {}", e);
                issues.push(issue("invalid_image", e.to_string(), Some(entry.path.as_str())));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let image_links = images.link_map();
    let mut chapter_links: HashMap<String, usize> = HashMap::new();
    for (i, doc) in package.documents.iter().enumerate() {
        chapter_links.entry(href::fold(&doc.path)).or_insert(i);
    }

    let total = package.documents.len() as u64;
    let mut normalized = Vec::with_capacity(package.documents.len());
    for (i, doc) in package.documents.iter().enumerate() {
        emit_progress(progress, IngestStage::Chapters, i as u64 + 1, Some(total), Some(doc.path.as_str()));
        let ctx = LinkContext {
            doc_path: &doc.path,
            images: &image_links,
            chapters: &chapter_links,
        };
        let out = normalize_chapter(&doc.data, &ctx, opts.limits.max_nesting_depth);
        issues.extend(
            out.issues
                .iter()
                .map(|m| issue("chapter", m.as_str(), Some(doc.path.as_str()))),
        );
        normalized.push(out);
    }

    emit_progress(progress, IngestStage::Toc, 3, Some(STEPS), None);
    let refs: Vec<ChapterRef<'_>> = package
        .documents
        .iter()
        .zip(&normalized)
        .map(|(doc, n)| ChapterRef {
            path: &doc.path,
            heading: n.heading.as_deref(),
        })
        .collect();
    let toc = build_toc(package.navigation.as_ref(), &refs, opts.max_toc_depth);
    issues.extend(toc.issues.iter().map(|m| issue("toc", m.as_str(), None)));

    let toc_titles = first_toc_titles(&toc.entries);
    let chapters: Vec<Chapter> = package
        .documents
        .iter()
        .zip(normalized)
        .enumerate()
        .map(|(i, (doc, n))| Chapter {
            index: i,
            id: doc.id.clone(),
            href: doc.path.clone(),
            title: toc_titles
                .get(&i)
                .cloned()
                .or(n.heading)
                .unwrap_or_else(|| section_title(i)),
            html: n.html,
            text: n.text,
        })
        .collect();

    if chapters.len() > opts.max_chapter_index.saturating_add(1) {
        issues.push(issue(
            "chapter_limit",
            format!(
                "{} chapters, only indices up to {} can be requested",
                chapters.len(),
                opts.max_chapter_index
            ),
            None,
        ));
    }

    emit_progress(progress, IngestStage::Write, 4, Some(STEPS), None);
    let image_count = images.len();
    let record = BookRecord {
        id: id.clone(),
        metadata: package.metadata,
        chapters,
        toc: toc.entries,
        images: images.into_assets(),
        source_file: source_name,
        processed_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        attachments: previous_attachments(&opts.books_root, &id),
    };
    staging.write_record(&record)?;
    staging.commit(&id)?;
    emit_progress(progress, IngestStage::Done, STEPS, Some(STEPS), Some(id.as_str()));

    tracing::info!(
        "Ingested {} ({} chapters, {} images, {} issues)",
        id,
        record.chapter_count(),
        image_count,
        issues.len()
    );

    Ok(IngestReport {
        book_id: id,
        title: record.metadata.title,
        chapter_count: record.chapters.len(),
        image_count,
        toc_source: toc.source,
        issues,
    })
}

/// Title of the first TOC entry (pre-order) targeting each chapter.
fn first_toc_titles(entries: &[TocEntry]) -> HashMap<usize, String> {
    fn walk(entries: &[TocEntry], out: &mut HashMap<usize, String>) {
        for entry in entries {
            if let Some(chapter) = entry.chapter {
                if !entry.title.is_empty() {
                    out.entry(chapter).or_insert_with(|| entry.title.clone());
                }
            }
            walk(&entry.children, out);
        }
    }

    let mut out = HashMap::new();
    walk(entries, &mut out);
    out
}

/// Attachments of the record being replaced, carried over on re-ingest.
fn previous_attachments(root: &Path, id: &BookId) -> BTreeMap<String, serde_json::Value> {
    match record::read_record(&record::book_dir(root, id)) {
        Ok(stored) => stored.record.attachments,
        Err(_) => BTreeMap::new(),
    }
}
