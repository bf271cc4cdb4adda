use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix every book directory carries. Distinguishes book ids from arbitrary paths.
pub const BOOK_ID_SUFFIX: &str = "_data";

const MAX_STEM_LEN: usize = 200;

/// Identifier of a stored book: the sanitized source file stem plus `_data`.
///
/// Only constructed by [`BookId::derive`] (ingestion) or by the request
/// validator, so a `BookId` in hand is always safe to join onto the books root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    /// Derive the id for an uploaded archive from its file name.
    pub fn derive(source_name: &str) -> Self {
        let base = source_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(source_name);
        let stem = match base.rfind('.') {
            Some(i) if i > 0 => &base[..i],
            _ => base,
        };
        let stem = sanitize_file_name(stem, MAX_STEM_LEN);
        BookId(format!("{stem}{BOOK_ID_SUFFIX}"))
    }

    pub(crate) fn new_unchecked(id: String) -> Self {
        BookId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`, collapse dot runs,
/// trim dots at both ends, and cap the length (keeping a short extension).
///
/// The result never contains `..` and never starts with a dot, so it always
/// passes the request validators.
pub fn sanitize_file_name(name: &str, max_len: usize) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut out = collapse_dot_runs(&replaced)
        .trim_matches('.')
        .to_string();
    if out.is_empty() {
        out = "unnamed".to_string();
    }

    if out.len() > max_len {
        let ext = match out.rfind('.') {
            Some(i) if out.len() - i <= 10 => out[i..].to_string(),
            _ => String::new(),
        };
        out.truncate(max_len.saturating_sub(ext.len()));
        // the cut may leave a dot right before the extension's own
        let kept = out.trim_end_matches('.').len();
        out.truncate(kept);
        if out.is_empty() {
            out.push_str("unnamed");
        }
        out.push_str(&ext);
    }
    out
}

fn collapse_dot_runs(s: &str) -> String {
    let mut out = s.to_string();
    while out.contains("..") {
        out = out.replace("..", "_");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub language: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub date: Option<String>,
    pub identifiers: Vec<String>,
    pub subjects: Vec<String>,
}

impl Default for BookMetadata {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            language: "en".to_string(),
            authors: Vec::new(),
            description: None,
            publisher: None,
            date: None,
            identifiers: Vec::new(),
            subjects: Vec::new(),
        }
    }
}

impl BookMetadata {
    /// Authors joined for display, `Unknown` when the archive names none.
    pub fn author_display(&self) -> String {
        if self.authors.is_empty() {
            "Unknown".to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// One spine document after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,
    /// Manifest id of the source document.
    pub id: String,
    /// Archive path of the source document.
    pub href: String,
    pub title: String,
    /// Sanitized body HTML with rewritten image and chapter links.
    pub html: String,
    /// Whitespace-collapsed plain text.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// Link as written in the navigation document.
    pub href: String,
    /// Archive path the link resolves to (empty for label-only entries).
    pub file_href: String,
    pub anchor: String,
    /// Target chapter, `None` for label-only entries.
    pub chapter: Option<usize>,
    pub children: Vec<TocEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Stored file name under `images/`.
    pub name: String,
    /// SHA-256 of the raw bytes, lowercase hex.
    pub digest: String,
    pub size: u64,
    pub media_type: String,
    /// Archive paths that resolve to this asset.
    pub sources: Vec<String>,
}

/// The self-contained result of ingesting one archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: BookId,
    pub metadata: BookMetadata,
    pub chapters: Vec<Chapter>,
    pub toc: Vec<TocEntry>,
    pub images: Vec<ImageAsset>,
    pub source_file: String,
    /// Unix seconds.
    pub processed_at: u64,
    /// Opaque payload owned by collaborators (progress, bookmarks).
    #[serde(default)]
    pub attachments: BTreeMap<String, serde_json::Value>,
}

impl BookRecord {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    /// Titles from the TOC root down to the first entry targeting `index`.
    pub fn toc_path(&self, index: usize) -> Vec<String> {
        fn walk(entries: &[TocEntry], index: usize, path: &mut Vec<String>) -> bool {
            for entry in entries {
                path.push(entry.title.clone());
                if entry.chapter == Some(index) || walk(&entry.children, index, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        walk(&self.toc, index, &mut path);
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, chapter: Option<usize>, children: Vec<TocEntry>) -> TocEntry {
        TocEntry {
            title: title.to_string(),
            href: String::new(),
            file_href: String::new(),
            anchor: String::new(),
            chapter,
            children,
        }
    }

    #[test]
    fn derive_sanitizes_and_suffixes() {
        assert_eq!(BookId::derive("My Book (2nd ed).epub").as_str(), "My_Book__2nd_ed__data");
        assert_eq!(BookId::derive("/uploads/dune.epub").as_str(), "dune_data");
        assert_eq!(BookId::derive("..epub").as_str(), "unnamed_data");
    }

    #[test]
    fn dot_runs_never_survive() {
        assert_eq!(BookId::derive("Vol..2.epub").as_str(), "Vol_2_data");
        assert_eq!(sanitize_file_name("fig..1.png", 120), "fig_1.png");
        assert_eq!(sanitize_file_name("a.....b", 120), "a__.b");
        // truncation must not glue a trailing dot onto the extension
        let cut = sanitize_file_name(&format!("{}.x.png", "a".repeat(45)), 50);
        assert!(!cut.contains(".."), "{cut}");
        assert!(cut.ends_with(".png"));
    }

    #[test]
    fn sanitize_caps_length_and_keeps_extension() {
        let long = format!("{}.png", "a".repeat(300));
        let out = sanitize_file_name(&long, 50);
        assert_eq!(out.len(), 50);
        assert!(out.ends_with(".png"));
    }

    #[test]
    fn toc_path_walks_to_first_match() {
        let record = BookRecord {
            id: BookId::derive("x.epub"),
            metadata: BookMetadata::default(),
            chapters: Vec::new(),
            toc: vec![
                entry("Part One", None, vec![entry("Chapter 1", Some(0), vec![])]),
                entry("Part Two", Some(1), vec![entry("Chapter 2", Some(1), vec![])]),
            ],
            images: Vec::new(),
            source_file: "x.epub".into(),
            processed_at: 0,
            attachments: BTreeMap::new(),
        };
        assert_eq!(record.toc_path(0), vec!["Part One", "Chapter 1"]);
        assert_eq!(record.toc_path(1), vec!["Part Two"]);
        assert!(record.toc_path(9).is_empty());
    }

    #[test]
    fn author_display_defaults_to_unknown() {
        let mut meta = BookMetadata::default();
        assert_eq!(meta.author_display(), "Unknown");
        meta.authors = vec!["A".into(), "B".into()];
        assert_eq!(meta.author_display(), "A, B");
    }
}
