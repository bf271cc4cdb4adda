//! Archive reader: ZIP → container.xml → OPF package → spine documents,
//! images, stylesheets and the navigation document.
//!
//! Producer quirks (wrong casing, percent-encoded names, dangling spine
//! references, unreadable navigation) are tolerated: each is recorded as a
//! [`FallbackDecision`] and reading continues. Only structural problems fail.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use serde::Serialize;

use crate::document::BookMetadata;
use crate::encoding::{decode_markup, normalize_text};
use crate::error::ArchiveError;
use crate::href;
use crate::security::{self, SecurityLimits};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Everything ingestion needs from one archive, fully read into memory.
#[derive(Debug)]
pub struct EpubPackage {
    pub opf_path: String,
    pub metadata: BookMetadata,
    /// Readable content documents in spine order.
    pub documents: Vec<SpineDocument>,
    pub images: Vec<ArchiveEntry>,
    pub stylesheets: Vec<ArchiveEntry>,
    pub navigation: Option<Navigation>,
    pub decisions: Vec<FallbackDecision>,
}

#[derive(Debug, Clone)]
pub struct SpineDocument {
    pub id: String,
    pub path: String,
    pub linear: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub id: String,
    pub path: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavigationKind {
    /// EPUB3 XHTML navigation document.
    Nav,
    /// EPUB2 NCX.
    Ncx,
}

#[derive(Debug, Clone)]
pub struct Navigation {
    pub kind: NavigationKind,
    pub path: String,
    pub data: Vec<u8>,
}

/// A recovery the reader made instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackDecision {
    pub subject: String,
    pub decision: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// `href` attribute as written.
    pub href: String,
    /// Archive path (decoded, normalized).
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

/// Result of interpreting one `<item>` of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    Ok(ManifestItem),
    Skipped { id: String, reason: String },
    Fatal(String),
}

/// Open an EPUB from memory.
pub fn read_epub(bytes: &[u8], limits: &SecurityLimits) -> Result<EpubPackage, ArchiveError> {
    check_archive_size(bytes.len() as u64, limits)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ArchiveError::InvalidZip(e.to_string()))?;
    let index = scan_archive(&mut archive, limits)?;

    if let Some(name) = index.lookup(ENCRYPTION_PATH) {
        let xml = read_entry(&mut archive, &name, limits)?;
        security::check_encryption(&decode_markup(&xml).text)?;
    }

    let opf_path = find_opf_path(&mut archive, &index, limits)?;
    let opf_name = index
        .lookup(&opf_path)
        .ok_or_else(|| ArchiveError::MissingContent(format!("package document {opf_path}")))?;
    let opf_bytes = read_entry(&mut archive, &opf_name, limits)?;
    let opf = parse_opf(&decode_markup(&opf_bytes).text, href::parent_dir(&opf_path))?;

    let mut decisions = Vec::new();
    let mut manifest: Vec<ManifestItem> = Vec::new();
    for outcome in opf.items {
        match outcome {
            ManifestOutcome::Ok(item) => manifest.push(item),
            ManifestOutcome::Skipped { id, reason } => {
                record(&mut decisions, format!("manifest item '{id}'"), format!("skipped: {reason}"));
            }
            ManifestOutcome::Fatal(reason) => return Err(ArchiveError::FatalEntry(reason)),
        }
    }
    if !opf.saw_manifest || manifest.is_empty() {
        return Err(ArchiveError::MissingContent("OPF manifest".into()));
    }
    let by_id: HashMap<&str, &ManifestItem> =
        manifest.iter().map(|item| (item.id.as_str(), item)).collect();

    let mut documents = Vec::new();
    for spine_ref in &opf.spine {
        let Some(item) = by_id.get(spine_ref.idref.as_str()) else {
            record(
                &mut decisions,
                format!("spine item '{}'", spine_ref.idref),
                "skipped: not in manifest".into(),
            );
            continue;
        };
        if !is_document(&item.media_type, &item.path) {
            record(
                &mut decisions,
                format!("spine item '{}'", item.id),
                format!("skipped: {} is not a content document", item.media_type),
            );
            continue;
        }
        match read_item(&mut archive, &index, item, limits) {
            Ok(data) => documents.push(SpineDocument {
                id: item.id.clone(),
                path: item.path.clone(),
                linear: spine_ref.linear,
                data,
            }),
            Err(e) => record(
                &mut decisions,
                format!("spine item '{}'", item.id),
                format!("skipped: {e}"),
            ),
        }
    }
    if documents.is_empty() {
        return Err(ArchiveError::NoChapters);
    }

    let mut images = Vec::new();
    let mut stylesheets = Vec::new();
    for item in &manifest {
        let bucket = if item.media_type.starts_with("image/") {
            &mut images
        } else if item.media_type == "text/css" {
            &mut stylesheets
        } else {
            continue;
        };
        match read_item(&mut archive, &index, item, limits) {
            Ok(data) => bucket.push(ArchiveEntry {
                id: item.id.clone(),
                path: item.path.clone(),
                media_type: item.media_type.clone(),
                data,
            }),
            Err(e) => record(
                &mut decisions,
                format!("resource '{}'", item.path),
                format!("skipped: {e}"),
            ),
        }
    }

    let navigation = match find_navigation(&manifest, opf.spine_toc.as_deref()) {
        Some((kind, item)) => match read_item(&mut archive, &index, item, limits) {
            Ok(data) => Some(Navigation {
                kind,
                path: item.path.clone(),
                data,
            }),
            Err(e) => {
                record(
                    &mut decisions,
                    format!("navigation '{}'", item.path),
                    format!("treated as absent: {e}"),
                );
                None
            }
        },
        None => None,
    };

    tracing::info!(
        "Read EPUB package {}: {} documents, {} images, navigation {:?}",
        opf_path,
        documents.len(),
        images.len(),
        navigation.as_ref().map(|n| n.kind)
    );

    Ok(EpubPackage {
        opf_path,
        metadata: opf.metadata,
        documents,
        images,
        stylesheets,
        navigation,
        decisions,
    })
}

/// Reject archives over the configured size before any decompression.
pub fn check_archive_size(size: u64, limits: &SecurityLimits) -> Result<(), ArchiveError> {
    if size > limits.max_archive_bytes {
        return Err(ArchiveError::Oversized {
            size,
            limit: limits.max_archive_bytes,
        });
    }
    Ok(())
}

fn record(decisions: &mut Vec<FallbackDecision>, subject: String, decision: String) {
    tracing::warn!("{}: {}", subject, decision);
    decisions.push(FallbackDecision { subject, decision });
}

// --- Archive scanning ---

/// Entry names, with case-folded aliases for producers that disagree with
/// their own manifest about casing.
#[derive(Debug, Default)]
struct EntryIndex {
    names: HashSet<String>,
    folded: HashMap<String, String>,
}

impl EntryIndex {
    fn insert(&mut self, name: &str) {
        self.folded
            .entry(href::fold(name))
            .or_insert_with(|| name.to_string());
        self.names.insert(name.to_string());
    }

    fn lookup(&self, path: &str) -> Option<String> {
        if self.names.contains(path) {
            return Some(path.to_string());
        }
        self.folded.get(&href::fold(path)).cloned()
    }
}

/// Walk the central directory without decompressing anything and apply the
/// count, ratio and total size limits.
fn scan_archive<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    limits: &SecurityLimits,
) -> Result<EntryIndex, ArchiveError> {
    limits.check_file_count(archive.len() as u64)?;

    let mut index = EntryIndex::default();
    let mut budget = limits.budget();
    for i in 0..archive.len() {
        let file = archive
            .by_index_raw(i)
            .map_err(|e| ArchiveError::InvalidZip(e.to_string()))?;
        if file.is_dir() {
            continue;
        }
        limits.check_ratio(file.compressed_size(), file.size())?;
        budget.charge(file.size())?;
        index.insert(file.name());
    }
    Ok(index)
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    limits: &SecurityLimits,
) -> Result<Vec<u8>, ArchiveError> {
    security::check_entry_name(name)?;
    let file = archive
        .by_name(name)
        .map_err(|_| ArchiveError::MissingContent(name.to_string()))?;
    limits.check_resource(name, file.size())?;

    // the declared size can lie; never read past the limit
    let cap = limits.max_resource_size_bytes.saturating_add(1);
    let mut buf = Vec::with_capacity(file.size().min(cap) as usize);
    file.take(cap).read_to_end(&mut buf)?;
    limits.check_resource(name, buf.len() as u64)?;
    Ok(buf)
}

fn read_item<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    index: &EntryIndex,
    item: &ManifestItem,
    limits: &SecurityLimits,
) -> Result<Vec<u8>, ArchiveError> {
    let name = index
        .lookup(&item.path)
        .or_else(|| {
            // some producers store percent-encoded names verbatim
            href::join_normalized(href::parent_dir(&item.path), href_file_name(&item.href))
                .and_then(|raw| index.lookup(&raw))
        })
        .ok_or_else(|| ArchiveError::MissingContent(item.path.clone()))?;
    read_entry(archive, &name, limits)
}

fn href_file_name(href: &str) -> &str {
    href.rsplit('/').next().unwrap_or(href)
}

fn is_document(media_type: &str, path: &str) -> bool {
    match media_type {
        "application/xhtml+xml" | "text/html" | "application/x-dtbook+xml" => true,
        "" => {
            let lower = href::fold(path);
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        }
        _ => false,
    }
}

fn find_navigation<'a>(
    manifest: &'a [ManifestItem],
    spine_toc: Option<&str>,
) -> Option<(NavigationKind, &'a ManifestItem)> {
    if let Some(nav) = manifest
        .iter()
        .find(|item| item.properties.iter().any(|p| p == "nav"))
    {
        return Some((NavigationKind::Nav, nav));
    }
    if let Some(toc_id) = spine_toc {
        if let Some(ncx) = manifest.iter().find(|item| item.id == toc_id) {
            return Some((NavigationKind::Ncx, ncx));
        }
    }
    manifest
        .iter()
        .find(|item| item.media_type == NCX_MEDIA_TYPE)
        .map(|ncx| (NavigationKind::Ncx, ncx))
}

// --- container.xml ---

fn find_opf_path<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    index: &EntryIndex,
    limits: &SecurityLimits,
) -> Result<String, ArchiveError> {
    let name = index
        .lookup(CONTAINER_PATH)
        .ok_or_else(|| ArchiveError::MissingContent(CONTAINER_PATH.into()))?;
    let bytes = read_entry(archive, &name, limits)?;
    let container = decode_markup(&bytes).text.into_owned();

    let mut reader = XmlReader::from_str(&container);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attr(e, b"full-path") {
                    let path = href::decode(&path);
                    return href::join_normalized("", &path).ok_or_else(|| {
                        ArchiveError::FatalEntry(format!("rootfile path escapes archive: {path}"))
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ArchiveError::Malformed {
                    part: "container.xml".into(),
                    detail: e.to_string(),
                });
            }
            _ => {}
        }
    }

    Err(ArchiveError::MissingContent(
        "rootfile in container.xml".into(),
    ))
}

// --- OPF parsing ---

#[derive(Debug)]
struct SpineRef {
    idref: String,
    linear: bool,
}

#[derive(Debug)]
struct OpfData {
    metadata: BookMetadata,
    saw_manifest: bool,
    items: Vec<ManifestOutcome>,
    spine: Vec<SpineRef>,
    spine_toc: Option<String>,
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

fn parse_opf(content: &str, opf_dir: &str) -> Result<OpfData, ArchiveError> {
    let mut reader = XmlReader::from_str(content);

    let mut title: Option<String> = None;
    let mut language: Option<String> = None;
    let mut metadata = BookMetadata::default();
    let mut items = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut spine = Vec::new();
    let mut spine_toc = None;
    let mut saw_manifest = false;

    let mut in_metadata = false;
    let mut current_element: Option<String> = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "metadata" => in_metadata = true,
                    "title" | "creator" | "language" | "publisher" | "date" | "description"
                    | "subject" | "identifier"
                        if in_metadata =>
                    {
                        current_element = Some(name.clone());
                        current_text.clear();
                    }
                    "manifest" => saw_manifest = true,
                    "item" => {
                        let outcome = classify_item(
                            attr(e, b"id"),
                            attr(e, b"href"),
                            attr(e, b"media-type").unwrap_or_default(),
                            attr(e, b"properties"),
                            opf_dir,
                            &mut seen_ids,
                        );
                        items.push(outcome);
                    }
                    "spine" => spine_toc = attr(e, b"toc"),
                    "itemref" => {
                        if let Some(idref) = attr(e, b"idref") {
                            let linear = attr(e, b"linear").map_or(true, |v| v.trim() != "no");
                            spine.push(SpineRef { idref, linear });
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if current_element.is_some() {
                    current_text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(ref e)) => {
                if current_element.is_some() {
                    current_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"metadata" {
                    in_metadata = false;
                }
                if let Some(elem) = current_element.take() {
                    let text = normalize_text(&current_text);
                    current_text.clear();
                    if !text.is_empty() {
                        match elem.as_str() {
                            "title" => {
                                title.get_or_insert(text);
                            }
                            "creator" => metadata.authors.push(text),
                            "language" => {
                                language.get_or_insert(text);
                            }
                            "publisher" => metadata.publisher = Some(text),
                            "date" => metadata.date = Some(text),
                            "description" => metadata.description = Some(text),
                            "subject" => metadata.subjects.push(text),
                            "identifier" => metadata.identifiers.push(text),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ArchiveError::Malformed {
                    part: "OPF".into(),
                    detail: e.to_string(),
                });
            }
            _ => {}
        }
    }

    if let Some(title) = title {
        metadata.title = title;
    }
    if let Some(language) = language {
        metadata.language = language;
    }

    Ok(OpfData {
        metadata,
        saw_manifest,
        items,
        spine,
        spine_toc,
    })
}

/// Interpret one manifest `<item>`.
pub fn classify_item(
    id: Option<String>,
    href_attr: Option<String>,
    media_type: String,
    properties: Option<String>,
    opf_dir: &str,
    seen_ids: &mut HashSet<String>,
) -> ManifestOutcome {
    let id = id.map(|s| s.trim().to_string()).unwrap_or_default();
    let raw_href = href_attr.map(|s| s.trim().to_string()).unwrap_or_default();

    if id.is_empty() {
        let label = if raw_href.is_empty() { "<unnamed>".to_string() } else { raw_href };
        return ManifestOutcome::Skipped {
            id: label,
            reason: "missing id".into(),
        };
    }
    if raw_href.is_empty() {
        return ManifestOutcome::Skipped {
            id,
            reason: "missing href".into(),
        };
    }
    if href::has_scheme(&raw_href) {
        return ManifestOutcome::Skipped {
            id,
            reason: format!("remote resource {raw_href}"),
        };
    }
    if raw_href.starts_with('/') || raw_href.starts_with('\\') {
        return ManifestOutcome::Fatal(format!("item '{id}' has absolute href {raw_href}"));
    }

    let target = raw_href.split('#').next().unwrap_or("");
    let Some(path) = href::join_normalized(opf_dir, &href::decode(target)) else {
        return ManifestOutcome::Fatal(format!("item '{id}' escapes the archive: {raw_href}"));
    };
    if !seen_ids.insert(id.clone()) {
        return ManifestOutcome::Skipped {
            id,
            reason: "duplicate id".into(),
        };
    }

    ManifestOutcome::Ok(ManifestItem {
        id,
        href: raw_href,
        path,
        media_type: media_type.trim().to_ascii_lowercase(),
        properties: properties
            .map(|p| p.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    const CONTAINER: &[u8] = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

    const OPF: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test &amp; Title</dc:title>
    <dc:creator>Ann Author</dc:creator>
    <dc:creator>Bo Writer</dc:creator>
    <dc:identifier>urn:isbn:9780000000000</dc:identifier>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="Text/Chapter%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/chapter2.XHTML" media-type="application/xhtml+xml"/>
    <item id="img" href="images/pic.png" media-type="image/png"/>
    <item id="css" href="style.css" media-type="text/css"/>
    <item href="orphan.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="ghost"/>
    <itemref idref="img"/>
    <itemref idref="c2" linear="no"/>
  </spine>
</package>"#;

    fn sample_epub() -> Vec<u8> {
        zip_of(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", OPF),
            ("OEBPS/nav.xhtml", b"<html><body><nav><ol></ol></nav></body></html>"),
            ("OEBPS/Text/Chapter 1.xhtml", b"<html><body><p>One</p></body></html>"),
            ("OEBPS/Text/Chapter2.xhtml", b"<html><body><p>Two</p></body></html>"),
            ("OEBPS/images/pic.png", b"\x89PNG\r\n\x1a\nrest"),
            ("OEBPS/style.css", b"p { margin: 0 }"),
        ])
    }

    #[test]
    fn reads_spine_metadata_and_resources() {
        let pkg = read_epub(&sample_epub(), &SecurityLimits::default()).unwrap();
        assert_eq!(pkg.opf_path, "OEBPS/content.opf");
        assert_eq!(pkg.metadata.title, "Test & Title");
        assert_eq!(pkg.metadata.authors, vec!["Ann Author", "Bo Writer"]);
        assert_eq!(pkg.metadata.language, "en");

        let ids: Vec<_> = pkg.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(pkg.documents[0].path, "OEBPS/Text/Chapter 1.xhtml");
        assert!(!pkg.documents[1].linear);
        assert_eq!(pkg.documents[1].data, b"<html><body><p>Two</p></body></html>");

        assert_eq!(pkg.images.len(), 1);
        assert_eq!(pkg.stylesheets.len(), 1);
        let nav = pkg.navigation.unwrap();
        assert_eq!(nav.kind, NavigationKind::Nav);
        assert_eq!(nav.path, "OEBPS/nav.xhtml");
    }

    #[test]
    fn records_fallback_decisions_instead_of_failing() {
        let pkg = read_epub(&sample_epub(), &SecurityLimits::default()).unwrap();
        let subjects: Vec<_> = pkg.decisions.iter().map(|d| d.subject.as_str()).collect();
        assert!(subjects.contains(&"manifest item 'orphan.xhtml'"));
        assert!(subjects.contains(&"spine item 'ghost'"));
        assert!(subjects.contains(&"spine item 'img'"));
    }

    #[test]
    fn unreadable_navigation_is_treated_as_absent() {
        let bytes = zip_of(&[
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", OPF),
            ("OEBPS/Text/Chapter 1.xhtml", b"<p>One</p>"),
        ]);
        let pkg = read_epub(&bytes, &SecurityLimits::default()).unwrap();
        assert!(pkg.navigation.is_none());
        assert_eq!(pkg.documents.len(), 1);
        assert!(pkg
            .decisions
            .iter()
            .any(|d| d.subject.starts_with("navigation") && d.decision.starts_with("treated as absent")));
    }

    #[test]
    fn rejects_oversized_archive_before_opening() {
        let limits = SecurityLimits {
            max_archive_bytes: 16,
            ..SecurityLimits::default()
        };
        let err = read_epub(&sample_epub(), &limits).unwrap_err();
        assert!(matches!(err, ArchiveError::Oversized { .. }));
    }

    #[test]
    fn rejects_non_zip_and_missing_container() {
        let err = read_epub(b"definitely not a zip", &SecurityLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidZip(_)));

        let bytes = zip_of(&[("mimetype", b"application/epub+zip")]);
        let err = read_epub(&bytes, &SecurityLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingContent(_)));
    }

    #[test]
    fn missing_manifest_and_empty_spine_fail() {
        let no_manifest = br#"<package><metadata/><spine/></package>"#;
        let bytes = zip_of(&[
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", no_manifest),
        ]);
        let err = read_epub(&bytes, &SecurityLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingContent(ref m) if m == "OPF manifest"));

        let empty_spine = br#"<package><manifest><item id="a" href="a.xhtml" media-type="application/xhtml+xml"/></manifest><spine/></package>"#;
        let bytes = zip_of(&[
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", empty_spine),
            ("OEBPS/a.xhtml", b"<p>a</p>"),
        ]);
        let err = read_epub(&bytes, &SecurityLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::NoChapters));
    }

    #[test]
    fn drm_protected_archives_are_rejected() {
        let enc = br#"<encryption><EncryptedData><resource xmlns="http://ns.adobe.com/adept"/></EncryptedData></encryption>"#;
        let bytes = zip_of(&[
            ("META-INF/container.xml", CONTAINER),
            ("META-INF/encryption.xml", enc),
            ("OEBPS/content.opf", OPF),
        ]);
        let err = read_epub(&bytes, &SecurityLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Security(_)));
    }

    #[test]
    fn classify_item_variants() {
        let mut seen = HashSet::new();
        let ok = classify_item(
            Some("a".into()),
            Some("../Text/a.xhtml".into()),
            "application/xhtml+xml".into(),
            None,
            "OEBPS/content/",
            &mut seen,
        );
        assert!(matches!(ok, ManifestOutcome::Ok(ref item) if item.path == "OEBPS/Text/a.xhtml"));

        let dup = classify_item(Some("a".into()), Some("b.xhtml".into()), String::new(), None, "", &mut seen);
        assert!(matches!(dup, ManifestOutcome::Skipped { ref reason, .. } if reason == "duplicate id"));

        let escape = classify_item(Some("x".into()), Some("../../x.png".into()), String::new(), None, "OEBPS/", &mut seen);
        assert!(matches!(escape, ManifestOutcome::Fatal(_)));

        let remote = classify_item(Some("r".into()), Some("https://cdn/x.png".into()), String::new(), None, "", &mut seen);
        assert!(matches!(remote, ManifestOutcome::Skipped { .. }));
    }
}
