//! In-memory EPUB fixtures.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use epub_reader_core::library::{Library, LibraryOptions};

/// Smallest byte sequence the image sniffer accepts as PNG.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";
pub const OTHER_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x02\0\0\0\x02\x08\x02\0\0\0";

pub struct Fixture {
    pub title: String,
    pub author: String,
    /// (file name under OEBPS/Text/, body markup)
    pub chapters: Vec<(String, String)>,
    /// (file name under OEBPS/Images/, bytes)
    pub images: Vec<(String, Vec<u8>)>,
    pub nav: bool,
}

impl Fixture {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            author: "Test Author".to_string(),
            chapters: Vec::new(),
            images: Vec::new(),
            nav: true,
        }
    }

    pub fn chapter(mut self, file: &str, body: &str) -> Self {
        self.chapters.push((file.to_string(), body.to_string()));
        self
    }

    pub fn image(mut self, file: &str, bytes: &[u8]) -> Self {
        self.images.push((file.to_string(), bytes.to_vec()));
        self
    }

    pub fn without_nav(mut self) -> Self {
        self.nav = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut manifest = String::new();
        let mut spine = String::new();
        let mut nav_items = String::new();
        for (i, (file, _)) in self.chapters.iter().enumerate() {
            manifest.push_str(&format!(
                r#"<item id="c{i}" href="Text/{file}" media-type="application/xhtml+xml"/>"#
            ));
            spine.push_str(&format!(r#"<itemref idref="c{i}"/>"#));
            nav_items.push_str(&format!(
                r#"<li><a href="Text/{file}">Chapter {}</a></li>"#,
                i + 1
            ));
        }
        for (i, (file, _)) in self.images.iter().enumerate() {
            manifest.push_str(&format!(
                r#"<item id="img{i}" href="Images/{file}" media-type="image/png"/>"#
            ));
        }
        if self.nav {
            manifest.push_str(
                r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
            );
        }

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:test</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:creator>{}</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#,
            self.title, self.author
        );

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let deflated = zip::write::SimpleFileOptions::default();

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .unwrap();
        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(opf.as_bytes()).unwrap();

        if self.nav {
            zip.start_file("OEBPS/nav.xhtml", deflated).unwrap();
            zip.write_all(
                format!(
                    r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops"><body><nav epub:type="toc"><ol>{nav_items}</ol></nav></body></html>"#
                )
                .as_bytes(),
            )
            .unwrap();
        }
        for (file, body) in &self.chapters {
            zip.start_file(format!("OEBPS/Text/{file}"), deflated).unwrap();
            zip.write_all(
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>t</title></head><body>{body}</body></html>"#
                )
                .as_bytes(),
            )
            .unwrap();
        }
        for (file, bytes) in &self.images {
            zip.start_file(format!("OEBPS/Images/{file}"), deflated).unwrap();
            zip.write_all(bytes).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }
}

/// A three-chapter book with nav.
pub fn three_chapters(title: &str) -> Vec<u8> {
    Fixture::new(title)
        .chapter("one.xhtml", "<h1>One</h1><p>First.</p>")
        .chapter("two.xhtml", "<h1>Two</h1><p>Second.</p>")
        .chapter("three.xhtml", "<h1>Three</h1><p>Third.</p>")
        .build()
}

pub fn open_library(root: &Path, capacity: usize) -> Library {
    let mut opts = LibraryOptions::new(root);
    opts.cache_capacity = capacity;
    Library::open(opts).unwrap()
}

/// Every path under `root`, sorted, for before/after comparisons.
pub fn snapshot(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, base: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            out.push(path.strip_prefix(base).unwrap().display().to_string());
            if path.is_dir() {
                walk(&path, base, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
