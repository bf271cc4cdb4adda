//! Table of contents from the EPUB3 nav document, the EPUB2 NCX, or the spine.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::archive::{Navigation, NavigationKind};
use crate::document::TocEntry;
use crate::encoding::{collapse_whitespace, decode_markup};
use crate::href;

/// Where the final TOC came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TocSource {
    Nav,
    Ncx,
    Spine,
}

/// A spine document as the TOC builder sees it.
#[derive(Debug, Clone, Copy)]
pub struct ChapterRef<'a> {
    pub path: &'a str,
    pub heading: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocOutcome {
    pub entries: Vec<TocEntry>,
    pub source: TocSource,
    pub issues: Vec<String>,
}

/// Entry as written in the navigation document, before link resolution.
#[derive(Debug, Clone, Default, PartialEq)]
struct RawEntry {
    title: String,
    href: String,
    children: Vec<RawEntry>,
}

pub fn build_toc(
    navigation: Option<&Navigation>,
    chapters: &[ChapterRef<'_>],
    max_depth: usize,
) -> TocOutcome {
    let mut issues = Vec::new();
    let index: HashMap<String, usize> = chapters
        .iter()
        .enumerate()
        .map(|(i, c)| (href::fold(c.path), i))
        .collect();

    if let Some(nav) = navigation {
        let text = decode_markup(&nav.data).text.into_owned();
        let mut truncated = false;
        let (parsed, source) = match nav.kind {
            NavigationKind::Nav => (parse_nav(&text, max_depth, &mut truncated), TocSource::Nav),
            NavigationKind::Ncx => (parse_ncx(&text, max_depth, &mut truncated), TocSource::Ncx),
        };
        if truncated {
            tracing::warn!("{}: TOC deeper than {} levels truncated", nav.path, max_depth);
            issues.push(format!("{}: TOC deeper than {max_depth} levels truncated", nav.path));
        }

        match parsed {
            Ok(raw) => {
                let mut resolver = Resolver {
                    nav_path: &nav.path,
                    index: &index,
                    issues: &mut issues,
                };
                let entries = resolver.resolve_all(raw);
                if entries.iter().any(|e| e.chapter.is_some() || !e.children.is_empty()) {
                    return TocOutcome {
                        entries,
                        source,
                        issues,
                    };
                }
                issues.push(format!("{}: navigation yielded no entries", nav.path));
            }
            Err(detail) => {
                tracing::warn!("{}: unparseable navigation: {}", nav.path, detail);
                issues.push(format!("{}: unparseable navigation: {detail}", nav.path));
            }
        }
    }

    TocOutcome {
        entries: spine_toc(chapters),
        source: TocSource::Spine,
        issues,
    }
}

/// One flat entry per chapter.
pub fn spine_toc(chapters: &[ChapterRef<'_>]) -> Vec<TocEntry> {
    chapters
        .iter()
        .enumerate()
        .map(|(i, c)| TocEntry {
            title: c
                .heading
                .map(str::to_string)
                .unwrap_or_else(|| section_title(i)),
            href: c.path.to_string(),
            file_href: c.path.to_string(),
            anchor: String::new(),
            chapter: Some(i),
            children: Vec::new(),
        })
        .collect()
}

/// Fallback title for a chapter with neither TOC entry nor heading.
pub fn section_title(index: usize) -> String {
    format!("Section {}", index + 1)
}

struct Resolver<'a> {
    nav_path: &'a str,
    index: &'a HashMap<String, usize>,
    issues: &'a mut Vec<String>,
}

impl Resolver<'_> {
    fn resolve_all(&mut self, raw: Vec<RawEntry>) -> Vec<TocEntry> {
        let mut out = Vec::new();
        for entry in raw {
            self.resolve_into(entry, &mut out);
        }
        out
    }

    fn resolve_into(&mut self, raw: RawEntry, out: &mut Vec<TocEntry>) {
        let children = self.resolve_all(raw.children);
        let title = collapse_whitespace(&raw.title);

        if raw.href.trim().is_empty() {
            if title.is_empty() && children.is_empty() {
                return;
            }
            out.push(TocEntry {
                title,
                href: String::new(),
                file_href: String::new(),
                anchor: String::new(),
                chapter: None,
                children,
            });
            return;
        }

        let target = href::resolve(self.nav_path, &raw.href)
            .and_then(|r| self.index.get(&href::fold(&r.path)).map(|&i| (r, i)));
        match target {
            Some((resolved, chapter)) => out.push(TocEntry {
                title: if title.is_empty() { section_title(chapter) } else { title },
                href: raw.href,
                file_href: resolved.path,
                anchor: resolved.anchor,
                chapter: Some(chapter),
                children,
            }),
            None => {
                tracing::warn!("TOC entry '{}' points outside the spine: {}", title, raw.href);
                self.issues
                    .push(format!("TOC entry '{title}' points outside the spine: {}", raw.href));
                out.extend(children);
            }
        }
    }
}

// --- EPUB3 nav ---

fn parse_nav(content: &str, max_depth: usize, truncated: &mut bool) -> Result<Vec<RawEntry>, String> {
    let document = Html::parse_document(content);
    let nav_selector = Selector::parse("nav").map_err(|e| e.to_string())?;

    let navs: Vec<ElementRef<'_>> = document.select(&nav_selector).collect();
    let nav = navs
        .iter()
        .find(|n| {
            n.value()
                .attr("epub:type")
                .is_some_and(|t| t.split_whitespace().any(|t| t == "toc"))
                || n.value().attr("role") == Some("doc-toc")
        })
        .or_else(|| navs.first())
        .ok_or_else(|| "no <nav> element".to_string())?;

    let Some(ol) = descendant(*nav, "ol") else {
        return Ok(Vec::new());
    };
    Ok(walk_ol(ol, 0, max_depth, truncated))
}

fn walk_ol(ol: ElementRef<'_>, depth: usize, max_depth: usize, truncated: &mut bool) -> Vec<RawEntry> {
    if depth >= max_depth {
        *truncated = true;
        return Vec::new();
    }

    let mut entries = Vec::new();
    for li in child_elements(ol).filter(|c| c.value().name() == "li") {
        let mut entry = RawEntry::default();
        for child in child_elements(li) {
            match child.value().name() {
                "a" | "span" if entry.title.is_empty() && entry.href.is_empty() => {
                    entry.title = child.text().collect();
                    entry.href = child.value().attr("href").unwrap_or("").to_string();
                }
                "ol" => entry.children = walk_ol(child, depth + 1, max_depth, truncated),
                _ => {}
            }
        }
        entries.push(entry);
    }
    entries
}

fn child_elements<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

fn descendant<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .find(|d| d.value().name() == name)
}

// --- EPUB2 NCX ---

fn parse_ncx(content: &str, max_depth: usize, truncated: &mut bool) -> Result<Vec<RawEntry>, String> {
    let mut reader = XmlReader::from_str(content);
    let mut roots = Vec::new();
    let mut stack: Vec<RawEntry> = Vec::new();
    // navPoints below the depth limit are skipped wholesale
    let mut skip_depth = 0usize;
    let mut in_label = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"navPoint" => {
                    if skip_depth > 0 || stack.len() >= max_depth {
                        skip_depth += 1;
                        *truncated = true;
                    } else {
                        stack.push(RawEntry::default());
                    }
                }
                b"navLabel" => in_label = true,
                b"text" if in_label => in_text = true,
                b"content" => set_ncx_src(e, &mut stack, skip_depth),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"content" => {
                set_ncx_src(e, &mut stack, skip_depth)
            }
            Ok(Event::Text(ref e)) if in_text && skip_depth == 0 => {
                if let Some(top) = stack.last_mut() {
                    top.title.push_str(&e.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"navPoint" => {
                    if skip_depth > 0 {
                        skip_depth -= 1;
                    } else if let Some(done) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(done),
                            None => roots.push(done),
                        }
                    }
                }
                b"navLabel" => in_label = false,
                b"text" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    Ok(roots)
}

fn set_ncx_src(e: &quick_xml::events::BytesStart<'_>, stack: &mut [RawEntry], skip_depth: usize) {
    if skip_depth > 0 {
        return;
    }
    let Some(top) = stack.last_mut() else {
        return;
    };
    if !top.href.is_empty() {
        return;
    }
    if let Some(src) = e
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"src")
    {
        top.href = src
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&src.value).into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CHAPTERS: &[&str] = &["OEBPS/ch1.xhtml", "OEBPS/ch2.xhtml", "OEBPS/ch3.xhtml"];

    fn refs() -> Vec<ChapterRef<'static>> {
        CHAPTERS
            .iter()
            .map(|p| ChapterRef {
                path: p,
                heading: None,
            })
            .collect()
    }

    fn nav(kind: NavigationKind, path: &str, data: &str) -> Navigation {
        Navigation {
            kind,
            path: path.to_string(),
            data: data.as_bytes().to_vec(),
        }
    }

    fn titles(entries: &[TocEntry]) -> Vec<(String, Option<usize>, usize)> {
        entries
            .iter()
            .map(|e| (e.title.clone(), e.chapter, e.children.len()))
            .collect()
    }

    const NAV_DOC: &str = r#"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
      <nav epub:type="landmarks"><ol><li><a href="ch3.xhtml">Landmark</a></li></ol></nav>
      <nav epub:type="toc"><h1>Contents</h1><ol>
        <li><span>Part I</span><ol>
          <li><a href="ch1.xhtml">One</a></li>
          <li><a href="ch2.xhtml#mid">Two</a></li>
        </ol></li>
        <li><a href="appendix.xhtml">Appendix</a><ol><li><a href="ch3.xhtml">Three</a></li></ol></li>
      </ol></nav></body></html>"#;

    #[test]
    fn nav_document_builds_tree() {
        let n = nav(NavigationKind::Nav, "OEBPS/nav.xhtml", NAV_DOC);
        let out = build_toc(Some(&n), &refs(), 10);
        assert_eq!(out.source, TocSource::Nav);
        assert_eq!(
            titles(&out.entries),
            vec![("Part I".to_string(), None, 2), ("Three".to_string(), Some(2), 0)]
        );
        let two = &out.entries[0].children[1];
        assert_eq!(two.chapter, Some(1));
        assert_eq!(two.anchor, "mid");
        assert_eq!(two.file_href, "OEBPS/ch2.xhtml");
        // appendix.xhtml is not in the spine: dropped, child promoted
        assert!(out.issues.iter().any(|i| i.contains("appendix.xhtml")));
    }

    #[test]
    fn ncx_keeps_nested_titles() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/"><navMap>
  <navPoint id="p1"><navLabel><text>Book One</text></navLabel><content src="ch1.xhtml"/>
    <navPoint id="p2"><navLabel><text>Chapter &amp; Verse</text></navLabel><content src="ch2.xhtml"/></navPoint>
  </navPoint>
  <navPoint id="p3"><navLabel><text>End</text></navLabel><content src="ch3.xhtml"/></navPoint>
</navMap></ncx>"#;
        let n = nav(NavigationKind::Ncx, "OEBPS/toc.ncx", ncx);
        let out = build_toc(Some(&n), &refs(), 10);
        assert_eq!(out.source, TocSource::Ncx);
        assert_eq!(
            titles(&out.entries),
            vec![("Book One".to_string(), Some(0), 1), ("End".to_string(), Some(2), 0)]
        );
        assert_eq!(out.entries[0].children[0].title, "Chapter & Verse");
    }

    #[test]
    fn depth_is_bounded() {
        let mut ncx = String::from("<ncx><navMap>");
        for i in 0..30 {
            ncx.push_str(&format!(
                r#"<navPoint><navLabel><text>L{i}</text></navLabel><content src="ch1.xhtml"/>"#
            ));
        }
        ncx.push_str(&"</navPoint>".repeat(30));
        ncx.push_str("</navMap></ncx>");

        let n = nav(NavigationKind::Ncx, "OEBPS/toc.ncx", &ncx);
        let out = build_toc(Some(&n), &refs(), 3);
        let mut depth = 0;
        let mut level = &out.entries;
        while let Some(first) = level.first() {
            depth += 1;
            level = &first.children;
        }
        assert_eq!(depth, 3);
        assert!(out.issues.iter().any(|i| i.contains("truncated")));
    }

    #[test]
    fn missing_or_empty_navigation_falls_back_to_spine() {
        let chapters = vec![
            ChapterRef {
                path: "a.xhtml",
                heading: Some("Opening"),
            },
            ChapterRef {
                path: "b.xhtml",
                heading: None,
            },
        ];
        let out = build_toc(None, &chapters, 10);
        assert_eq!(out.source, TocSource::Spine);
        assert_eq!(
            titles(&out.entries),
            vec![("Opening".to_string(), Some(0), 0), ("Section 2".to_string(), Some(1), 0)]
        );

        let empty = nav(NavigationKind::Nav, "nav.xhtml", "<nav><ol></ol></nav>");
        assert_eq!(build_toc(Some(&empty), &chapters, 10).source, TocSource::Spine);

        let broken = nav(NavigationKind::Ncx, "toc.ncx", "<ncx><navMap><navPoint></navMap>");
        let out = build_toc(Some(&broken), &chapters, 10);
        assert_eq!(out.source, TocSource::Spine);
        assert!(!out.issues.is_empty());
    }
}
