//! Chapter sanitization: arbitrary (X)HTML in, allow-listed body markup out.
//!
//! Parsing goes through html5ever (via `scraper`), so broken markup is
//! repaired rather than rejected. The serializer walks the repaired tree with
//! an explicit depth counter and emits only allow-listed tags and attributes.

use std::collections::HashMap;

use scraper::node::Element;
use scraper::{ElementRef, Html, Node};

use crate::encoding::{collapse_whitespace, decode_markup};
use crate::href;

/// Emitted when a chapter has no visible content left after sanitization.
pub const EMPTY_CHAPTER_PLACEHOLDER: &str = r#"<section class="empty-chapter"></section>"#;

/// Elements removed together with everything inside them.
const DROPPED: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "video", "audio", "source", "track",
    "nav", "form", "button", "input", "select", "option", "textarea", "noscript", "head",
    "title", "meta", "link", "base", "template", "canvas", "applet", "frame", "frameset",
];

/// Elements kept as-is (minus disallowed attributes). Anything else is unwrapped.
const ALLOWED: &[&str] = &[
    "p", "div", "span", "h1", "h2", "h3", "h4", "h5", "h6", "a", "em", "strong", "i", "b",
    "u", "s", "sub", "sup", "small", "br", "hr", "blockquote", "pre", "code", "ul", "ol", "li",
    "dl", "dt", "dd", "table", "thead", "tbody", "tfoot", "tr", "td", "th", "caption",
    "colgroup", "col", "figure", "figcaption", "img", "section", "article", "aside", "header",
    "footer", "abbr", "cite", "q", "mark", "ruby", "rt", "rp", "del", "ins", "kbd", "samp",
    "var", "time",
];

const VOID: &[&str] = &["br", "hr", "img", "col"];

const BLOCK: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "br", "hr", "blockquote", "pre", "li",
    "dt", "dd", "tr", "td", "th", "caption", "figure", "figcaption", "section", "article",
    "aside", "header", "footer",
];

/// Where links inside one document may point.
#[derive(Debug, Clone, Copy)]
pub struct LinkContext<'a> {
    /// Archive path of the document being normalized.
    pub doc_path: &'a str,
    /// Folded archive path → stored image name.
    pub images: &'a HashMap<String, String>,
    /// Folded archive path → chapter index.
    pub chapters: &'a HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedChapter {
    pub html: String,
    pub text: String,
    /// Text of the first `h1`–`h6`, if any.
    pub heading: Option<String>,
    /// Recoverable problems met while normalizing.
    pub issues: Vec<String>,
}

pub fn normalize_chapter(bytes: &[u8], ctx: &LinkContext<'_>, max_depth: u32) -> NormalizedChapter {
    let decoded = decode_markup(bytes);
    let mut issues = Vec::new();
    if decoded.lossy {
        issues.push(format!(
            "{}: undecodable bytes replaced ({})",
            ctx.doc_path, decoded.encoding
        ));
    }

    let document = Html::parse_document(&decoded.text);
    if !document.errors.is_empty() {
        tracing::debug!(
            "{}: parser repaired {} markup errors",
            ctx.doc_path,
            document.errors.len()
        );
        issues.push(format!(
            "{}: repaired {} markup errors",
            ctx.doc_path,
            document.errors.len()
        ));
    }

    let root = document.root_element();
    let body = root
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
        .unwrap_or(root);

    let mut ser = Serializer {
        ctx,
        max_depth,
        out: String::new(),
        text: String::new(),
        heading: None,
        truncated: false,
        dropped_images: Vec::new(),
    };
    ser.children(body, 0);

    if ser.truncated {
        tracing::warn!("{}: markup nested deeper than {} truncated", ctx.doc_path, max_depth);
        issues.push(format!("{}: nesting deeper than {max_depth} truncated", ctx.doc_path));
    }
    for src in &ser.dropped_images {
        tracing::warn!("{}: dropped image {}", ctx.doc_path, src);
        issues.push(format!("{}: dropped unresolvable image {src}", ctx.doc_path));
    }

    let html = if ser.out.trim().is_empty() {
        EMPTY_CHAPTER_PLACEHOLDER.to_string()
    } else {
        ser.out.trim().to_string()
    };

    NormalizedChapter {
        html,
        text: collapse_whitespace(&ser.text),
        heading: ser.heading,
        issues,
    }
}

struct Serializer<'c, 'a> {
    ctx: &'c LinkContext<'a>,
    max_depth: u32,
    out: String,
    text: String,
    heading: Option<String>,
    truncated: bool,
    dropped_images: Vec<String>,
}

impl Serializer<'_, '_> {
    fn children(&mut self, el: ElementRef<'_>, depth: u32) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => {
                    escape_text(&mut self.out, t);
                    self.text.push_str(t);
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el, depth + 1);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef<'_>, depth: u32) {
        if depth > self.max_depth {
            self.truncated = true;
            return;
        }
        let name = el.value().name();
        if DROPPED.contains(&name) {
            return;
        }

        match name {
            "img" => self.image(el.value(), "src"),
            // SVG <image xlink:href> covers
            "image" => self.image(el.value(), "href"),
            _ if ALLOWED.contains(&name) => {
                if self.heading.is_none() && is_heading(name) {
                    let text = collapse_whitespace(&el.text().collect::<String>());
                    if !text.is_empty() {
                        self.heading = Some(text);
                    }
                }

                self.out.push('<');
                self.out.push_str(name);
                self.attributes(el.value(), name);
                if name == "a" {
                    if let Some(target) = el.value().attr("href").and_then(|h| self.rewrite_link(h)) {
                        push_attr(&mut self.out, "href", &target);
                    }
                }
                self.out.push('>');

                if !VOID.contains(&name) {
                    self.children(el, depth);
                    self.out.push_str("</");
                    self.out.push_str(name);
                    self.out.push('>');
                }
                if BLOCK.contains(&name) {
                    self.text.push(' ');
                }
            }
            _ => self.children(el, depth),
        }
    }

    fn attributes(&mut self, el: &Element, name: &str) {
        let mut kept: Vec<(String, &str)> = el
            .attrs()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .filter(|(key, _)| match key.as_str() {
                "id" | "class" | "title" | "lang" | "dir" => true,
                "colspan" | "rowspan" => matches!(name, "td" | "th"),
                "alt" | "width" | "height" => name == "img",
                _ => false,
            })
            .collect();
        // attribute storage is unordered
        kept.sort();
        kept.dedup_by(|a, b| a.0 == b.0);
        for (key, value) in kept {
            push_attr(&mut self.out, &key, value);
        }
    }

    fn image(&mut self, el: &Element, src_attr: &str) {
        // by local name, so `xlink:href` matches too
        let src = el
            .attrs()
            .find(|(key, _)| *key == src_attr)
            .map(|(_, value)| value.trim())
            .filter(|s| !s.is_empty());
        let Some(src) = src else {
            return;
        };
        let stored = href::resolve(self.ctx.doc_path, src)
            .and_then(|r| self.ctx.images.get(&href::fold(&r.path)));
        let Some(name) = stored else {
            self.dropped_images.push(src.to_string());
            return;
        };

        self.out.push_str("<img");
        push_attr(&mut self.out, "src", &format!("images/{name}"));
        self.attributes(el, "img");
        self.out.push('>');
    }

    /// Chapter links become `{index}` or `{index}#{anchor}`; web links are
    /// kept; everything else loses its href.
    fn rewrite_link(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.starts_with('#') {
            return (raw.len() > 1).then(|| raw.to_string());
        }
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:") {
            return Some(raw.to_string());
        }

        let resolved = href::resolve(self.ctx.doc_path, raw)?;
        let index = self.ctx.chapters.get(&href::fold(&resolved.path))?;
        if resolved.anchor.is_empty() {
            Some(index.to_string())
        } else {
            Some(format!("{index}#{}", resolved.anchor))
        }
    }
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn escape_text(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out.push('"');
}
