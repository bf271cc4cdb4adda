//! Resolution of links found inside an archive to archive-relative paths.

use percent_encoding::percent_decode_str;

/// A link split into its target path and fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHref {
    /// Archive path of the target document or resource.
    pub path: String,
    /// Fragment without `#`, empty when none.
    pub anchor: String,
}

/// Directory part of an archive path, with trailing slash (`""` at the root).
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i + 1]).unwrap_or("")
}

/// True when the link carries a URL scheme (`http:`, `data:`, `javascript:` ...).
pub fn has_scheme(href: &str) -> bool {
    match href.find(':') {
        Some(i) => {
            let scheme = &href[..i];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

/// Percent-decode, falling back to the raw text when the result is not UTF-8.
pub fn decode(s: &str) -> String {
    percent_decode_str(s)
        .decode_utf8()
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Join `relative` onto `base_dir` and fold `.`/`..` segments. Returns `None`
/// when the result would leave the archive root.
pub fn join_normalized(base_dir: &str, relative: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base_dir.split('/').chain(relative.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

/// Resolve a relative link written inside the document at `doc_path`.
///
/// External links (any scheme), absolute paths and links escaping the archive
/// root yield `None`. A pure fragment (`#note`) resolves to `doc_path` itself.
pub fn resolve(doc_path: &str, href: &str) -> Option<ResolvedHref> {
    let href = href.trim();
    if href.is_empty() || has_scheme(href) || href.starts_with('/') || href.starts_with('\\') {
        return None;
    }

    let (target, anchor) = match href.split_once('#') {
        Some((t, a)) => (t, a),
        None => (href, ""),
    };
    let target = target.split('?').next().unwrap_or("");

    let path = if target.is_empty() {
        doc_path.to_string()
    } else {
        join_normalized(parent_dir(doc_path), &decode(target))?
    };
    if path.is_empty() {
        return None;
    }

    Some(ResolvedHref {
        path,
        anchor: decode(anchor),
    })
}

/// Lookup key for case-insensitive path matching.
pub fn fold(path: &str) -> String {
    path.to_ascii_lowercase()
}
