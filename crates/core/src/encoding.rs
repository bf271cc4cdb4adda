//! Source text decoding and Unicode normalization.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use unicode_normalization::UnicodeNormalization;

/// Bytes scanned for an XML declaration or `<meta charset>`.
const SNIFF_LEN: usize = 1024;

#[derive(Debug)]
pub struct Decoded<'a> {
    pub text: Cow<'a, str>,
    /// Name of the encoding that was applied.
    pub encoding: &'static str,
    /// Some input could not be decoded and was replaced with U+FFFD.
    pub lossy: bool,
}

/// Decode markup bytes. Order: byte-order mark, XML declaration,
/// `<meta charset>`, then UTF-8. Never fails; malformed sequences become
/// replacement characters.
pub fn decode_markup(bytes: &[u8]) -> Decoded<'_> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((enc, bom_len)) => (enc, &bytes[bom_len..]),
        None => (declared_encoding(bytes).unwrap_or(UTF_8), bytes),
    };
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    Decoded {
        text,
        encoding: encoding.name(),
        lossy: had_errors,
    }
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    let label = if head.starts_with("<?xml") {
        let decl_end = head.find("?>")?;
        attribute_value(&head[..decl_end], "encoding")
    } else {
        None
    }
    .or_else(|| attribute_value(&head, "charset"))?;

    let encoding = Encoding::for_label(label.as_bytes())?;
    // a declaration claiming UTF-16 in an ASCII-compatible prefix is wrong
    // about itself; the BOM check already handled real UTF-16
    if encoding == encoding_rs::UTF_16LE || encoding == encoding_rs::UTF_16BE {
        return None;
    }
    Some(encoding)
}

fn attribute_value<'a>(haystack: &'a str, name: &str) -> Option<&'a str> {
    let start = haystack.find(name)? + name.len();
    let rest = haystack[start..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let rest = rest.trim_start_matches(['"', '\'']);
    let end = rest
        .find(|c: char| c == '"' || c == '\'' || c == ';' || c == '>' || c.is_whitespace())
        .unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then_some(value)
}

/// NFC-normalize and trim a metadata or title string.
pub fn normalize_text(s: &str) -> String {
    s.trim().nfc().collect()
}

/// Collapse every run of whitespace into a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
