//! Request validation for externally supplied book ids, chapter indices and
//! image names. Purely lexical: nothing here touches the filesystem.

use std::path::{Component, Path};

use crate::document::{BookId, BOOK_ID_SUFFIX};
use crate::error::ValidationError;
use crate::images::has_image_extension;

pub const MAX_NAME_LEN: usize = 255;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn looks_like_traversal(value: &str) -> bool {
    value.contains("..")
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
        || (value.len() >= 2 && value.as_bytes()[1] == b':' && value.as_bytes()[0].is_ascii_alphabetic())
}

/// True when `base.join(name)` stays lexically under `base`.
fn stays_under(base: &Path, name: &str) -> bool {
    let joined = base.join(name);
    match joined.strip_prefix(base) {
        Ok(rest) => {
            rest.components().count() == 1
                && rest.components().all(|c| matches!(c, Component::Normal(_)))
        }
        Err(_) => false,
    }
}

pub fn validate_book_id(raw: &str, books_root: &Path) -> Result<BookId, ValidationError> {
    let invalid = |reason| ValidationError::InvalidBookId {
        id: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("empty"));
    }
    if looks_like_traversal(raw) {
        return Err(ValidationError::PathTraversal {
            value: raw.to_string(),
        });
    }
    if raw.len() > MAX_NAME_LEN {
        return Err(invalid("too long"));
    }
    if !raw.chars().all(is_name_char) {
        return Err(invalid("unsupported characters"));
    }
    if raw.starts_with('.') {
        return Err(invalid("leading dot"));
    }
    match raw.strip_suffix(BOOK_ID_SUFFIX) {
        Some(stem) if !stem.is_empty() => {}
        _ => return Err(invalid("must end in _data")),
    }
    if !stays_under(books_root, raw) {
        return Err(ValidationError::PathTraversal {
            value: raw.to_string(),
        });
    }

    Ok(BookId::new_unchecked(raw.to_string()))
}

/// Parse a chapter index from a request path segment.
pub fn validate_chapter_index(raw: &str, max: usize) -> Result<usize, ValidationError> {
    match raw.trim().parse::<i64>() {
        Ok(value) => check_index(value, max).map_err(|_| ValidationError::InvalidIndex {
            value: raw.to_string(),
            max,
        }),
        Err(_) => Err(ValidationError::InvalidIndex {
            value: raw.to_string(),
            max,
        }),
    }
}

pub fn check_index(value: i64, max: usize) -> Result<usize, ValidationError> {
    usize::try_from(value)
        .ok()
        .filter(|&index| index <= max)
        .ok_or(ValidationError::InvalidIndex {
            value: value.to_string(),
            max,
        })
}

pub fn validate_image_name(raw: &str, images_dir: &Path) -> Result<String, ValidationError> {
    let invalid = |reason| ValidationError::InvalidImageName {
        name: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("empty"));
    }
    if looks_like_traversal(raw) {
        return Err(ValidationError::PathTraversal {
            value: raw.to_string(),
        });
    }
    if raw.len() > MAX_NAME_LEN {
        return Err(invalid("too long"));
    }
    if !raw.chars().all(is_name_char) {
        return Err(invalid("unsupported characters"));
    }
    if raw.starts_with('.') {
        return Err(invalid("leading dot"));
    }
    match raw.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && has_image_extension(ext) => {}
        _ => return Err(invalid("not an image file name")),
    }
    if !stays_under(images_dir, raw) {
        return Err(ValidationError::PathTraversal {
            value: raw.to_string(),
        });
    }

    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn root() -> &'static Path {
        Path::new("/srv/books")
    }

    #[test]
    fn accepts_derived_ids() {
        let id = validate_book_id("My_Book-2.0_data", root()).unwrap();
        assert_eq!(id.as_str(), "My_Book-2.0_data");
        let derived = BookId::derive("Some Title (1999).epub");
        assert_eq!(validate_book_id(derived.as_str(), root()).unwrap(), derived);
    }

    #[test]
    fn traversal_is_its_own_error() {
        for raw in ["../etc_data", "a/b_data", "..\\x_data", "a\0_data", "/abs_data", "C:evil_data", "x..y_data"] {
            assert!(
                matches!(validate_book_id(raw, root()), Err(ValidationError::PathTraversal { .. })),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn malformed_ids_are_invalid() {
        for raw in ["", "book", "_data", ".hidden_data", "sp ace_data", "ünï_data"] {
            assert!(
                matches!(validate_book_id(raw, root()), Err(ValidationError::InvalidBookId { .. })),
                "{raw:?}"
            );
        }
        let long = format!("{}_data", "a".repeat(300));
        assert!(validate_book_id(&long, root()).is_err());
    }

    #[test]
    fn chapter_index_bounds() {
        assert_eq!(validate_chapter_index("0", 10_000), Ok(0));
        assert_eq!(validate_chapter_index("10000", 10_000), Ok(10_000));
        for raw in ["10001", "-1", "abc", "", "1.5", "99999999999999999999"] {
            assert!(
                matches!(validate_chapter_index(raw, 10_000), Err(ValidationError::InvalidIndex { .. })),
                "{raw:?}"
            );
        }
        assert!(check_index(-3, 5).is_err());
        assert_eq!(check_index(5, 5), Ok(5));
    }

    #[test]
    fn image_names() {
        let dir = Path::new("/srv/books/x_data/images");
        assert_eq!(validate_image_name("cover_1a2b.JPG", dir).unwrap(), "cover_1a2b.JPG");
        assert!(matches!(
            validate_image_name("../book.json", dir),
            Err(ValidationError::PathTraversal { .. })
        ));
        for raw in ["book.json", ".png", "noext", "a b.png", "evil.svg.exe"] {
            assert!(
                matches!(validate_image_name(raw, dir), Err(ValidationError::InvalidImageName { .. })),
                "{raw:?}"
            );
        }
    }

    proptest! {
        #[test]
        fn prop_traversal_never_validates(
            prefix in "[A-Za-z0-9._-]{0,12}",
            sep in prop_oneof![Just(".."), Just("/"), Just("\\"), Just("\0")],
            suffix in "[A-Za-z0-9._-]{0,12}",
        ) {
            let raw = format!("{prefix}{sep}{suffix}_data");
            prop_assert!(
                matches!(
                    validate_book_id(&raw, root()),
                    Err(ValidationError::PathTraversal { .. })
                ),
                "expected traversal rejection"
            );
            let image = format!("{prefix}{sep}{suffix}.png");
            prop_assert!(
                matches!(
                    validate_image_name(&image, root()),
                    Err(ValidationError::PathTraversal { .. })
                ),
                "expected traversal rejection"
            );
        }

        #[test]
        fn prop_accepted_ids_stay_inside_root(raw in "\\PC{0,64}") {
            if let Ok(id) = validate_book_id(&raw, root()) {
                let joined = root().join(id.as_str());
                prop_assert!(joined.starts_with(root()));
                prop_assert_eq!(joined.parent(), Some(root()));
            }
        }

        #[test]
        fn prop_derived_ids_always_validate(name in "\\PC{0,300}") {
            let id = BookId::derive(&name);
            prop_assert_eq!(validate_book_id(id.as_str(), root()), Ok(id.clone()));
        }

        #[test]
        fn prop_index_accepts_exactly_the_range(value in -50i64..20_050) {
            let result = validate_chapter_index(&value.to_string(), 10_000);
            prop_assert_eq!(result.is_ok(), (0..=10_000).contains(&value));
        }
    }
}
