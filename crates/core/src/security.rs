//! Limits applied to untrusted archives: entry names, decompression ratio,
//! per-entry and cumulative size, and DRM markers.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::SecurityError;

const MIB: u64 = 1024 * 1024;

/// Entries smaller than this are exempt from the ratio check; tiny, highly
/// compressible files (empty stylesheets, blank pages) are normal.
pub const RATIO_CHECK_MIN_BYTES: u64 = MIB;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    /// Size of the archive file itself, checked before it is opened.
    pub max_archive_bytes: u64,
    /// Uncompressed-to-compressed ratio above which an entry is a ZIP bomb.
    pub max_compression_ratio: u64,
    pub max_file_count: u64,
    /// Largest single entry that will be decompressed.
    pub max_resource_size_bytes: u64,
    /// Sum of declared uncompressed sizes across the archive.
    pub max_total_size_bytes: u64,
    /// Deepest element nesting the normalizer keeps.
    pub max_nesting_depth: u32,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 500 * MIB,
            max_compression_ratio: 100,
            max_file_count: 10_000,
            max_resource_size_bytes: 200 * MIB,
            max_total_size_bytes: 1024 * MIB,
            max_nesting_depth: 200,
        }
    }
}

impl SecurityLimits {
    pub fn check_file_count(&self, count: u64) -> Result<(), SecurityError> {
        if count > self.max_file_count {
            return Err(SecurityError::TooManyFiles {
                count,
                limit: self.max_file_count,
            });
        }
        Ok(())
    }

    /// Ratio check from central-directory sizes, before anything is inflated.
    pub fn check_ratio(&self, compressed: u64, uncompressed: u64) -> Result<(), SecurityError> {
        if uncompressed < RATIO_CHECK_MIN_BYTES {
            return Ok(());
        }
        let ratio = uncompressed.checked_div(compressed).unwrap_or(u64::MAX);
        if ratio > self.max_compression_ratio {
            return Err(SecurityError::ZipBomb {
                ratio,
                limit: self.max_compression_ratio,
            });
        }
        Ok(())
    }

    pub fn check_resource(&self, name: &str, size: u64) -> Result<(), SecurityError> {
        if size > self.max_resource_size_bytes {
            return Err(SecurityError::OversizedResource {
                name: name.to_string(),
                size_mb: size / MIB,
                limit_mb: self.max_resource_size_bytes / MIB,
            });
        }
        Ok(())
    }

    /// Start tracking cumulative entry sizes against `max_total_size_bytes`.
    pub fn budget(&self) -> SizeBudget<'_> {
        SizeBudget {
            limits: self,
            total: 0,
        }
    }
}

/// Running sum of entry sizes for one archive.
#[derive(Debug)]
pub struct SizeBudget<'a> {
    limits: &'a SecurityLimits,
    total: u64,
}

impl SizeBudget<'_> {
    pub fn charge(&mut self, size: u64) -> Result<(), SecurityError> {
        self.total = self.total.saturating_add(size);
        if self.total > self.limits.max_total_size_bytes {
            return Err(SecurityError::OversizedResource {
                name: "<total>".to_string(),
                size_mb: self.total / MIB,
                limit_mb: self.limits.max_total_size_bytes / MIB,
            });
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Reject entry names that are absolute, carry a drive prefix, contain NUL,
/// or climb out of the archive root with `..` in either separator style.
pub fn check_entry_name(name: &str) -> Result<(), SecurityError> {
    let bytes = name.as_bytes();
    let absolute = name.starts_with(['/', '\\']);
    let drive = bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    let climbs = Path::new(name)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
        || name.split(['/', '\\']).any(|part| part == "..");

    if absolute || drive || climbs || name.contains('\0') {
        return Err(SecurityError::PathTraversal {
            path: name.to_string(),
        });
    }
    Ok(())
}

/// Namespace fragments that identify a DRM scheme in `encryption.xml`.
const DRM_MARKERS: &[(&str, &str)] = &[
    ("http://ns.adobe.com/adept", "Adobe DRM"),
    ("http://ns.adobe.com/digitaleditions", "Adobe DRM"),
    ("http://www.apple.com/ibooks", "Apple FairPlay"),
    ("sinf", "Apple FairPlay"),
    ("http://urms.org", "Sony URMS"),
];

/// Font obfuscation algorithms; these encrypt fonts, not content.
const FONT_OBFUSCATION: &[&str] = &[
    "http://www.idpf.org/2008/embedding",
    "http://ns.adobe.com/pdf/enc#RC",
];

/// Reject DRM-protected archives. Obfuscated fonts alone pass.
pub fn check_encryption(encryption_xml: &str) -> Result<(), SecurityError> {
    let scheme = DRM_MARKERS
        .iter()
        .find(|(marker, _)| encryption_xml.contains(marker))
        .map(|(_, scheme)| *scheme)
        .or_else(|| {
            let encrypted = encryption_xml.contains("EncryptedData");
            let fonts_only = FONT_OBFUSCATION.iter().any(|alg| encryption_xml.contains(alg));
            (encrypted && !fonts_only).then_some("Unknown DRM")
        });

    match scheme {
        Some(drm_type) => Err(SecurityError::DrmProtected {
            drm_type: drm_type.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_names_inside_the_archive_pass() {
        for name in ["OEBPS/Text/ch1.xhtml", "META-INF/container.xml", "a..b/c.png"] {
            assert!(check_entry_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn escaping_entry_names_fail() {
        for name in [
            "../../etc/passwd",
            "OEBPS/../../x",
            "/etc/passwd",
            "\\Windows\\win.ini",
            "img\\..\\..\\secret",
            "C:\\boot.ini",
            "a\0b",
        ] {
            assert!(
                matches!(check_entry_name(name), Err(SecurityError::PathTraversal { .. })),
                "{name}"
            );
        }
    }

    #[test]
    fn ratio_ignores_small_entries() {
        let limits = SecurityLimits::default();
        // 500:1 but only 500 KiB
        assert!(limits.check_ratio(1024, 500 * 1024).is_ok());
        assert!(limits.check_ratio(MIB, 50 * MIB).is_ok());
        assert!(matches!(
            limits.check_ratio(1024, 10 * MIB),
            Err(SecurityError::ZipBomb { ratio: 10240, limit: 100 })
        ));
        assert!(limits.check_ratio(0, 2 * MIB).is_err());
    }

    #[test]
    fn budget_accumulates() {
        let limits = SecurityLimits {
            max_total_size_bytes: 10 * MIB,
            ..SecurityLimits::default()
        };
        let mut budget = limits.budget();
        assert!(budget.charge(6 * MIB).is_ok());
        assert!(budget.charge(4 * MIB).is_ok());
        assert_eq!(budget.total(), 10 * MIB);
        assert!(budget.charge(1).is_err());
    }

    #[test]
    fn counts_and_resources() {
        let limits = SecurityLimits::default();
        assert!(limits.check_file_count(10_000).is_ok());
        assert!(limits.check_file_count(10_001).is_err());
        assert!(limits.check_resource("cover.jpg", MIB).is_ok());
        assert!(limits.check_resource("huge.png", 201 * MIB).is_err());
    }

    #[test]
    fn drm_schemes_are_named() {
        let clean = r#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container"></encryption>"#;
        assert!(check_encryption(clean).is_ok());

        let adobe = r#"<encryption><EncryptedData><KeyInfo><resource xmlns="http://ns.adobe.com/adept"/></KeyInfo></EncryptedData></encryption>"#;
        match check_encryption(adobe) {
            Err(SecurityError::DrmProtected { drm_type }) => assert_eq!(drm_type, "Adobe DRM"),
            other => panic!("expected DrmProtected, got {other:?}"),
        }

        let unknown = "<encryption><EncryptedData><CipherData/></EncryptedData></encryption>";
        assert!(check_encryption(unknown).is_err());

        let fonts = r#"<encryption><EncryptedData><EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/></EncryptedData></encryption>"#;
        assert!(check_encryption(fonts).is_ok());
    }
}
