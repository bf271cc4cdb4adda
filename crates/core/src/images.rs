//! Content-addressed image storage for one book.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::document::{sanitize_file_name, ImageAsset};
use crate::error::AssetError;
use crate::href;

const MAX_NAME_LEN: usize = 120;

/// Extensions a stored image may carry.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "webp", "bmp", "tif", "tiff"];

/// Writes the images of one book into its `images/` directory, storing each
/// distinct content once.
#[derive(Debug)]
pub struct ImageStore {
    dir: PathBuf,
    assets: Vec<ImageAsset>,
    by_digest: HashMap<String, Vec<usize>>,
    taken: HashSet<String>,
    by_source: HashMap<String, usize>,
}

impl ImageStore {
    pub fn create(dir: &Path) -> Result<Self, AssetError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            assets: Vec::new(),
            by_digest: HashMap::new(),
            taken: HashSet::new(),
            by_source: HashMap::new(),
        })
    }

    /// Store `data` found at `source_path` in the archive and return the
    /// canonical name it is served under.
    pub fn store(
        &mut self,
        source_path: &str,
        declared_media_type: &str,
        data: &[u8],
    ) -> Result<String, AssetError> {
        let media_type = sniff_media_type(data).ok_or_else(|| AssetError::InvalidSignature {
            name: source_path.to_string(),
            declared: declared_media_type.to_string(),
        })?;
        if media_type != canonical_media_type(declared_media_type) {
            return Err(AssetError::SignatureMismatch {
                name: source_path.to_string(),
                declared: declared_media_type.to_string(),
                detected: media_type.to_string(),
            });
        }

        let digest = sha256_hex(data);
        if let Some(idx) = self.find_identical(&digest, data)? {
            self.link_source(idx, source_path);
            return Ok(self.assets[idx].name.clone());
        }

        let name = self.unique_name(source_path, media_type, &digest);
        fs::write(self.dir.join(&name), data)?;

        let idx = self.assets.len();
        self.assets.push(ImageAsset {
            name: name.clone(),
            digest: digest.clone(),
            size: data.len() as u64,
            media_type: media_type.to_string(),
            sources: Vec::new(),
        });
        self.by_digest.entry(digest).or_default().push(idx);
        self.taken.insert(href::fold(&name));
        self.link_source(idx, source_path);
        Ok(name)
    }

    /// Stored name for an archive path, tolerating case differences.
    pub fn resolve(&self, archive_path: &str) -> Option<&str> {
        self.by_source
            .get(&href::fold(archive_path))
            .map(|&idx| self.assets[idx].name.as_str())
    }

    /// Folded archive path → stored name, for rewriting chapter references.
    pub fn link_map(&self) -> HashMap<String, String> {
        self.by_source
            .iter()
            .map(|(source, &idx)| (source.clone(), self.assets[idx].name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn into_assets(self) -> Vec<ImageAsset> {
        self.assets
    }

    /// A digest match only counts once the stored bytes compare equal.
    fn find_identical(&self, digest: &str, data: &[u8]) -> Result<Option<usize>, AssetError> {
        let Some(candidates) = self.by_digest.get(digest) else {
            return Ok(None);
        };
        for &idx in candidates {
            let stored = fs::read(self.dir.join(&self.assets[idx].name))?;
            if stored == data {
                return Ok(Some(idx));
            }
            tracing::warn!("SHA-256 collision on {}", self.assets[idx].name);
        }
        Ok(None)
    }

    fn link_source(&mut self, idx: usize, source_path: &str) {
        let sources = &mut self.assets[idx].sources;
        if !sources.iter().any(|s| s == source_path) {
            sources.push(source_path.to_string());
        }
        self.by_source.insert(href::fold(source_path), idx);
    }

    fn unique_name(&self, source_path: &str, media_type: &str, digest: &str) -> String {
        let base = source_path.rsplit('/').next().unwrap_or(source_path);
        // the extension is what the image is served by, so it must agree
        // with the sniffed type
        let (stem, ext) = match base.rfind('.') {
            Some(i) if i > 0 && extension_matches(&base[i + 1..], media_type) => {
                (&base[..i], base[i + 1..].to_ascii_lowercase())
            }
            Some(i) if i > 0 && has_image_extension(&base[i + 1..]) => {
                (&base[..i], extension_for(media_type).to_string())
            }
            _ => (base, extension_for(media_type).to_string()),
        };
        let stem = sanitize_file_name(stem, MAX_NAME_LEN);

        let first = format!("{stem}.{ext}");
        if !self.taken.contains(&href::fold(&first)) {
            return first;
        }
        let short = &digest[..8];
        let second = format!("{stem}_{short}.{ext}");
        if !self.taken.contains(&href::fold(&second)) {
            return second;
        }
        (2..)
            .map(|n| format!("{stem}_{short}_{n}.{ext}"))
            .find(|candidate| !self.taken.contains(&href::fold(candidate)))
            .unwrap_or(second)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn has_image_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// MIME type for a stored file name, from its extension.
pub fn mime_for_name(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

fn extension_matches(ext: &str, media_type: &str) -> bool {
    has_image_extension(ext) && mime_for_name(ext) == media_type
}

/// Declared types as producers write them, mapped to what the sniffer reports.
fn canonical_media_type(declared: &str) -> &str {
    match declared {
        "image/jpg" | "image/pjpeg" => "image/jpeg",
        "image/svg" => "image/svg+xml",
        "image/x-ms-bmp" => "image/bmp",
        other => other,
    }
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "png",
    }
}

/// Media type implied by the content's signature, `None` when unrecognized.
pub fn sniff_media_type(data: &[u8]) -> Option<&'static str> {
    use image::ImageFormat;

    if let Ok(format) = image::guess_format(data) {
        let mime = match format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
            _ => return None,
        };
        return Some(mime);
    }
    looks_like_svg(data).then_some("image/svg+xml")
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with('<') && text.to_ascii_lowercase().contains("<svg")
}
