//! Book record persistence: versioned JSON envelope and atomic directory commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::document::{BookId, BookRecord};
use crate::error::RecordError;
use crate::images::sha256_hex;
use crate::validate::validate_book_id;

pub const FORMAT_VERSION: u32 = 1;
pub const RECORD_FILE: &str = "book.json";
pub const IMAGES_DIR: &str = "images";

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";
/// Length of a hyphenated UUID.
const UUID_LEN: usize = 36;

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format_version: u32,
    book: &'a BookRecord,
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    format_version: u32,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    book: BookRecord,
}

/// A record read back from disk together with the digest of its bytes.
#[derive(Debug)]
pub struct StoredRecord {
    pub record: BookRecord,
    pub digest: String,
}

pub fn encode(record: &BookRecord) -> Result<Vec<u8>, RecordError> {
    Ok(serde_json::to_vec_pretty(&EnvelopeOut {
        format_version: FORMAT_VERSION,
        book: record,
    })?)
}

/// Decode an envelope. The version is read before the body so that a record
/// written by a different release is reported as such, not as corruption.
pub fn decode(bytes: &[u8]) -> Result<BookRecord, RecordError> {
    let header: VersionHeader =
        serde_json::from_slice(bytes).map_err(|e| RecordError::Corrupt(e.to_string()))?;
    if header.format_version != FORMAT_VERSION {
        return Err(RecordError::IncompatibleFormat {
            found: header.format_version,
            expected: FORMAT_VERSION,
        });
    }
    let envelope: EnvelopeIn =
        serde_json::from_slice(bytes).map_err(|e| RecordError::Corrupt(e.to_string()))?;
    Ok(envelope.book)
}

pub fn book_dir(root: &Path, id: &BookId) -> PathBuf {
    root.join(id.as_str())
}

pub fn read_record(book_dir: &Path) -> Result<StoredRecord, RecordError> {
    let bytes = fs::read(book_dir.join(RECORD_FILE))?;
    let record = decode(&bytes)?;
    Ok(StoredRecord {
        record,
        digest: sha256_hex(&bytes),
    })
}

/// Hidden directory inside the books root where one ingestion is assembled.
/// Removed on drop unless [`Staging::commit`] succeeded.
#[derive(Debug)]
pub struct Staging {
    root: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl Staging {
    pub fn create(root: &Path) -> Result<Self, RecordError> {
        fs::create_dir_all(root)?;
        let path = root.join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()));
        fs::create_dir(&path)?;
        Ok(Self {
            root: root.to_path_buf(),
            path,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn images_dir(&self) -> PathBuf {
        self.path.join(IMAGES_DIR)
    }

    pub fn write_record(&self, record: &BookRecord) -> Result<(), RecordError> {
        fs::write(self.path.join(RECORD_FILE), encode(record)?)?;
        Ok(())
    }

    /// Move the staged book to `{root}/{id}`, replacing any previous version.
    pub fn commit(mut self, id: &BookId) -> Result<PathBuf, RecordError> {
        let target = book_dir(&self.root, id);
        if target.exists() {
            let trash = self.root.join(trash_name(id));
            fs::rename(&target, &trash)?;
            if let Err(e) = fs::rename(&self.path, &target) {
                return Err(restore_previous(&trash, &target, e));
            }
            if let Err(e) = fs::remove_dir_all(&trash) {
                tracing::warn!("Could not remove replaced book {}: {}", trash.display(), e);
            }
        } else {
            fs::rename(&self.path, &target)?;
        }
        self.committed = true;
        Ok(target)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!("Could not remove staging dir {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Put a displaced book back after a failed commit. When that fails too the
/// book stays in its trash directory and [`recover_interrupted`] restores it
/// on the next open.
fn restore_previous(trash: &Path, target: &Path, commit: io::Error) -> RecordError {
    match fs::rename(trash, target) {
        Ok(()) => RecordError::Io(commit),
        Err(restore) => {
            tracing::error!(
                "Could not restore {} from {}: {}",
                target.display(),
                trash.display(),
                restore
            );
            RecordError::Restore {
                target: target.display().to_string(),
                trash: trash.display().to_string(),
                commit,
                restore,
            }
        }
    }
}

fn trash_name(id: &BookId) -> String {
    format!("{TRASH_PREFIX}{}-{id}", uuid::Uuid::new_v4())
}

/// Id of the book a trash directory was moved away from.
fn trashed_id(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(TRASH_PREFIX)?;
    if rest.as_bytes().get(UUID_LEN) != Some(&b'-') {
        return None;
    }
    rest.get(UUID_LEN + 1..).filter(|id| !id.is_empty())
}

/// True for directory names the books root uses internally.
pub fn is_internal_dir(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX)
}

/// Clear what interrupted ingestions left under `root`. Staging directories
/// are removed. A replaced book whose replacement never landed is moved back
/// into place; other trash is removed.
pub fn recover_interrupted(root: &Path) -> io::Result<()> {
    for entry in fs::read_dir(root)?.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_internal_dir(&name) {
            continue;
        }

        let orphan = trashed_id(&name)
            .and_then(|id| validate_book_id(id, root).ok())
            .filter(|id| !book_dir(root, id).exists());
        if let Some(id) = orphan {
            match fs::rename(entry.path(), book_dir(root, &id)) {
                Ok(()) => tracing::warn!("Restored {} from interrupted replacement", id),
                Err(e) => tracing::error!("Could not restore {} from {}: {}", id, name, e),
            }
            continue;
        }

        tracing::warn!("Removing leftover {}", name);
        if let Err(e) = fs::remove_dir_all(entry.path()) {
            tracing::warn!("Could not remove {}: {}", name, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BookMetadata, Chapter};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn sample() -> BookRecord {
        let mut attachments = BTreeMap::new();
        attachments.insert("progress".to_string(), serde_json::json!({"chapter": 3}));
        BookRecord {
            id: BookId::derive("sample.epub"),
            metadata: BookMetadata::default(),
            chapters: vec![Chapter {
                index: 0,
                id: "c1".into(),
                href: "OEBPS/c1.xhtml".into(),
                title: "One".into(),
                html: "<p>One</p>".into(),
                text: "One".into(),
            }],
            toc: Vec::new(),
            images: Vec::new(),
            source_file: "sample.epub".into(),
            processed_at: 1_700_000_000,
            attachments,
        }
    }

    #[test]
    fn envelope_preserves_record_and_attachments() {
        let record = sample();
        let bytes = encode(&record).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"format_version\": 1"));
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn version_mismatch_is_incompatible_not_corrupt() {
        let err = decode(br#"{"format_version": 7, "book": {"whatever": true}}"#).unwrap_err();
        assert!(matches!(err, RecordError::IncompatibleFormat { found: 7, expected: 1 }));

        let err = decode(br#"{"book": {}}"#).unwrap_err();
        assert!(matches!(err, RecordError::IncompatibleFormat { found: 0, .. }));

        let err = decode(br#"{"format_version": 1, "book": {"id": 5}}"#).unwrap_err();
        assert!(matches!(err, RecordError::Corrupt(_)));

        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, RecordError::Corrupt(_)));
    }

    #[test]
    fn dropped_staging_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        {
            let staging = Staging::create(root.path()).unwrap();
            fs::create_dir_all(staging.images_dir()).unwrap();
            staging.write_record(&sample()).unwrap();
        }
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_commit_puts_previous_version_back() {
        let root = tempfile::tempdir().unwrap();
        let id = BookId::derive("sample.epub");
        let target = book_dir(root.path(), &id);
        let trash = root.path().join(trash_name(&id));
        fs::create_dir(&trash).unwrap();

        let err = restore_previous(&trash, &target, io::Error::other("cross-device"));
        assert!(matches!(err, RecordError::Io(_)));
        assert!(target.is_dir());
        assert!(!trash.exists());
    }

    #[test]
    fn failed_restore_reports_both_errors() {
        let root = tempfile::tempdir().unwrap();
        let id = BookId::derive("sample.epub");
        let trash = root.path().join(trash_name(&id));

        let err = restore_previous(&trash, &book_dir(root.path(), &id), io::Error::other("cross-device"));
        match err {
            RecordError::Restore { commit, trash: t, .. } => {
                assert_eq!(commit.to_string(), "cross-device");
                assert_eq!(t, trash.display().to_string());
            }
            other => panic!("expected Restore, got {other:?}"),
        }
    }

    #[test]
    fn orphaned_trash_is_restored_and_the_rest_removed() {
        let root = tempfile::tempdir().unwrap();
        let kept = BookId::derive("kept.epub");
        let replaced = BookId::derive("replaced.epub");

        let orphan = root.path().join(trash_name(&kept));
        fs::create_dir(&orphan).unwrap();
        fs::write(orphan.join(RECORD_FILE), b"{}").unwrap();
        fs::create_dir(book_dir(root.path(), &replaced)).unwrap();
        fs::create_dir(root.path().join(trash_name(&replaced))).unwrap();
        fs::create_dir(root.path().join(".staging-abc")).unwrap();
        fs::create_dir(root.path().join(".trash-garbage")).unwrap();

        recover_interrupted(root.path()).unwrap();

        let mut names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["kept_data".to_string(), "replaced_data".to_string()]);
        assert!(book_dir(root.path(), &kept).join(RECORD_FILE).is_file());
    }

    #[test]
    fn trashed_id_parsing() {
        let id = BookId::derive("Vol_2.epub");
        assert_eq!(trashed_id(&trash_name(&id)), Some("Vol_2_data"));
        assert_eq!(trashed_id(".trash-5678"), None);
        assert_eq!(trashed_id(".staging-x"), None);
    }

    #[test]
    fn commit_replaces_previous_version() {
        let root = tempfile::tempdir().unwrap();
        let id = BookId::derive("sample.epub");

        let first = Staging::create(root.path()).unwrap();
        fs::write(first.path().join("stale.txt"), b"old").unwrap();
        first.write_record(&sample()).unwrap();
        first.commit(&id).unwrap();

        let second = Staging::create(root.path()).unwrap();
        let mut record = sample();
        record.metadata.title = "Second".into();
        second.write_record(&record).unwrap();
        let dir = second.commit(&id).unwrap();

        assert!(!dir.join("stale.txt").exists());
        assert_eq!(read_record(&dir).unwrap().record.metadata.title, "Second");
        let names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["sample_data".to_string()]);
    }
}
