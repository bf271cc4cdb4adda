/// Top-level error type. All public `Library` operations return this.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Malformed archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Invalid asset: {0}")]
    Asset(#[from] AssetError),

    #[error("Book record error: {0}")]
    Record(#[from] RecordError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("Chapter {index} not found in {id} ({count} chapters)")]
    ChapterNotFound { id: String, index: usize, count: usize },

    #[error("Image {name} not found in {id}")]
    ImageNotFound { id: String, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outward classification of an error, stable across releases so that an
/// HTTP layer can pick a response code without matching on internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    InvalidRequest,
    PathTraversal,
    NotFound,
    MalformedInput,
    IncompatibleFormat,
    Internal,
}

impl ErrorStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorStatus::InvalidRequest => "invalid_request",
            ErrorStatus::PathTraversal => "path_traversal",
            ErrorStatus::NotFound => "not_found",
            ErrorStatus::MalformedInput => "malformed_input",
            ErrorStatus::IncompatibleFormat => "incompatible_format",
            ErrorStatus::Internal => "internal",
        }
    }
}

impl LibraryError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            LibraryError::Validation(ValidationError::PathTraversal { .. }) => {
                ErrorStatus::PathTraversal
            }
            LibraryError::Validation(_) => ErrorStatus::InvalidRequest,
            LibraryError::Archive(ArchiveError::Io(_)) => ErrorStatus::Internal,
            LibraryError::Archive(_) => ErrorStatus::MalformedInput,
            LibraryError::Asset(AssetError::InvalidSignature { .. })
            | LibraryError::Asset(AssetError::SignatureMismatch { .. }) => ErrorStatus::MalformedInput,
            LibraryError::Asset(AssetError::Io(_)) => ErrorStatus::Internal,
            LibraryError::Record(RecordError::IncompatibleFormat { .. })
            | LibraryError::Load(LoadError::IncompatibleFormat { .. }) => {
                ErrorStatus::IncompatibleFormat
            }
            LibraryError::Load(LoadError::NotFound(_))
            | LibraryError::BookNotFound(_)
            | LibraryError::ChapterNotFound { .. }
            | LibraryError::ImageNotFound { .. } => ErrorStatus::NotFound,
            LibraryError::Record(_) | LibraryError::Load(_) | LibraryError::Io(_) => {
                ErrorStatus::Internal
            }
        }
    }
}

/// Rejection of an externally supplied identifier, index, or file name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid book identifier {id:?}: {reason}")]
    InvalidBookId { id: String, reason: &'static str },

    #[error("Path traversal attempt: {value:?}")]
    PathTraversal { value: String },

    #[error("Invalid chapter index {value:?} (allowed 0..={max})")]
    InvalidIndex { value: String, max: usize },

    #[error("Invalid image name {name:?}: {reason}")]
    InvalidImageName { name: String, reason: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("ZIP bomb detected: decompression ratio {ratio}:1 exceeds limit {limit}:1")]
    ZipBomb { ratio: u64, limit: u64 },

    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Resource {name} is {size_mb}MB, exceeding limit of {limit_mb}MB")]
    OversizedResource {
        name: String,
        size_mb: u64,
        limit_mb: u64,
    },

    #[error("DRM protected file ({drm_type})")]
    DrmProtected { drm_type: String },
}

/// The archive could not be turned into a book (MalformedArchiveError).
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive is {size} bytes, exceeding limit of {limit} bytes")]
    Oversized { size: u64, limit: u64 },

    #[error("Invalid ZIP container: {0}")]
    InvalidZip(String),

    #[error("Missing required content: {0}")]
    MissingContent(String),

    #[error("Malformed {part}: {detail}")]
    Malformed { part: String, detail: String },

    #[error("Manifest entry rejected: {0}")]
    FatalEntry(String),

    #[error("No readable chapters in archive")]
    NoChapters,

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single image could not be stored (InvalidAssetError).
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("{name}: declared {declared} but content is not a recognized image")]
    InvalidSignature { name: String, declared: String },

    #[error("{name}: declared {declared} but content is {detected}")]
    SignatureMismatch {
        name: String,
        declared: String,
        detected: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Unsupported book record version {found} (expected {expected})")]
    IncompatibleFormat { found: u32, expected: u32 },

    #[error("Corrupt book record: {0}")]
    Corrupt(String),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Commit to {target} failed ({commit}); previous version left in {trash} ({restore})")]
    Restore {
        target: String,
        trash: String,
        commit: std::io::Error,
        restore: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of a cache load. Cloneable so every caller waiting on the same
/// load observes the same failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Book not found: {0}")]
    NotFound(String),

    #[error("Book {id} uses record version {found} (expected {expected})")]
    IncompatibleFormat { id: String, found: u32, expected: u32 },

    #[error("Book {id} has a corrupt record: {detail}")]
    Corrupt { id: String, detail: String },

    #[error("Reading {id} failed: {detail}")]
    Io { id: String, detail: String },

    #[error("Load of {0} was aborted")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config file {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("Config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
