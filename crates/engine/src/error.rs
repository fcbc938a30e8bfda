//! Engine error type.
//!
//! Every operation of the engine returns [`EngineError`]. The host turns it
//! into a response with [`EngineError::to_error_message`].

use std::io;

use protocol::{ErrorCode, ErrorMessage};
use thiserror::Error;

/// Errors produced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A path segment decoded to `.` or `..`, or carried an encoded traversal.
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    /// Too many path segments.
    #[error("path too deep: {depth} segments exceeds limit of {max}")]
    PathTooDeep { depth: usize, max: usize },

    /// Canonical path escaped the storage root.
    #[error("path is outside the storage root: {0}")]
    PathOutsideRoot(String),

    /// Name is empty, `.`, `..`, or missing where one is required.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Target file or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A file or directory already exists at the creation target.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Rename destination is occupied.
    #[error("destination already exists: {0}")]
    Conflict(String),

    /// Deleting the storage root is never allowed.
    #[error("refusing to delete the storage root")]
    RefusedRootDelete,

    /// Too many files requested for a bulk archive.
    #[error("too many files selected: {count} exceeds limit of {max}")]
    TooManyFiles { count: usize, max: usize },

    /// Requested page is outside the listing.
    #[error("page {page} is out of range (1..={total_pages})")]
    InvalidPage { page: usize, total_pages: usize },

    /// Malformed or incomplete request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upload larger than the configured limit.
    #[error("file too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// Extension rejected by upload policy.
    #[error("file extension not allowed: {0}")]
    BlockedExtension(String),

    /// Content does not match the declared file type.
    #[error("file content does not match its type: {0}")]
    InvalidContent(String),

    /// Content type missing from the upload allowlist.
    #[error("file type not allowed: {0}")]
    UnsupportedType(String),

    /// Zip writer failure.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Underlying storage failure.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Wrap an I/O failure on `path`.
    pub fn storage(path: impl Into<String>, source: io::Error) -> Self {
        EngineError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Wrap an I/O failure on `path`, reporting a vanished target as `NotFound`.
    ///
    /// Concurrent mutations race at the storage layer; the loser sees the
    /// target gone and gets `NotFound` rather than a storage failure.
    pub fn from_io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            EngineError::NotFound(path)
        } else {
            EngineError::storage(path, source)
        }
    }

    /// Whether this error reports an attempt to leave the storage root.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            EngineError::PathTraversal(_) | EngineError::PathOutsideRoot(_)
        )
    }

    /// Whether this error is recorded as an audit violation.
    pub fn is_audited(&self) -> bool {
        self.is_security() || matches!(self, EngineError::PathTooDeep { .. })
    }

    /// Protocol error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::PathTraversal(_) => ErrorCode::PathTraversal,
            EngineError::PathTooDeep { .. } => ErrorCode::PathTooDeep,
            EngineError::PathOutsideRoot(_) => ErrorCode::PathOutsideRoot,
            EngineError::InvalidName(_) => ErrorCode::InvalidName,
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            EngineError::Conflict(_) => ErrorCode::Conflict,
            EngineError::RefusedRootDelete => ErrorCode::RefusedRootDelete,
            EngineError::TooManyFiles { .. } => ErrorCode::TooManyFiles,
            EngineError::InvalidPage { .. } => ErrorCode::InvalidPage,
            EngineError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            EngineError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            EngineError::BlockedExtension(_) => ErrorCode::BlockedExtension,
            EngineError::InvalidContent(_) => ErrorCode::InvalidContent,
            EngineError::UnsupportedType(_) => ErrorCode::UnsupportedType,
            EngineError::Archive(_) | EngineError::Storage { .. } => ErrorCode::StorageError,
        }
    }

    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let recoverable = matches!(
            self,
            EngineError::Archive(_) | EngineError::Storage { .. } | EngineError::Conflict(_)
        );

        ErrorMessage {
            code: self.code(),
            message: self.to_string(),
            context,
            recoverable,
        }
    }
}
