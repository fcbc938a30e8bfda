//! Boundary payloads for SFiles.
//!
//! These are the shapes the engine hands back to its caller. The host
//! application serializes them (JSON by default) into HTTP responses; the
//! engine itself never speaks HTTP.

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Entries
// ============================================================================

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// A file or directory as surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Basename.
    pub name: String,
    /// Root-relative, forward-slash separated path used by clients.
    pub relative_path: String,
    /// Root-confined storage path used for operations.
    pub disk_path: String,
    /// Public prefix joined with the relative path, for building URLs.
    pub public_path: String,
    /// Size in bytes. Directories carry no size.
    pub size: Option<u64>,
    /// Entry kind.
    pub kind: EntryKind,
}

impl Entry {
    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

// ============================================================================
// Listing
// ============================================================================

/// Server-side pagination window for a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Current page, 1-based.
    pub page: usize,
    /// Entries per page.
    pub per_page: usize,
    /// Total number of entries (directories and files) under the path.
    pub total: usize,
    /// Number of pages. An empty listing still has one page.
    pub total_pages: usize,
}

impl Pagination {
    /// Compute the window for `total` entries.
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total.div_ceil(per_page).max(1);
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }

    /// Whether `page` addresses an existing page.
    pub fn contains_page(&self, page: usize) -> bool {
        page >= 1 && page <= self.total_pages
    }

    /// Half-open index range `[start, end)` of the current page, clamped to `total`.
    pub fn bounds(&self) -> (usize, usize) {
        let start = self.page.saturating_sub(1).saturating_mul(self.per_page);
        let end = start.saturating_add(self.per_page);
        (start.min(self.total), end.min(self.total))
    }
}

/// Result of listing a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// The normalized relative path that was listed.
    pub path: String,
    /// Directories on this page.
    pub directories: Vec<Entry>,
    /// Files on this page.
    pub files: Vec<Entry>,
    /// Pagination window.
    pub pagination: Pagination,
    /// Advisory error when the directory could not be read and the listing
    /// degraded to empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Listing {
    /// An empty first page carrying an advisory error.
    pub fn degraded(path: impl Into<String>, per_page: usize, error: &str) -> Self {
        Self {
            path: path.into(),
            directories: Vec::new(),
            files: Vec::new(),
            pagination: Pagination::new(1, per_page, 0),
            error: Some(error.to_string()),
        }
    }

    /// Whether the listing degraded because of a read failure.
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// What a rename targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenameKind {
    /// Rename a file.
    #[serde(rename = "file")]
    File,
    /// Rename (move) a directory.
    #[serde(rename = "dir")]
    Directory,
}

/// Result of a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOutcome {
    /// Relative path before the rename.
    pub old_path: String,
    /// Relative path after the rename.
    pub new_path: String,
    /// Public path of the renamed file; `None` for directories.
    pub public_path: Option<String>,
}

impl RenameOutcome {
    /// Whether the rename left the path unchanged.
    pub fn is_noop(&self) -> bool {
        self.old_path == self.new_path
    }
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Final file name after sanitizing and collision avoidance.
    pub filename: String,
    /// Relative path of the stored file.
    pub relative_path: String,
    /// Public path of the stored file.
    pub public_path: String,
    /// Stored size in bytes.
    pub size: u64,
}

/// Metadata for a built archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Suggested download name.
    pub file_name: String,
    /// Size of the finished zip in bytes.
    pub size: u64,
    /// Number of file entries written.
    pub entries: usize,
}

impl ArchiveInfo {
    /// Content type for archive downloads.
    pub const CONTENT_TYPE: &'static str = "application/zip";
}

// ============================================================================
// Errors
// ============================================================================

/// Error codes for programmatic handling at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A segment resolved to `.`/`..` or an encoded equivalent.
    PathTraversal,
    /// Path exceeds the configured depth.
    PathTooDeep,
    /// Canonical path escaped the storage root.
    PathOutsideRoot,
    /// Name empty, `.`, `..` or otherwise unusable.
    InvalidName,
    /// Target file or directory absent.
    NotFound,
    /// Creation target already exists.
    AlreadyExists,
    /// Rename target occupied.
    Conflict,
    /// Attempt to delete the storage root.
    RefusedRootDelete,
    /// Bulk archive over the file limit.
    TooManyFiles,
    /// Page outside the listing.
    InvalidPage,
    /// Malformed or incomplete request.
    InvalidRequest,
    /// Upload above the size limit.
    FileTooLarge,
    /// Extension not allowed.
    BlockedExtension,
    /// File content does not match its declared type.
    InvalidContent,
    /// Content type not allowed.
    UnsupportedType,
    /// Underlying storage failure.
    StorageError,
}

impl ErrorCode {
    /// Suggested HTTP status for the host application.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::FileTooLarge => 413,
            ErrorCode::UnsupportedType => 415,
            ErrorCode::StorageError => 500,
            _ => 422,
        }
    }
}

/// Error payload handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional context (e.g. the offending path).
    pub context: Option<String>,
    /// Whether retrying the same request can succeed.
    pub recoverable: bool,
}

// ============================================================================
// Serialization helpers
// ============================================================================

/// Serialize a payload to JSON.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Serialize a payload to pretty-printed JSON.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Deserialize a payload from JSON.
pub fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}
