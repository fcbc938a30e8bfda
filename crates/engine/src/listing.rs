//! Directory listing with server-side pagination.

use std::cmp::Ordering;
use std::sync::Arc;

use protocol::{Entry, EntryKind, Listing, Pagination};
use tracing::{debug, warn};

use crate::audit::Actor;
use crate::cache::ListingCache;
use crate::error::{EngineError, Result};
use crate::path::{file_name, public_path, ConfinedPath, PathResolver};
use crate::storage::StorageGateway;

/// Advisory error carried by a listing that degraded to empty.
pub const UNREADABLE_DIRECTORY: &str = "Unable to read directory";

/// Lists directories through the cache.
pub struct DirectoryLister {
    resolver: Arc<PathResolver>,
    storage: Arc<dyn StorageGateway>,
    cache: Arc<ListingCache>,
    public_prefix: String,
    per_page: usize,
}

impl DirectoryLister {
    pub fn new(
        resolver: Arc<PathResolver>,
        storage: Arc<dyn StorageGateway>,
        cache: Arc<ListingCache>,
        public_prefix: impl Into<String>,
        per_page: usize,
    ) -> Self {
        Self {
            resolver,
            storage,
            cache,
            public_prefix: public_prefix.into(),
            per_page: per_page.max(1),
        }
    }

    /// List one page of a directory.
    ///
    /// Directories come before files, each in case-insensitive natural
    /// order. A missing or unreadable directory yields an empty listing with
    /// [`UNREADABLE_DIRECTORY`] set; security rejections are returned as
    /// errors.
    pub fn list(&self, path: Option<&str>, page: usize, actor: &Actor) -> Result<Listing> {
        // Path rejections take precedence over page validation.
        let target = match self.resolver.resolve(path, true, actor) {
            Ok(target) => Some(target),
            Err(EngineError::NotFound(missing)) => {
                debug!(path = %missing, "Listing target not found");
                None
            }
            Err(e) => return Err(e),
        };

        if page == 0 {
            return Err(EngineError::InvalidPage {
                page,
                total_pages: 1,
            });
        }

        let Some(target) = target else {
            let relative = self.resolver.normalize(path)?;
            return Ok(Listing::degraded(relative, self.per_page, UNREADABLE_DIRECTORY));
        };

        if let Some(cached) = self.cache.get(target.relative(), page) {
            return Ok(cached);
        }

        let (mut directories, mut files) = match self.read_children(&target) {
            Ok(children) => children,
            Err(e) => {
                warn!(path = %target.relative(), error = %e, "Failed to read directory");
                return Ok(Listing::degraded(
                    target.relative(),
                    self.per_page,
                    UNREADABLE_DIRECTORY,
                ));
            }
        };

        directories.sort_by(|a, b| natural_cmp(file_name(a), file_name(b)));
        files.sort_by(|a, b| natural_cmp(file_name(a), file_name(b)));

        let dir_count = directories.len();
        let total = dir_count + files.len();
        let pagination = Pagination::new(page, self.per_page, total);
        if !pagination.contains_page(page) {
            return Err(EngineError::InvalidPage {
                page,
                total_pages: pagination.total_pages,
            });
        }

        let (start, end) = pagination.bounds();
        let dir_slice = &directories[start.min(dir_count)..end.min(dir_count)];
        let file_slice = &files[start.saturating_sub(dir_count).min(files.len())
            ..end.saturating_sub(dir_count).min(files.len())];

        let listing = Listing {
            path: target.relative().to_string(),
            directories: dir_slice.iter().map(|d| self.directory_entry(d)).collect(),
            files: file_slice.iter().map(|f| self.file_entry(f)).collect(),
            pagination,
            error: None,
        };

        self.cache.put(target.relative(), page, &listing);
        Ok(listing)
    }

    fn read_children(&self, dir: &ConfinedPath) -> std::io::Result<(Vec<String>, Vec<String>)> {
        if !self.storage.directory_exists(dir) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "not a directory",
            ));
        }
        let directories = self.storage.list_directories(dir)?;
        let files = self.storage.list_files(dir)?;
        Ok((directories, files))
    }

    /// Entry for a directory at `relative`.
    pub fn directory_entry(&self, relative: &str) -> Entry {
        Entry {
            name: file_name(relative).to_string(),
            relative_path: relative.to_string(),
            disk_path: relative.to_string(),
            public_path: public_path(&self.public_prefix, relative),
            size: None,
            kind: EntryKind::Directory,
        }
    }

    /// Entry for a file at `relative`, sized through storage.
    pub fn file_entry(&self, relative: &str) -> Entry {
        let confined = self.resolver.confine_listed(relative);
        let size = match self.storage.size(&confined) {
            Ok(size) => size,
            Err(e) => {
                debug!(path = %relative, error = %e, "Failed to read file size");
                0
            }
        };

        Entry {
            name: file_name(relative).to_string(),
            relative_path: relative.to_string(),
            disk_path: relative.to_string(),
            public_path: public_path(&self.public_prefix, relative),
            size: Some(size),
            kind: EntryKind::File,
        }
    }
}

/// Case-insensitive natural ordering: digit runs compare by value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_digits(&mut left);
                let rn = take_digits(&mut right);
                let ordering = compare_digit_runs(&ln, &rn);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l.to_lowercase().cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }

    // Equal ignoring case and leading zeros: fall back to a stable tie-break.
    a.cmp(b)
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
