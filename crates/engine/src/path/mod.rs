//! Path confinement and name cleaning.
//!
//! Untrusted relative paths enter the engine through [`PathResolver`], which
//! is the only producer of [`ConfinedPath`] values. Storage primitives accept
//! nothing else.

pub mod resolver;
pub mod sanitize;

use std::path::{Path, PathBuf};

pub use resolver::{normalize, PathResolver};
pub use sanitize::{collision_candidate, split_extension, NameSanitizer};

/// A path proven to lie under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfinedPath {
    relative: String,
    absolute: PathBuf,
}

impl ConfinedPath {
    pub(crate) fn new(relative: String, absolute: PathBuf) -> Self {
        Self { relative, absolute }
    }

    /// Root-relative, forward-slash separated form. Empty for the root.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Absolute path under the canonical root.
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Whether this is the storage root itself.
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Last segment, empty for the root.
    pub fn name(&self) -> &str {
        file_name(&self.relative)
    }

    /// Relative path of the containing directory.
    pub fn parent_relative(&self) -> &str {
        parent_of(&self.relative)
    }
}

/// Parent of a relative path; `""` for top-level entries and the root.
pub fn parent_of(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(idx) => &relative[..idx],
        None => "",
    }
}

/// Last segment of a relative path.
pub fn file_name(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(idx) => &relative[idx + 1..],
        None => relative,
    }
}

/// Join a relative directory and a child name.
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Public path for a relative path under `prefix`.
pub fn public_path(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Human-readable form of a relative path in error messages.
pub(crate) fn display_path(relative: &str) -> String {
    if relative.is_empty() {
        "/".to_string()
    } else {
        relative.to_string()
    }
}
