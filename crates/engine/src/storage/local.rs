//! Local directory storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::StorageGateway;
use crate::path::{join_relative, ConfinedPath};

/// [`StorageGateway`] over a directory on the local filesystem.
///
/// Symlinks are neither listed nor followed during recursion.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, path: &ConfinedPath) -> PathBuf {
        if path.is_root() {
            self.root.clone()
        } else {
            self.root.join(path.relative())
        }
    }

    /// Root-relative form of a path found while walking.
    fn relative_of(&self, path: &Path) -> Option<String> {
        let stripped = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in stripped.components() {
            segments.push(component.as_os_str().to_str()?.to_string());
        }
        Some(segments.join("/"))
    }

    fn children(&self, dir: &ConfinedPath, want_dirs: bool) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.full(dir))? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let wanted = if want_dirs {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if !wanted {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(join_relative(dir.relative(), &name)),
                Err(raw) => debug!(name = ?raw, "Skipping entry with non UTF-8 name"),
            }
        }
        Ok(names)
    }

    fn walk(&self, dir: &ConfinedPath, want_dirs: bool) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        for entry in WalkDir::new(self.full(dir)).min_depth(1).follow_links(false) {
            let entry = entry.map_err(io::Error::from)?;
            let file_type = entry.file_type();
            let wanted = if want_dirs {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if !wanted {
                continue;
            }
            match self.relative_of(entry.path()) {
                Some(relative) => found.push(relative),
                None => debug!(path = ?entry.path(), "Skipping entry with non UTF-8 path"),
            }
        }
        Ok(found)
    }
}

impl StorageGateway for LocalStorage {
    fn exists(&self, path: &ConfinedPath) -> bool {
        self.full(path).is_file()
    }

    fn directory_exists(&self, path: &ConfinedPath) -> bool {
        self.full(path).is_dir()
    }

    fn list_files(&self, dir: &ConfinedPath) -> io::Result<Vec<String>> {
        self.children(dir, false)
    }

    fn list_directories(&self, dir: &ConfinedPath) -> io::Result<Vec<String>> {
        self.children(dir, true)
    }

    fn all_files(&self, dir: &ConfinedPath) -> io::Result<Vec<String>> {
        self.walk(dir, false)
    }

    fn all_directories(&self, dir: &ConfinedPath) -> io::Result<Vec<String>> {
        self.walk(dir, true)
    }

    fn size(&self, path: &ConfinedPath) -> io::Result<u64> {
        Ok(fs::metadata(self.full(path))?.len())
    }

    fn read(&self, path: &ConfinedPath) -> io::Result<Vec<u8>> {
        fs::read(self.full(path))
    }

    fn write(&self, path: &ConfinedPath, contents: &[u8]) -> io::Result<()> {
        fs::write(self.full(path), contents)
    }

    fn make_directory(&self, path: &ConfinedPath) -> io::Result<()> {
        fs::create_dir_all(self.full(path))
    }

    fn move_file(&self, from: &ConfinedPath, to: &ConfinedPath) -> io::Result<()> {
        fs::rename(self.full(from), self.full(to))
    }

    fn delete(&self, path: &ConfinedPath) -> io::Result<()> {
        fs::remove_file(self.full(path))
    }

    fn delete_directory(&self, path: &ConfinedPath) -> io::Result<()> {
        fs::remove_dir_all(self.full(path))
    }

    fn delete_empty_directory(&self, path: &ConfinedPath) -> io::Result<()> {
        fs::remove_dir(self.full(path))
    }

    fn absolute_local_path(&self, path: &ConfinedPath) -> Option<PathBuf> {
        Some(self.full(path))
    }
}
