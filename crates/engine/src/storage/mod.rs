//! Byte storage behind the engine.
//!
//! [`StorageGateway`] is the capability the engine operates through. Every
//! primitive takes a [`ConfinedPath`], so nothing that has not passed the
//! resolver can reach storage. Listing primitives return root-relative,
//! forward-slash separated paths.

mod local;

use std::io;
use std::path::PathBuf;

use crate::path::ConfinedPath;

pub use local::LocalStorage;

/// Storage primitives used by the engine.
pub trait StorageGateway: Send + Sync {
    /// Whether a regular file exists at `path`.
    fn exists(&self, path: &ConfinedPath) -> bool;

    /// Whether a directory exists at `path`.
    fn directory_exists(&self, path: &ConfinedPath) -> bool;

    /// Files directly inside `dir`.
    fn list_files(&self, dir: &ConfinedPath) -> io::Result<Vec<String>>;

    /// Directories directly inside `dir`.
    fn list_directories(&self, dir: &ConfinedPath) -> io::Result<Vec<String>>;

    /// Every file below `dir`, recursively.
    fn all_files(&self, dir: &ConfinedPath) -> io::Result<Vec<String>>;

    /// Every directory below `dir`, recursively, parents before children.
    fn all_directories(&self, dir: &ConfinedPath) -> io::Result<Vec<String>>;

    /// Size of a file in bytes.
    fn size(&self, path: &ConfinedPath) -> io::Result<u64>;

    /// Read a whole file.
    fn read(&self, path: &ConfinedPath) -> io::Result<Vec<u8>>;

    /// Create or replace a file.
    fn write(&self, path: &ConfinedPath, contents: &[u8]) -> io::Result<()>;

    /// Create a directory and any missing parents.
    fn make_directory(&self, path: &ConfinedPath) -> io::Result<()>;

    /// Move a file. The destination's parent must exist.
    fn move_file(&self, from: &ConfinedPath, to: &ConfinedPath) -> io::Result<()>;

    /// Delete a file.
    fn delete(&self, path: &ConfinedPath) -> io::Result<()>;

    /// Delete a directory and everything below it.
    fn delete_directory(&self, path: &ConfinedPath) -> io::Result<()>;

    /// Delete a directory that must already be empty.
    fn delete_empty_directory(&self, path: &ConfinedPath) -> io::Result<()>;

    /// Local filesystem path for streaming, when storage is on local disk.
    fn absolute_local_path(&self, _path: &ConfinedPath) -> Option<PathBuf> {
        None
    }
}
