//! Mutating operations: folders, deletes, renames and uploads.
//!
//! Every operation resolves its input through the [`PathResolver`], acts
//! through the [`StorageGateway`], invalidates the affected cache entries on
//! success and records an audit event.

use std::sync::Arc;

use protocol::{Entry, EntryKind, RenameKind, RenameOutcome, UploadOutcome};
use tracing::{debug, info};

use crate::audit::{Actor, AuditOutcome, AuditRecord, AuditSink};
use crate::cache::ListingCache;
use crate::config::UploadConfig;
use crate::error::{EngineError, Result};
use crate::path::{
    collision_candidate, join_relative, public_path, split_extension, ConfinedPath,
    NameSanitizer, PathResolver,
};
use crate::storage::StorageGateway;

/// Signature of OLE2 compound documents (legacy Office formats).
const OLE2_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Generic type reported for content nothing recognizes.
const OCTET_STREAM: &str = "application/octet-stream";

/// Upper bound on `name (n).ext` attempts before giving up.
const MAX_COLLISION_ATTEMPTS: usize = 10_000;

/// Executes mutations against storage.
pub struct MutationEngine {
    resolver: Arc<PathResolver>,
    storage: Arc<dyn StorageGateway>,
    cache: Arc<ListingCache>,
    audit: Arc<dyn AuditSink>,
    sanitizer: NameSanitizer,
    upload: UploadConfig,
    public_prefix: String,
}

impl MutationEngine {
    pub fn new(
        resolver: Arc<PathResolver>,
        storage: Arc<dyn StorageGateway>,
        cache: Arc<ListingCache>,
        audit: Arc<dyn AuditSink>,
        sanitizer: NameSanitizer,
        upload: UploadConfig,
        public_prefix: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            storage,
            cache,
            audit,
            sanitizer,
            upload,
            public_prefix: public_prefix.into(),
        }
    }

    /// Create a directory. The leaf name is sanitized; the parent must exist.
    pub fn create_folder(&self, path: Option<&str>, actor: &Actor) -> Result<Entry> {
        let requested = self.resolver.resolve(path, false, actor)?;
        if requested.is_root() {
            return Err(EngineError::InvalidName("folder path is empty".to_string()));
        }

        let name = self.sanitizer.sanitize_checked(requested.name())?;
        let relative = join_relative(requested.parent_relative(), &name);
        let target = self.resolver.resolve_derived(&relative, false, actor)?;

        if self.occupied(&target) {
            return Err(EngineError::AlreadyExists(target.relative().to_string()));
        }

        self.storage
            .make_directory(&target)
            .map_err(|e| EngineError::storage(target.relative(), e))?;

        self.cache.invalidate_directory(target.parent_relative());
        info!(path = %target.relative(), "Folder created");
        self.audit.record(
            AuditRecord::new(actor, "create_folder", AuditOutcome::Success)
                .detail("path", target.relative()),
        );

        Ok(Entry {
            name: target.name().to_string(),
            relative_path: target.relative().to_string(),
            disk_path: target.relative().to_string(),
            public_path: public_path(&self.public_prefix, target.relative()),
            size: None,
            kind: EntryKind::Directory,
        })
    }

    /// Recursively delete a directory. The root can never be deleted.
    pub fn delete_folder(&self, path: Option<&str>, actor: &Actor) -> Result<()> {
        if matches!(self.resolver.normalize(path), Ok(ref relative) if relative.is_empty()) {
            return Err(EngineError::RefusedRootDelete);
        }

        let target = self.resolver.resolve(path, true, actor)?;
        if target.is_root() {
            return Err(EngineError::RefusedRootDelete);
        }
        if !self.storage.directory_exists(&target) {
            return Err(EngineError::NotFound(target.relative().to_string()));
        }

        self.storage
            .delete_directory(&target)
            .map_err(|e| EngineError::from_io(target.relative(), e))?;

        self.cache.invalidate_directory(target.parent_relative());
        self.cache.invalidate_subtree(target.relative());
        info!(path = %target.relative(), "Folder deleted");
        self.audit.record(
            AuditRecord::new(actor, "delete_folder", AuditOutcome::Success)
                .detail("path", target.relative()),
        );
        Ok(())
    }

    /// Delete a single file.
    pub fn delete_file(&self, path: Option<&str>, actor: &Actor) -> Result<()> {
        if matches!(self.resolver.normalize(path), Ok(ref relative) if relative.is_empty()) {
            return Err(EngineError::NotFound("/".to_string()));
        }

        let target = self.resolver.resolve(path, true, actor)?;
        if !self.storage.exists(&target) {
            return Err(EngineError::NotFound(target.relative().to_string()));
        }

        self.storage
            .delete(&target)
            .map_err(|e| EngineError::from_io(target.relative(), e))?;

        self.cache.invalidate_directory(target.parent_relative());
        info!(path = %target.relative(), "File deleted");
        self.audit.record(
            AuditRecord::new(actor, "delete_file", AuditOutcome::Success)
                .detail("path", target.relative()),
        );
        Ok(())
    }

    /// Rename a file or directory within its parent.
    ///
    /// A file keeps its extension when the new name has none. Renaming to the
    /// current name succeeds without touching storage. An occupied
    /// destination is a `Conflict`; nothing is ever overwritten.
    pub fn rename(
        &self,
        kind: RenameKind,
        path: Option<&str>,
        new_name: &str,
        actor: &Actor,
    ) -> Result<RenameOutcome> {
        if matches!(self.resolver.normalize(path), Ok(ref relative) if relative.is_empty()) {
            return Err(EngineError::InvalidName("path is empty".to_string()));
        }

        let source = self.resolver.resolve(path, true, actor)?;
        let present = match kind {
            RenameKind::File => self.storage.exists(&source),
            RenameKind::Directory => self.storage.directory_exists(&source),
        };
        if !present {
            return Err(EngineError::NotFound(source.relative().to_string()));
        }

        let mut name = self.sanitizer.sanitize_checked(new_name)?;
        if kind == RenameKind::File && split_extension(&name).1.is_none() {
            if let (_, Some(old_ext)) = split_extension(source.name()) {
                let with_ext = format!("{}.{}", name, old_ext);
                name = self.sanitizer.sanitize(&with_ext);
            }
        }

        let new_relative = join_relative(source.parent_relative(), &name);
        let file_public_path = |relative: &str| match kind {
            RenameKind::File => Some(public_path(&self.public_prefix, relative)),
            RenameKind::Directory => None,
        };

        if new_relative == source.relative() {
            debug!(path = %new_relative, "Rename to the same name, nothing to do");
            return Ok(RenameOutcome {
                old_path: new_relative.clone(),
                public_path: file_public_path(&new_relative),
                new_path: new_relative,
            });
        }

        let destination = self.resolver.resolve_derived(&new_relative, false, actor)?;
        if self.occupied(&destination) {
            return Err(EngineError::Conflict(destination.relative().to_string()));
        }

        match kind {
            RenameKind::File => self
                .storage
                .move_file(&source, &destination)
                .map_err(|e| EngineError::from_io(source.relative(), e))?,
            RenameKind::Directory => self.move_directory(&source, &destination)?,
        }

        self.cache.invalidate_directory(source.parent_relative());
        self.cache.invalidate_directory(destination.parent_relative());
        self.cache.invalidate_subtree(source.relative());

        info!(from = %source.relative(), to = %destination.relative(), "Renamed");
        self.audit.record(
            AuditRecord::new(actor, "rename", AuditOutcome::Success)
                .detail("kind", if kind == RenameKind::File { "file" } else { "dir" })
                .detail("from", source.relative())
                .detail("to", destination.relative()),
        );

        Ok(RenameOutcome {
            old_path: source.relative().to_string(),
            new_path: destination.relative().to_string(),
            public_path: file_public_path(destination.relative()),
        })
    }

    /// Move a directory tree file by file.
    ///
    /// Phase 1 mirrors the directory structure, phase 2 moves every file,
    /// phase 3 removes the emptied source directories one at a time. Nothing
    /// is deleted before every file has been moved, and an entry storage
    /// cannot enumerate (a symlink, an unrepresentable name) makes phase 3
    /// fail instead of taking it down with the source.
    fn move_directory(&self, source: &ConfinedPath, destination: &ConfinedPath) -> Result<()> {
        let source_err = |e| EngineError::storage(source.relative(), e);
        let directories = self.storage.all_directories(source).map_err(source_err)?;
        let files = self.storage.all_files(source).map_err(source_err)?;

        // Phase 1
        self.storage
            .make_directory(destination)
            .map_err(|e| EngineError::storage(destination.relative(), e))?;
        for dir in &directories {
            let target = self.mirror(dir, source, destination);
            self.storage
                .make_directory(&target)
                .map_err(|e| EngineError::storage(target.relative(), e))?;
        }

        // Phase 2
        for file in &files {
            let from = self.resolver.confine_listed(file);
            let to = self.mirror(file, source, destination);
            self.storage
                .move_file(&from, &to)
                .map_err(|e| EngineError::storage(from.relative(), e))?;
        }

        // Phase 3: only directories emptied by phase 2 are removed, deepest
        // first. Anything storage did not enumerate keeps its parent alive.
        for dir in directories.iter().rev() {
            let emptied = self.resolver.confine_listed(dir);
            self.storage
                .delete_empty_directory(&emptied)
                .map_err(|e| EngineError::storage(emptied.relative(), e))?;
        }
        self.storage
            .delete_empty_directory(source)
            .map_err(|e| EngineError::storage(source.relative(), e))?;

        debug!(
            from = %source.relative(),
            to = %destination.relative(),
            directories = directories.len(),
            files = files.len(),
            "Directory moved"
        );
        Ok(())
    }

    /// Location of `item` (under `source`) relocated under `destination`.
    fn mirror(&self, item: &str, source: &ConfinedPath, destination: &ConfinedPath) -> ConfinedPath {
        let suffix = item
            .strip_prefix(source.relative())
            .map(|s| s.trim_start_matches('/'))
            .unwrap_or(item);
        self.resolver
            .confine_listed(&join_relative(destination.relative(), suffix))
    }

    /// Store uploaded bytes in `directory` under a collision-free name.
    pub fn upload(
        &self,
        directory: Option<&str>,
        original_name: &str,
        bytes: &[u8],
        actor: &Actor,
    ) -> Result<UploadOutcome> {
        let dir = self.resolver.resolve(directory, true, actor)?;
        if !self.storage.directory_exists(&dir) {
            return Err(EngineError::NotFound(dir.relative().to_string()));
        }

        let size = bytes.len() as u64;
        if size > self.upload.max_file_size {
            return Err(EngineError::FileTooLarge {
                size,
                max: self.upload.max_file_size,
            });
        }

        let name = self.sanitizer.sanitize_checked(original_name)?;
        let client_ext = policy_extension(original_name);
        let stored_ext = policy_extension(&name);
        self.check_extension(client_ext.as_deref())?;
        self.check_extension(stored_ext.as_deref())?;

        let ext = stored_ext.or(client_ext);
        if let Some(ext) = &ext {
            check_signature(ext, bytes)?;
        }
        self.check_content_type(ext.as_deref(), bytes)?;

        let target = self.free_name(&dir, &name, actor)?;
        self.storage
            .write(&target, bytes)
            .map_err(|e| EngineError::storage(target.relative(), e))?;

        self.cache.invalidate_directory(dir.relative());
        info!(path = %target.relative(), size, "File uploaded");
        self.audit.record(
            AuditRecord::new(actor, "upload", AuditOutcome::Success)
                .detail("path", target.relative())
                .detail("size", size),
        );

        Ok(UploadOutcome {
            filename: target.name().to_string(),
            relative_path: target.relative().to_string(),
            public_path: public_path(&self.public_prefix, target.relative()),
            size,
        })
    }

    /// First of `name`, `stem (1).ext`, `stem (2).ext`, ... not present in `dir`.
    fn free_name(&self, dir: &ConfinedPath, name: &str, actor: &Actor) -> Result<ConfinedPath> {
        let (stem, ext) = split_extension(name);

        for n in 0..MAX_COLLISION_ATTEMPTS {
            let candidate = if n == 0 {
                name.to_string()
            } else {
                self.numbered(stem, ext, n)
            };
            let target = self
                .resolver
                .resolve_derived(&join_relative(dir.relative(), &candidate), false, actor)?;
            if !self.occupied(&target) {
                return Ok(target);
            }
        }

        Err(EngineError::Conflict(join_relative(dir.relative(), name)))
    }

    /// `stem (n).ext`, shortening the stem to stay within the name length limit.
    fn numbered(&self, stem: &str, ext: Option<&str>, n: usize) -> String {
        let candidate = collision_candidate(stem, ext, n);
        let overflow = candidate
            .chars()
            .count()
            .saturating_sub(self.sanitizer.max_length());
        if overflow == 0 {
            return candidate;
        }

        let keep = stem.chars().count().saturating_sub(overflow);
        let stem: String = stem.chars().take(keep).collect();
        collision_candidate(&stem, ext, n)
    }

    fn check_extension(&self, ext: Option<&str>) -> Result<()> {
        match ext {
            Some(ext) if self.upload.rejects_extension(ext) => {
                Err(EngineError::BlockedExtension(ext.to_string()))
            }
            None if !self.upload.allowed_extensions.is_empty() => {
                Err(EngineError::BlockedExtension("(none)".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Match the sniffed content type against the MIME allowlist.
    ///
    /// The type detected from the bytes wins over the one implied by the
    /// extension. Unknown or generic content passes only when its extension
    /// is explicitly allowlisted.
    fn check_content_type(&self, ext: Option<&str>, bytes: &[u8]) -> Result<()> {
        if self.upload.allowed_mimes.is_empty() {
            return Ok(());
        }

        let sniffed = infer::get(bytes).map(|kind| kind.mime_type());
        let declared = ext.and_then(|ext| mime_guess::from_ext(ext).first_raw());
        let listed = ext.is_some_and(|ext| self.upload.lists_extension(ext));

        let mime = match sniffed.or(declared) {
            Some(mime) if mime != OCTET_STREAM => mime,
            _ if listed => return Ok(()),
            _ => {
                return Err(EngineError::UnsupportedType(
                    "type cannot be determined".to_string(),
                ))
            }
        };
        if self.upload.accepts_mime(mime) {
            return Ok(());
        }

        if let (Some(sniffed), Some(declared)) = (sniffed, declared) {
            if !sniffed.eq_ignore_ascii_case(declared) {
                debug!(sniffed, declared, "Upload content type mismatch");
                return Err(EngineError::InvalidContent(format!(
                    "content is {} but extension implies {}",
                    sniffed, declared
                )));
            }
        }
        if listed {
            return Ok(());
        }
        Err(EngineError::UnsupportedType(mime.to_string()))
    }

    fn occupied(&self, path: &ConfinedPath) -> bool {
        self.storage.exists(path) || self.storage.directory_exists(path)
    }
}

/// Lowercased extension of the last path segment of `name`, used for upload
/// policy. A leading dot counts, so `.htaccess` is checked as `htaccess`, and
/// trailing dots and spaces are ignored, so `shell.php.` is `php`.
fn policy_extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let base = base.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    base.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Reject Office documents whose bytes do not match their extension.
fn check_signature(ext: &str, bytes: &[u8]) -> Result<()> {
    let valid = match ext {
        "docx" | "xlsx" | "pptx" => {
            bytes.len() >= 4 && bytes.starts_with(b"PK") && matches!(bytes[2], 0x03 | 0x05 | 0x07)
        }
        "doc" | "ppt" => bytes.starts_with(&OLE2_SIGNATURE),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidContent(format!(".{} signature mismatch", ext)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::cache::MemoryCacheStore;
    use crate::storage::LocalStorage;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use protocol::{Listing, Pagination};
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        engine: MutationEngine,
        cache: Arc<ListingCache>,
        audit: Arc<MemoryAuditSink>,
    }

    fn fixture_with(storage: Arc<dyn StorageGateway>, root: &Path, temp_dir: TempDir) -> Fixture {
        let upload = UploadConfig {
            max_file_size: 1024,
            ..UploadConfig::default()
        };
        fixture_with_upload(storage, root, temp_dir, upload)
    }

    fn fixture_with_upload(
        storage: Arc<dyn StorageGateway>,
        root: &Path,
        temp_dir: TempDir,
        upload: UploadConfig,
    ) -> Fixture {
        let audit = Arc::new(MemoryAuditSink::new());
        let resolver = Arc::new(PathResolver::new(root, 20, storage.clone(), audit.clone()));
        let cache = Arc::new(ListingCache::new(
            Arc::new(MemoryCacheStore::new()),
            Duration::from_secs(300),
        ));
        let engine = MutationEngine::new(
            resolver,
            storage,
            cache.clone(),
            audit.clone(),
            NameSanitizer::new(64),
            upload,
            "uploads",
        );
        Fixture {
            _temp_dir: temp_dir,
            root: root.to_path_buf(),
            engine,
            cache,
            audit,
        }
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        fixture_with(Arc::new(LocalStorage::new(&root)), &root, temp_dir)
    }

    fn upload_fixture(upload: UploadConfig) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        fixture_with_upload(Arc::new(LocalStorage::new(&root)), &root, temp_dir, upload)
    }

    fn empty_listing(path: &str) -> Listing {
        Listing {
            path: path.to_string(),
            directories: vec![],
            files: vec![],
            pagination: Pagination::new(1, 50, 0),
            error: None,
        }
    }

    /// Local storage whose `move_file` fails after a number of successes.
    struct FaultyStorage {
        inner: LocalStorage,
        moves_before_failure: usize,
        moves: AtomicUsize,
    }

    impl StorageGateway for FaultyStorage {
        fn exists(&self, p: &ConfinedPath) -> bool {
            self.inner.exists(p)
        }
        fn directory_exists(&self, p: &ConfinedPath) -> bool {
            self.inner.directory_exists(p)
        }
        fn list_files(&self, p: &ConfinedPath) -> io::Result<Vec<String>> {
            self.inner.list_files(p)
        }
        fn list_directories(&self, p: &ConfinedPath) -> io::Result<Vec<String>> {
            self.inner.list_directories(p)
        }
        fn all_files(&self, p: &ConfinedPath) -> io::Result<Vec<String>> {
            self.inner.all_files(p)
        }
        fn all_directories(&self, p: &ConfinedPath) -> io::Result<Vec<String>> {
            self.inner.all_directories(p)
        }
        fn size(&self, p: &ConfinedPath) -> io::Result<u64> {
            self.inner.size(p)
        }
        fn read(&self, p: &ConfinedPath) -> io::Result<Vec<u8>> {
            self.inner.read(p)
        }
        fn write(&self, p: &ConfinedPath, c: &[u8]) -> io::Result<()> {
            self.inner.write(p, c)
        }
        fn make_directory(&self, p: &ConfinedPath) -> io::Result<()> {
            self.inner.make_directory(p)
        }
        fn move_file(&self, from: &ConfinedPath, to: &ConfinedPath) -> io::Result<()> {
            if self.moves.fetch_add(1, Ordering::SeqCst) >= self.moves_before_failure {
                return Err(io::Error::other("injected move failure"));
            }
            self.inner.move_file(from, to)
        }
        fn delete(&self, p: &ConfinedPath) -> io::Result<()> {
            self.inner.delete(p)
        }
        fn delete_directory(&self, p: &ConfinedPath) -> io::Result<()> {
            self.inner.delete_directory(p)
        }
        fn delete_empty_directory(&self, p: &ConfinedPath) -> io::Result<()> {
            self.inner.delete_empty_directory(p)
        }
    }

    #[test]
    fn test_create_folder() {
        let f = fixture();
        let entry = f.engine.create_folder(Some("reports"), &Actor::anonymous()).unwrap();

        assert_eq!(entry.relative_path, "reports");
        assert_eq!(entry.public_path, "uploads/reports");
        assert!(entry.is_dir());
        assert!(f.root.join("reports").is_dir());
        assert_eq!(f.audit.with_action("create_folder").len(), 1);
    }

    #[test]
    fn test_create_folder_sanitizes_leaf() {
        let f = fixture();
        let entry = f
            .engine
            .create_folder(Some("my<folder>"), &Actor::anonymous())
            .unwrap();
        assert_eq!(entry.name, "my_folder_");
        assert!(f.root.join("my_folder_").is_dir());
    }

    #[test]
    fn test_create_folder_errors() {
        let f = fixture();
        let actor = Actor::anonymous();
        fs::create_dir(f.root.join("exists")).unwrap();
        fs::write(f.root.join("file"), "x").unwrap();

        assert!(matches!(
            f.engine.create_folder(Some(""), &actor),
            Err(EngineError::InvalidName(_))
        ));
        assert!(matches!(
            f.engine.create_folder(Some("exists"), &actor),
            Err(EngineError::AlreadyExists(_))
        ));
        assert!(matches!(
            f.engine.create_folder(Some("file"), &actor),
            Err(EngineError::AlreadyExists(_))
        ));
        assert!(matches!(
            f.engine.create_folder(Some("missing/child"), &actor),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_folder_invalidates_parent() {
        let f = fixture();
        f.cache.put("", 1, &empty_listing(""));
        f.engine.create_folder(Some("new"), &Actor::anonymous()).unwrap();
        assert!(f.cache.get("", 1).is_none());
    }

    #[test]
    fn test_delete_folder_refuses_root() {
        let f = fixture();
        let actor = Actor::anonymous();
        for raw in [None, Some(""), Some("/"), Some("  "), Some("//")] {
            assert!(matches!(
                f.engine.delete_folder(raw, &actor),
                Err(EngineError::RefusedRootDelete)
            ));
        }
        assert!(f.root.exists());
    }

    #[test]
    fn test_delete_folder() {
        let f = fixture();
        fs::create_dir_all(f.root.join("a/b")).unwrap();
        fs::write(f.root.join("a/b/c.txt"), "c").unwrap();
        f.cache.put("a/b", 1, &empty_listing("a/b"));
        f.cache.put("", 1, &empty_listing(""));

        f.engine.delete_folder(Some("a"), &Actor::anonymous()).unwrap();
        assert!(!f.root.join("a").exists());
        assert!(f.cache.get("a/b", 1).is_none());
        assert!(f.cache.get("", 1).is_none());
    }

    #[test]
    fn test_delete_folder_on_file_is_not_found() {
        let f = fixture();
        fs::write(f.root.join("file.txt"), "x").unwrap();
        assert!(matches!(
            f.engine.delete_folder(Some("file.txt"), &Actor::anonymous()),
            Err(EngineError::NotFound(_))
        ));
        assert!(f.root.join("file.txt").exists());
    }

    #[test]
    fn test_delete_file() {
        let f = fixture();
        let actor = Actor::anonymous();
        fs::create_dir(f.root.join("dir")).unwrap();
        fs::write(f.root.join("a.txt"), "x").unwrap();

        f.engine.delete_file(Some("a.txt"), &actor).unwrap();
        assert!(!f.root.join("a.txt").exists());

        assert!(matches!(
            f.engine.delete_file(Some("a.txt"), &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.delete_file(Some("dir"), &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.delete_file(Some(""), &actor),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_file_preserves_extension() {
        let f = fixture();
        fs::create_dir(f.root.join("docs")).unwrap();
        fs::write(f.root.join("docs/a.txt"), "x").unwrap();

        let outcome = f
            .engine
            .rename(RenameKind::File, Some("docs/a.txt"), "b", &Actor::anonymous())
            .unwrap();

        assert_eq!(outcome.old_path, "docs/a.txt");
        assert_eq!(outcome.new_path, "docs/b.txt");
        assert_eq!(outcome.public_path.as_deref(), Some("uploads/docs/b.txt"));
        assert!(f.root.join("docs/b.txt").exists());
        assert!(!f.root.join("docs/a.txt").exists());
    }

    #[test]
    fn test_rename_file_explicit_extension_kept() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), "x").unwrap();
        let outcome = f
            .engine
            .rename(RenameKind::File, Some("a.txt"), "b.md", &Actor::anonymous())
            .unwrap();
        assert_eq!(outcome.new_path, "b.md");
    }

    #[test]
    fn test_rename_to_same_name_is_noop() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), "x").unwrap();

        let outcome = f
            .engine
            .rename(RenameKind::File, Some("a.txt"), "a", &Actor::anonymous())
            .unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.new_path, "a.txt");
        assert!(f.root.join("a.txt").exists());
    }

    #[test]
    fn test_rename_conflict_never_overwrites() {
        let f = fixture();
        let actor = Actor::anonymous();
        fs::write(f.root.join("a.txt"), "a").unwrap();
        fs::write(f.root.join("b.txt"), "b").unwrap();
        fs::create_dir(f.root.join("dir")).unwrap();

        fs::create_dir(f.root.join("other")).unwrap();

        assert!(matches!(
            f.engine.rename(RenameKind::File, Some("a.txt"), "b", &actor),
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            f.engine.rename(RenameKind::Directory, Some("other"), "dir", &actor),
            Err(EngineError::Conflict(_))
        ));
        assert_eq!(fs::read_to_string(f.root.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(f.root.join("b.txt")).unwrap(), "b");
        assert!(f.root.join("other").is_dir());
    }

    #[test]
    fn test_rename_wrong_kind_is_not_found() {
        let f = fixture();
        let actor = Actor::anonymous();
        fs::create_dir(f.root.join("dir")).unwrap();
        fs::write(f.root.join("a.txt"), "a").unwrap();

        assert!(matches!(
            f.engine.rename(RenameKind::File, Some("dir"), "x", &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.rename(RenameKind::Directory, Some("a.txt"), "x", &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.rename(RenameKind::File, Some(""), "x", &actor),
            Err(EngineError::InvalidName(_))
        ));
        assert!(matches!(
            f.engine.rename(RenameKind::File, Some("a.txt"), "..", &actor),
            Err(EngineError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rename_sanitizes_traversal_name() {
        let f = fixture();
        fs::create_dir(f.root.join("docs")).unwrap();
        fs::write(f.root.join("docs/a.txt"), "a").unwrap();

        let outcome = f
            .engine
            .rename(
                RenameKind::File,
                Some("docs/a.txt"),
                "../../etc/passwd",
                &Actor::anonymous(),
            )
            .unwrap();
        assert!(outcome.new_path.starts_with("docs/"));
        assert_eq!(outcome.new_path.matches('/').count(), 1);
    }

    #[test]
    fn test_rename_directory_moves_tree() {
        let f = fixture();
        fs::create_dir_all(f.root.join("old/sub/empty")).unwrap();
        fs::write(f.root.join("old/top.txt"), "1").unwrap();
        fs::write(f.root.join("old/sub/inner.txt"), "2").unwrap();
        f.cache.put("old/sub", 1, &empty_listing("old/sub"));

        let outcome = f
            .engine
            .rename(RenameKind::Directory, Some("old"), "new", &Actor::anonymous())
            .unwrap();

        assert_eq!(outcome.new_path, "new");
        assert!(outcome.public_path.is_none());
        assert!(!f.root.join("old").exists());
        assert_eq!(fs::read_to_string(f.root.join("new/top.txt")).unwrap(), "1");
        assert_eq!(
            fs::read_to_string(f.root.join("new/sub/inner.txt")).unwrap(),
            "2"
        );
        assert!(f.root.join("new/sub/empty").is_dir());
        assert!(f.cache.get("old/sub", 1).is_none());
    }

    #[test]
    fn test_failed_directory_move_loses_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        fs::create_dir_all(root.join("src/a/b")).unwrap();
        let originals = ["src/1.txt", "src/2.txt", "src/a/3.txt", "src/a/b/4.txt"];
        for file in originals {
            fs::write(root.join(file), file).unwrap();
        }

        let storage = Arc::new(FaultyStorage {
            inner: LocalStorage::new(&root),
            moves_before_failure: 2,
            moves: AtomicUsize::new(0),
        });
        let f = fixture_with(storage, &root, temp_dir);

        let result = f
            .engine
            .rename(RenameKind::Directory, Some("src"), "dst", &Actor::anonymous());
        assert!(matches!(result, Err(EngineError::Storage { .. })));

        for file in originals {
            let moved = file.replacen("src", "dst", 1);
            let at_source = root.join(file).is_file();
            let at_destination = root.join(&moved).is_file();
            assert!(
                at_source ^ at_destination,
                "{} must exist in exactly one tree",
                file
            );
        }
        assert!(root.join("src").is_dir());
        assert!(f.audit.with_action("rename").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_move_keeps_entries_storage_cannot_list() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let f = fixture();
        fs::create_dir(f.root.join("src")).unwrap();
        fs::write(f.root.join("src/ok.txt"), "ok").unwrap();
        let odd_name = OsStr::from_bytes(b"bad\xff.txt");
        fs::write(f.root.join("src").join(odd_name), "odd").unwrap();
        std::os::unix::fs::symlink("ok.txt", f.root.join("src/link")).unwrap();

        let result = f
            .engine
            .rename(RenameKind::Directory, Some("src"), "dst", &Actor::anonymous());
        assert!(matches!(result, Err(EngineError::Storage { .. })));

        assert!(f.root.join("dst/ok.txt").is_file());
        assert!(f.root.join("src").join(odd_name).is_file());
        assert!(fs::symlink_metadata(f.root.join("src/link"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert!(f.audit.with_action("rename").is_empty());
    }

    #[test]
    fn test_upload_collision_naming() {
        let f = fixture();
        let actor = Actor::anonymous();

        let first = f.engine.upload(None, "a.txt", b"one", &actor).unwrap();
        let second = f.engine.upload(None, "a.txt", b"two", &actor).unwrap();
        let third = f.engine.upload(None, "a.txt", b"three", &actor).unwrap();

        assert_eq!(first.filename, "a.txt");
        assert_eq!(second.filename, "a (1).txt");
        assert_eq!(third.filename, "a (2).txt");
        assert_eq!(third.size, 5);
        assert_eq!(third.public_path, "uploads/a (2).txt");
        assert_eq!(fs::read_to_string(f.root.join("a.txt")).unwrap(), "one");
    }

    #[test]
    fn test_upload_rejections() {
        let f = fixture();
        let actor = Actor::anonymous();

        assert!(matches!(
            f.engine.upload(None, "shell.php", b"<?php", &actor),
            Err(EngineError::BlockedExtension(ref e)) if e == "php"
        ));
        assert!(matches!(
            f.engine.upload(None, "SHELL.PHP", b"<?php", &actor),
            Err(EngineError::BlockedExtension(_))
        ));
        assert!(matches!(
            f.engine.upload(None, ".htaccess", b"deny", &actor),
            Err(EngineError::BlockedExtension(_))
        ));
        assert!(matches!(
            f.engine.upload(None, "big.bin", &[0u8; 2048], &actor),
            Err(EngineError::FileTooLarge { size: 2048, max: 1024 })
        ));
        assert!(matches!(
            f.engine.upload(Some("missing"), "a.txt", b"x", &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.upload(None, "..", b"x", &actor),
            Err(EngineError::InvalidName(_))
        ));
    }

    #[test]
    fn test_upload_policy_uses_client_name() {
        let f = fixture();
        let actor = Actor::anonymous();

        for name in [".htaccess", "shell.php.", "shell.php . .", "up/../shell.PHP"] {
            assert!(
                matches!(
                    f.engine.upload(None, name, b"x", &actor),
                    Err(EngineError::BlockedExtension(_))
                ),
                "{} should be blocked",
                name
            );
        }
        assert!(fs::read_dir(&f.root).unwrap().next().is_none());
    }

    #[test]
    fn test_upload_allowlist_requires_extension() {
        let f = upload_fixture(UploadConfig {
            allowed_extensions: vec!["txt".to_string()],
            ..UploadConfig::default()
        });
        let actor = Actor::anonymous();

        assert!(f.engine.upload(None, "notes.TXT", b"x", &actor).is_ok());
        assert!(matches!(
            f.engine.upload(None, "README", b"x", &actor),
            Err(EngineError::BlockedExtension(ref e)) if e == "(none)"
        ));
        assert!(matches!(
            f.engine.upload(None, "photo.png", b"x", &actor),
            Err(EngineError::BlockedExtension(ref e)) if e == "png"
        ));
    }

    fn mime_fixture(allowed_extensions: &[&str]) -> Fixture {
        upload_fixture(UploadConfig {
            allowed_mimes: vec!["image/png".to_string(), "text/plain".to_string()],
            allowed_extensions: allowed_extensions.iter().map(|e| e.to_string()).collect(),
            ..UploadConfig::default()
        })
    }

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const PDF_BYTES: &[u8] = b"%PDF-1.4\n%body";

    #[test]
    fn test_upload_mime_allowlist() {
        let f = mime_fixture(&[]);
        let actor = Actor::anonymous();

        assert!(f.engine.upload(None, "photo.png", PNG_BYTES, &actor).is_ok());
        assert!(f.engine.upload(None, "notes.txt", b"plain words", &actor).is_ok());
        assert!(matches!(
            f.engine.upload(None, "doc.pdf", PDF_BYTES, &actor),
            Err(EngineError::UnsupportedType(ref m)) if m == "application/pdf"
        ));
    }

    #[test]
    fn test_upload_sniffed_type_mismatch() {
        let f = mime_fixture(&[]);
        let err = f
            .engine
            .upload(None, "photo.jpg", PDF_BYTES, &Actor::anonymous())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidContent(_)));
        assert!(!f.root.join("photo.jpg").exists());
    }

    #[test]
    fn test_upload_undetermined_type_needs_listed_extension() {
        let actor = Actor::anonymous();
        let bytes = [0x13u8, 0x37, 0x00, 0x42];

        let f = mime_fixture(&[]);
        assert!(matches!(
            f.engine.upload(None, "data.bin", &bytes, &actor),
            Err(EngineError::UnsupportedType(_))
        ));
        assert!(matches!(
            f.engine.upload(None, "data", &bytes, &actor),
            Err(EngineError::UnsupportedType(_))
        ));

        let f = mime_fixture(&["bin"]);
        assert!(f.engine.upload(None, "data.bin", &bytes, &actor).is_ok());
    }

    #[test]
    fn test_upload_office_signatures() {
        let f = fixture();
        let actor = Actor::anonymous();

        assert!(matches!(
            f.engine.upload(None, "fake.docx", b"not a zip", &actor),
            Err(EngineError::InvalidContent(_))
        ));
        assert!(f
            .engine
            .upload(None, "real.docx", b"PK\x03\x04rest", &actor)
            .is_ok());

        assert!(matches!(
            f.engine.upload(None, "fake.doc", b"plain text", &actor),
            Err(EngineError::InvalidContent(_))
        ));
        let mut ole = OLE2_SIGNATURE.to_vec();
        ole.extend_from_slice(b"body");
        assert!(f.engine.upload(None, "real.doc", &ole, &actor).is_ok());

        assert!(f.engine.upload(None, "any.xls", b"whatever", &actor).is_ok());
    }

    #[test]
    fn test_upload_sanitizes_name() {
        let f = fixture();
        let outcome = f
            .engine
            .upload(None, "../../evil.txt", b"x", &Actor::anonymous())
            .unwrap();
        assert!(!outcome.filename.contains('/'));
        assert!(f.root.join(&outcome.filename).is_file());
    }

    #[test]
    fn test_numbered_names_respect_length_limit() {
        let f = fixture();
        let stem = "s".repeat(60);
        let name = f.engine.numbered(&stem, Some("txt"), 12);
        assert_eq!(name.chars().count(), 64);
        assert!(name.ends_with(" (12).txt"));
    }
}
