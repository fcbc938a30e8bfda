//! Zip archives for bulk downloads.
//!
//! Archives are written to a named temp file, never held in memory. The
//! finished archive is handed out as an [`ArchiveStream`] that deletes the
//! temp file when dropped, whether it was sent completely or abandoned.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::ArchiveInfo;
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::audit::{Actor, AuditOutcome, AuditRecord, AuditSink};
use crate::error::{EngineError, Result};
use crate::path::{collision_candidate, split_extension, ConfinedPath, PathResolver};
use crate::storage::StorageGateway;

/// Prefix of archive temp files.
pub const TEMP_PREFIX: &str = "sfiles_zip_";

/// A finished archive.
#[derive(Debug)]
pub struct Archive {
    pub info: ArchiveInfo,
    pub stream: ArchiveStream,
}

/// Readable archive contents backed by a temp file.
#[derive(Debug)]
pub struct ArchiveStream {
    file: File,
    path: Option<TempPath>,
}

impl ArchiveStream {
    fn new(temp: NamedTempFile) -> Self {
        let (file, path) = temp.into_parts();
        Self {
            file,
            path: Some(path),
        }
    }

    /// Location of the temp file while the stream is alive.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Read for ArchiveStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for ArchiveStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let temp_file = path.to_path_buf();
            if let Err(e) = path.close() {
                warn!(path = ?temp_file, error = %e, "Failed to delete archive temp file");
            }
        }
    }
}

/// Builds zip archives from folders or file selections.
pub struct ArchiveBuilder {
    resolver: Arc<PathResolver>,
    storage: Arc<dyn StorageGateway>,
    audit: Arc<dyn AuditSink>,
    temp_dir: Option<PathBuf>,
    max_files: usize,
}

impl ArchiveBuilder {
    pub fn new(
        resolver: Arc<PathResolver>,
        storage: Arc<dyn StorageGateway>,
        audit: Arc<dyn AuditSink>,
        temp_dir: Option<PathBuf>,
        max_files: usize,
    ) -> Self {
        Self {
            resolver,
            storage,
            audit,
            temp_dir,
            max_files,
        }
    }

    /// Zip a folder under a single top-level directory named after it.
    ///
    /// The root itself cannot be archived.
    pub fn build_folder_archive(&self, path: Option<&str>, actor: &Actor) -> Result<Archive> {
        if matches!(self.resolver.normalize(path), Ok(ref relative) if relative.is_empty()) {
            return Err(EngineError::InvalidRequest(
                "a folder path is required".to_string(),
            ));
        }

        let folder = self.resolver.resolve(path, true, actor)?;
        if !self.storage.directory_exists(&folder) {
            return Err(EngineError::NotFound(folder.relative().to_string()));
        }

        let top = folder.name().to_string();
        let directories = self
            .storage
            .all_directories(&folder)
            .map_err(|e| EngineError::storage(folder.relative(), e))?;
        let files = self
            .storage
            .all_files(&folder)
            .map_err(|e| EngineError::storage(folder.relative(), e))?;

        let mut temp = self.temp_file()?;
        let mut zip = ZipWriter::new(temp.as_file_mut());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.add_directory(format!("{}/", top), options)?;
        for dir in &directories {
            let name = format!("{}/{}/", top, suffix_of(dir, folder.relative()));
            zip.add_directory(name, options)?;
        }
        for file in &files {
            let name = format!("{}/{}", top, suffix_of(file, folder.relative()));
            self.append_file(&mut zip, &self.resolver.confine_listed(file), name)?;
        }
        zip.finish()?;

        let archive = self.seal(temp, format!("{}.zip", top), files.len())?;
        info!(
            path = %folder.relative(),
            entries = archive.info.entries,
            size = archive.info.size,
            "Folder archive built"
        );
        self.audit.record(
            AuditRecord::new(actor, "download_folder", AuditOutcome::Success)
                .detail("path", folder.relative())
                .detail("entries", archive.info.entries),
        );
        Ok(archive)
    }

    /// Zip a selection of files, flat at the archive root.
    ///
    /// Empty paths are skipped. Any other path that is not an existing file
    /// aborts the whole build. Duplicate basenames (ignoring case) are
    /// renamed `stem (n).ext`.
    pub fn build_files_archive(&self, paths: &[String], actor: &Actor) -> Result<Archive> {
        if paths.is_empty() {
            return Err(EngineError::InvalidRequest("no files selected".to_string()));
        }
        if paths.len() > self.max_files {
            return Err(EngineError::TooManyFiles {
                count: paths.len(),
                max: self.max_files,
            });
        }

        let mut files = Vec::with_capacity(paths.len());
        for raw in paths {
            if matches!(self.resolver.normalize(Some(raw)), Ok(ref relative) if relative.is_empty())
            {
                debug!(path = %raw, "Skipping empty path in file selection");
                continue;
            }

            let file = self
                .resolver
                .resolve(Some(raw), true, actor)
                .map_err(|e| match e {
                    EngineError::NotFound(_) => EngineError::NotFound(raw.clone()),
                    other => other,
                })?;
            if !self.storage.exists(&file) {
                return Err(EngineError::NotFound(raw.clone()));
            }
            files.push(file);
        }

        if files.is_empty() {
            return Err(EngineError::NotFound("no valid files selected".to_string()));
        }

        let mut temp = self.temp_file()?;
        let mut zip = ZipWriter::new(temp.as_file_mut());
        let mut used = HashSet::with_capacity(files.len());
        for file in &files {
            let name = unique_entry_name(file.name(), &mut used);
            self.append_file(&mut zip, file, name)?;
        }
        zip.finish()?;

        let file_name = format!(
            "files_{}.zip",
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let archive = self.seal(temp, file_name, files.len())?;
        info!(
            entries = archive.info.entries,
            size = archive.info.size,
            "File selection archive built"
        );
        self.audit.record(
            AuditRecord::new(actor, "download_files", AuditOutcome::Success)
                .detail("count", archive.info.entries),
        );
        Ok(archive)
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(".zip");
        let result = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        result.map_err(|e| EngineError::storage("archive temp file", e))
    }

    fn append_file<W: Write + Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        file: &ConfinedPath,
        entry_name: String,
    ) -> Result<()> {
        let size = self
            .storage
            .size(file)
            .map_err(|e| EngineError::from_io(file.relative(), e))?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX));

        zip.start_file(entry_name, options)?;
        match self.storage.absolute_local_path(file) {
            Some(local) => {
                let mut source =
                    File::open(&local).map_err(|e| EngineError::from_io(file.relative(), e))?;
                io::copy(&mut source, zip).map_err(|e| EngineError::storage(file.relative(), e))?;
            }
            None => {
                let bytes = self
                    .storage
                    .read(file)
                    .map_err(|e| EngineError::from_io(file.relative(), e))?;
                zip.write_all(&bytes)
                    .map_err(|e| EngineError::storage(file.relative(), e))?;
            }
        }
        Ok(())
    }

    fn seal(&self, mut temp: NamedTempFile, file_name: String, entries: usize) -> Result<Archive> {
        let sealed = (|| -> io::Result<u64> {
            let file = temp.as_file_mut();
            file.flush()?;
            file.seek(SeekFrom::Start(0))?;
            Ok(file.metadata()?.len())
        })();
        let size = sealed.map_err(|e| EngineError::storage("archive temp file", e))?;

        Ok(Archive {
            info: ArchiveInfo {
                file_name,
                size,
                entries,
            },
            stream: ArchiveStream::new(temp),
        })
    }
}

/// Part of `item` below `base`.
fn suffix_of<'a>(item: &'a str, base: &str) -> &'a str {
    item.strip_prefix(base)
        .map(|s| s.trim_start_matches('/'))
        .unwrap_or(item)
}

/// `name`, or `stem (n).ext` when `name` was already used (ignoring case).
fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_lowercase()) {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    let mut n = 1;
    loop {
        let candidate = collision_candidate(stem, ext, n);
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::TempDir;
    use zip::ZipArchive;

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        scratch: TempDir,
        builder: ArchiveBuilder,
        audit: Arc<MemoryAuditSink>,
    }

    fn fixture(max_files: usize) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let scratch = TempDir::new().unwrap();
        let storage: Arc<dyn StorageGateway> = Arc::new(LocalStorage::new(&root));
        let audit = Arc::new(MemoryAuditSink::new());
        let resolver = Arc::new(PathResolver::new(&root, 20, storage.clone(), audit.clone()));
        let builder = ArchiveBuilder::new(
            resolver,
            storage,
            audit.clone(),
            Some(scratch.path().to_path_buf()),
            max_files,
        );
        Fixture {
            _temp_dir: temp_dir,
            root,
            scratch,
            builder,
            audit,
        }
    }

    fn entry_names(archive: &mut Archive) -> Vec<String> {
        let zip = ZipArchive::new(&mut archive.stream).unwrap();
        let mut names: Vec<String> = zip.file_names().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    fn read_entry(archive: &mut Archive, name: &str) -> String {
        archive.stream.seek(SeekFrom::Start(0)).unwrap();
        let mut zip = ZipArchive::new(&mut archive.stream).unwrap();
        let mut contents = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut contents).unwrap();
        contents
    }

    fn scratch_is_empty(f: &Fixture) -> bool {
        fs::read_dir(f.scratch.path()).unwrap().next().is_none()
    }

    #[test]
    fn test_folder_archive_layout() {
        let f = fixture(300);
        fs::create_dir_all(f.root.join("reports/2024/empty")).unwrap();
        fs::write(f.root.join("reports/summary.txt"), "summary").unwrap();
        fs::write(f.root.join("reports/2024/q1.txt"), "q1").unwrap();

        let mut archive = f
            .builder
            .build_folder_archive(Some("reports"), &Actor::anonymous())
            .unwrap();

        assert_eq!(archive.info.file_name, "reports.zip");
        assert_eq!(archive.info.entries, 2);
        assert!(archive.info.size > 0);
        assert_eq!(
            entry_names(&mut archive),
            vec![
                "reports/",
                "reports/2024/",
                "reports/2024/empty/",
                "reports/2024/q1.txt",
                "reports/summary.txt",
            ]
        );
        assert_eq!(read_entry(&mut archive, "reports/2024/q1.txt"), "q1");
        assert_eq!(f.audit.with_action("download_folder").len(), 1);
    }

    #[test]
    fn test_folder_archive_rejects_root_and_files() {
        let f = fixture(300);
        let actor = Actor::anonymous();
        fs::write(f.root.join("plain.txt"), "x").unwrap();

        assert!(matches!(
            f.builder.build_folder_archive(None, &actor),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            f.builder.build_folder_archive(Some("/"), &actor),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            f.builder.build_folder_archive(Some("plain.txt"), &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            f.builder.build_folder_archive(Some("missing"), &actor),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_files_archive_dedups_names() {
        let f = fixture(300);
        fs::create_dir_all(f.root.join("a")).unwrap();
        fs::create_dir_all(f.root.join("b")).unwrap();
        fs::create_dir_all(f.root.join("c")).unwrap();
        fs::write(f.root.join("a/report.txt"), "from a").unwrap();
        fs::write(f.root.join("b/report.txt"), "from b").unwrap();
        fs::write(f.root.join("c/REPORT.txt"), "from c").unwrap();

        let paths = vec![
            "a/report.txt".to_string(),
            "b/report.txt".to_string(),
            "c/REPORT.txt".to_string(),
        ];
        let mut archive = f
            .builder
            .build_files_archive(&paths, &Actor::anonymous())
            .unwrap();

        assert_eq!(archive.info.entries, 3);
        assert!(archive.info.file_name.starts_with("files_"));
        assert!(archive.info.file_name.ends_with(".zip"));
        assert_eq!(
            entry_names(&mut archive),
            vec!["REPORT (2).txt", "report (1).txt", "report.txt"]
        );
        assert_eq!(read_entry(&mut archive, "report (1).txt"), "from b");

        let records = f.audit.with_action("download_files");
        assert_eq!(records[0].get("count"), Some("3"));
    }

    #[test]
    fn test_files_archive_limits() {
        let f = fixture(2);
        let actor = Actor::anonymous();

        assert!(matches!(
            f.builder.build_files_archive(&[], &actor),
            Err(EngineError::InvalidRequest(_))
        ));

        // The count is checked before any path is looked at.
        let paths: Vec<String> = (0..3).map(|i| format!("../nope{}", i)).collect();
        assert!(matches!(
            f.builder.build_files_archive(&paths, &actor),
            Err(EngineError::TooManyFiles { count: 3, max: 2 })
        ));
        assert!(f.audit.records().is_empty());
    }

    #[test]
    fn test_files_archive_missing_file_aborts() {
        let f = fixture(300);
        fs::write(f.root.join("ok.txt"), "ok").unwrap();
        fs::create_dir(f.root.join("dir")).unwrap();
        let actor = Actor::anonymous();

        let paths = vec!["ok.txt".to_string(), "ghost.txt".to_string()];
        assert!(matches!(
            f.builder.build_files_archive(&paths, &actor),
            Err(EngineError::NotFound(ref p)) if p == "ghost.txt"
        ));

        let paths = vec!["ok.txt".to_string(), "dir".to_string()];
        assert!(matches!(
            f.builder.build_files_archive(&paths, &actor),
            Err(EngineError::NotFound(ref p)) if p == "dir"
        ));

        let paths = vec!["".to_string(), "/".to_string()];
        assert!(matches!(
            f.builder.build_files_archive(&paths, &actor),
            Err(EngineError::NotFound(_))
        ));
        assert!(scratch_is_empty(&f));
    }

    #[test]
    fn test_files_archive_skips_empty_paths() {
        let f = fixture(300);
        fs::write(f.root.join("ok.txt"), "ok").unwrap();
        let paths = vec!["".to_string(), "ok.txt".to_string()];
        let archive = f
            .builder
            .build_files_archive(&paths, &Actor::anonymous())
            .unwrap();
        assert_eq!(archive.info.entries, 1);
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let f = fixture(300);
        fs::create_dir(f.root.join("docs")).unwrap();
        fs::write(f.root.join("docs/a.txt"), "a").unwrap();

        let archive = f
            .builder
            .build_folder_archive(Some("docs"), &Actor::anonymous())
            .unwrap();
        let path = archive.stream.path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX));

        drop(archive);
        assert!(!path.exists());
        assert!(scratch_is_empty(&f));
    }

    #[test]
    fn test_partially_read_stream_cleans_up() {
        let f = fixture(300);
        fs::write(f.root.join("a.txt"), "a".repeat(4096)).unwrap();

        let mut archive = f
            .builder
            .build_files_archive(&["a.txt".to_string()], &Actor::anonymous())
            .unwrap();
        let mut buf = [0u8; 16];
        archive.stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..2], b"PK");

        drop(archive);
        assert!(scratch_is_empty(&f));
    }

    #[test]
    fn test_unique_entry_name() {
        let mut used = HashSet::new();
        assert_eq!(unique_entry_name("a.txt", &mut used), "a.txt");
        assert_eq!(unique_entry_name("A.TXT", &mut used), "A (1).TXT");
        assert_eq!(unique_entry_name("a.txt", &mut used), "a (2).txt");
        assert_eq!(unique_entry_name("a (1).txt", &mut used), "a (1) (1).txt");
    }
}
