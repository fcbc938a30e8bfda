//! The operation API.
//!
//! [`FileManager`] wires every component from a [`Config`] and exposes one
//! method per operation. It is `Send + Sync` and meant to be shared behind
//! an `Arc` by the host.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use protocol::{Entry, Listing, RenameKind, RenameOutcome, UploadOutcome};
use tracing::{info, warn};

use crate::archive::{Archive, ArchiveBuilder};
use crate::audit::{Actor, AuditSink, NullAuditSink, TracingAuditSink};
use crate::cache::{CacheStore, ListingCache, MemoryCacheStore};
use crate::config::{Config, ConfigError};
use crate::error::Result;
use crate::listing::DirectoryLister;
use crate::mutation::MutationEngine;
use crate::path::{NameSanitizer, PathResolver};
use crate::storage::{LocalStorage, StorageGateway};

/// Sandboxed file manager over a single storage root.
pub struct FileManager {
    config: Config,
    resolver: Arc<PathResolver>,
    cache: Arc<ListingCache>,
    lister: DirectoryLister,
    mutations: MutationEngine,
    archives: ArchiveBuilder,
}

impl FileManager {
    /// Build a manager on local storage with the configured audit sink and
    /// an in-memory listing cache.
    ///
    /// A missing root directory is created; failing that is logged and
    /// surfaces on first use.
    pub fn new(config: Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        ensure_root(&config.storage.root);

        let storage: Arc<dyn StorageGateway> = Arc::new(LocalStorage::new(&config.storage.root));
        let audit: Arc<dyn AuditSink> = if config.logging.audit_enabled {
            Arc::new(TracingAuditSink)
        } else {
            Arc::new(NullAuditSink)
        };

        Self::from_parts(config, storage, audit, Arc::new(MemoryCacheStore::new()))
    }

    /// Build a manager from explicit components.
    pub fn from_parts(
        config: Config,
        storage: Arc<dyn StorageGateway>,
        audit: Arc<dyn AuditSink>,
        cache_store: Arc<dyn CacheStore>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let resolver = Arc::new(PathResolver::new(
            &config.storage.root,
            config.security.max_path_depth,
            storage.clone(),
            audit.clone(),
        ));

        let cache = Arc::new(if config.cache.enabled {
            ListingCache::new(cache_store, Duration::from_secs(config.cache.ttl_secs))
        } else {
            ListingCache::disabled()
        });

        let lister = DirectoryLister::new(
            resolver.clone(),
            storage.clone(),
            cache.clone(),
            config.storage.public_prefix.clone(),
            config.listing.per_page,
        );

        let mutations = MutationEngine::new(
            resolver.clone(),
            storage.clone(),
            cache.clone(),
            audit.clone(),
            NameSanitizer::new(config.security.max_filename_length),
            config.upload.clone(),
            config.storage.public_prefix.clone(),
        );

        let archives = ArchiveBuilder::new(
            resolver.clone(),
            storage,
            audit,
            config.archive.temp_dir.clone(),
            config.security.max_archive_files,
        );

        info!(root = ?resolver.root(), "File manager ready");

        Ok(Self {
            config,
            resolver,
            cache,
            lister,
            mutations,
            archives,
        })
    }

    /// The configuration this manager was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// The listing cache shared by listing and mutations.
    pub fn cache(&self) -> &ListingCache {
        &self.cache
    }

    /// List one page of a directory.
    pub fn list(&self, path: Option<&str>, page: usize, actor: &Actor) -> Result<Listing> {
        self.lister.list(path, page, actor)
    }

    /// Create a folder.
    pub fn create_folder(&self, path: Option<&str>, actor: &Actor) -> Result<Entry> {
        self.mutations.create_folder(path, actor)
    }

    /// Delete a folder and its contents.
    pub fn delete_folder(&self, path: Option<&str>, actor: &Actor) -> Result<()> {
        self.mutations.delete_folder(path, actor)
    }

    /// Delete a file.
    pub fn delete_file(&self, path: Option<&str>, actor: &Actor) -> Result<()> {
        self.mutations.delete_file(path, actor)
    }

    /// Rename a file or folder.
    pub fn rename(
        &self,
        kind: RenameKind,
        path: Option<&str>,
        new_name: &str,
        actor: &Actor,
    ) -> Result<RenameOutcome> {
        self.mutations.rename(kind, path, new_name, actor)
    }

    /// Store an uploaded file.
    pub fn upload(
        &self,
        directory: Option<&str>,
        original_name: &str,
        bytes: &[u8],
        actor: &Actor,
    ) -> Result<UploadOutcome> {
        self.mutations.upload(directory, original_name, bytes, actor)
    }

    /// Archive a folder.
    pub fn build_folder_archive(&self, path: Option<&str>, actor: &Actor) -> Result<Archive> {
        self.archives.build_folder_archive(path, actor)
    }

    /// Archive a selection of files.
    pub fn build_files_archive(&self, paths: &[String], actor: &Actor) -> Result<Archive> {
        self.archives.build_files_archive(paths, actor)
    }
}

fn ensure_root(root: &Path) {
    if root.is_dir() {
        return;
    }
    match fs::create_dir_all(root) {
        Ok(()) => info!(root = ?root, "Created storage root"),
        Err(e) => warn!(root = ?root, error = %e, "Failed to create storage root"),
    }
}
