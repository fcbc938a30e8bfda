//! # SFiles Engine
//!
//! Sandboxed filesystem operations for an embedded file manager.
//!
//! Every request carries an untrusted relative path. The engine normalizes
//! and confines it to a single storage root before anything touches disk,
//! then lists, mutates or archives through a storage capability.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use engine::{Actor, Config, FileManager};
//!
//! let mut config = Config::default();
//! config.storage.root = "/srv/cms/uploads".into();
//!
//! let manager = FileManager::new(config).unwrap();
//! let actor = Actor::user("42").with_addr("203.0.113.7");
//!
//! manager.create_folder(Some("reports/2024"), &actor).unwrap();
//! let listing = manager.list(Some("reports"), 1, &actor).unwrap();
//! println!("{} entries", listing.pagination.total);
//! ```
//!
//! ## Modules
//!
//! - [`path`]: Path normalization, confinement and name sanitizing
//! - [`storage`]: Storage capability and local directory implementation
//! - [`cache`]: Listing cache with TTL and invalidation
//! - [`listing`]: Paginated directory listing
//! - [`mutation`]: Folder creation, deletes, renames and uploads
//! - [`archive`]: Zip archives for bulk downloads
//! - [`audit`]: Audit records and sinks
//! - [`manager`]: The operation API
//! - [`config`]: Configuration
//! - [`error`]: Error types

pub mod archive;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod listing;
pub mod manager;
pub mod mutation;
pub mod path;
pub mod storage;

pub use archive::{Archive, ArchiveBuilder, ArchiveStream};
pub use audit::{
    Actor, AuditOutcome, AuditRecord, AuditSink, MemoryAuditSink, NullAuditSink,
    TracingAuditSink, AUDIT_TARGET,
};
pub use cache::{CacheError, CacheStore, ListingCache, MemoryCacheStore};
pub use config::{Config, ConfigError};
pub use error::{EngineError, Result};
pub use manager::FileManager;
pub use path::{ConfinedPath, NameSanitizer, PathResolver};
pub use storage::{LocalStorage, StorageGateway};
