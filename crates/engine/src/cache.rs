//! Listing cache.
//!
//! Caches listing pages keyed by (relative path, page). Entries expire after
//! a fixed TTL and are invalidated by mutations. The cache is never
//! authoritative: every failure of the backing store is logged and treated
//! as a miss, and invalidation failures never fail the mutation that
//! triggered them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use protocol::Listing;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from a cache backing store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store cannot be reached or is in a broken state.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Key of a cached listing page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: String,
    pub page: usize,
}

impl CacheKey {
    pub fn new(path: impl Into<String>, page: usize) -> Self {
        Self {
            path: path.into(),
            page,
        }
    }

    /// Whether this key lists `dir` or any directory below it.
    fn within(&self, dir: &str) -> bool {
        dir.is_empty()
            || self.path == dir
            || (self.path.starts_with(dir) && self.path[dir.len()..].starts_with('/'))
    }
}

/// A cached listing page with its insertion time.
#[derive(Debug, Clone)]
pub struct CachedListing {
    pub listing: Listing,
    pub stored_at: Instant,
}

/// Backing store for [`ListingCache`].
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedListing>, CacheError>;

    fn put(&self, key: CacheKey, value: CachedListing) -> Result<(), CacheError>;

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Remove every entry whose key matches, returning how many were removed.
    fn remove_where(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> Result<usize, CacheError>;
}

/// In-process store on a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CachedListing>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedListing>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: CacheKey, value: CachedListing) -> Result<(), CacheError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    fn remove_where(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Listing cache with TTL and explicit invalidation.
pub struct ListingCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    enabled: bool,
}

impl std::fmt::Debug for ListingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingCache")
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl ListingCache {
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            enabled: true,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            store: Arc::new(MemoryCacheStore::new()),
            ttl: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fetch an unexpired listing page.
    pub fn get(&self, path: &str, page: usize) -> Option<Listing> {
        if !self.enabled {
            return None;
        }

        let key = CacheKey::new(path, page);
        match self.store.get(&key) {
            Ok(Some(cached)) if cached.stored_at.elapsed() < self.ttl => {
                debug!(path = %path, page, "Listing cache hit");
                Some(cached.listing)
            }
            Ok(Some(_)) => {
                if let Err(e) = self.store.remove(&key) {
                    warn!(path = %path, page, error = %e, "Failed to evict expired listing");
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(path = %path, page, error = %e, "Listing cache read failed");
                None
            }
        }
    }

    /// Store a listing page.
    pub fn put(&self, path: &str, page: usize, listing: &Listing) {
        if !self.enabled {
            return;
        }

        let cached = CachedListing {
            listing: listing.clone(),
            stored_at: Instant::now(),
        };
        if let Err(e) = self.store.put(CacheKey::new(path, page), cached) {
            warn!(path = %path, page, error = %e, "Failed to cache listing");
        }
    }

    /// Drop every cached page of `dir`.
    pub fn invalidate_directory(&self, dir: &str) {
        self.invalidate(dir, |key| key.path == dir);
    }

    /// Drop every cached page of `dir` and of every directory below it.
    pub fn invalidate_subtree(&self, dir: &str) {
        self.invalidate(dir, |key| key.within(dir));
    }

    fn invalidate(&self, dir: &str, predicate: impl Fn(&CacheKey) -> bool) {
        if !self.enabled {
            return;
        }

        match self.store.remove_where(&predicate) {
            Ok(removed) => debug!(path = %dir, removed, "Invalidated listing cache"),
            Err(e) => warn!(path = %dir, error = %e, "Listing cache invalidation failed"),
        }
    }
}
