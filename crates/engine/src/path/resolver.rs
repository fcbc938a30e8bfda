//! Untrusted relative path resolution.
//!
//! A raw path goes through two stages:
//!
//! 1. [`normalize`]: separator cleanup, per-segment traversal checks on the
//!    raw and percent-decoded forms, full decoding with a second segment
//!    check, and the depth limit. Pure string work, no storage access.
//! 2. Confinement: the joined absolute path (or its parent, for creation
//!    targets) is canonicalized and must stay under the canonical root,
//!    compared component-wise so `/data/uploads2` never matches
//!    `/data/uploads`.
//!
//! Traversal, depth and root-escape rejections are audited before the error
//! is returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use super::{display_path, parent_of, ConfinedPath};
use crate::audit::{Actor, AuditOutcome, AuditRecord, AuditSink};
use crate::error::{EngineError, Result};
use crate::storage::StorageGateway;

/// Resolves untrusted relative paths into [`ConfinedPath`]s.
pub struct PathResolver {
    root: PathBuf,
    max_depth: usize,
    storage: Arc<dyn StorageGateway>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("root", &self.root)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl PathResolver {
    /// Create a resolver for `root`.
    ///
    /// The root is canonicalized once here. If that fails (root missing),
    /// the absolute form is used and the failure surfaces on first use.
    pub fn new(
        root: impl AsRef<Path>,
        max_depth: usize,
        storage: Arc<dyn StorageGateway>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let root = root.as_ref();
        let root = match fs::canonicalize(root) {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!(root = ?root, error = %e, "Failed to canonicalize storage root");
                std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
            }
        };

        Self {
            root,
            max_depth,
            storage,
            audit,
        }
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a raw path without touching storage.
    pub fn normalize(&self, raw: Option<&str>) -> Result<String> {
        normalize(raw, self.max_depth)
    }

    /// Resolve a raw relative path.
    ///
    /// With `must_exist`, the target itself must exist under the root.
    /// Without it, only the parent must exist as a directory under the root.
    pub fn resolve(
        &self,
        raw: Option<&str>,
        must_exist: bool,
        actor: &Actor,
    ) -> Result<ConfinedPath> {
        let result = self
            .normalize(raw)
            .and_then(|relative| self.confine(relative, must_exist, actor));

        if let Err(e) = &result {
            if e.is_audited() {
                self.record_violation(actor, raw.unwrap_or(""), e);
            }
        }

        result
    }

    /// Resolve a path the engine built from a resolved parent and a
    /// sanitized name. It is already decoded, so it is not decoded again.
    pub(crate) fn resolve_derived(
        &self,
        relative: &str,
        must_exist: bool,
        actor: &Actor,
    ) -> Result<ConfinedPath> {
        let result = check_derived(relative)
            .and_then(|relative| self.confine(relative, must_exist, actor));

        if let Err(e) = &result {
            if e.is_audited() {
                self.record_violation(actor, relative, e);
            }
        }

        result
    }

    /// Confine a path enumerated by storage below an already resolved directory.
    pub(crate) fn confine_listed(&self, relative: &str) -> ConfinedPath {
        ConfinedPath::new(relative.to_string(), self.absolute_of(relative))
    }

    fn absolute_of(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn confine(&self, relative: String, must_exist: bool, actor: &Actor) -> Result<ConfinedPath> {
        let absolute = self.absolute_of(&relative);

        if must_exist {
            self.check_existing(&relative, &absolute)?;
        } else if !relative.is_empty() {
            self.check_parent(&relative, actor)?;
            self.check_leaf_link(&relative, &absolute)?;
        }

        Ok(ConfinedPath::new(relative, absolute))
    }

    fn check_existing(&self, relative: &str, absolute: &Path) -> Result<()> {
        match fs::canonicalize(absolute) {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(()),
            Ok(canonical) => {
                debug!(path = %relative, canonical = ?canonical, "Canonical path escapes root");
                Err(EngineError::PathOutsideRoot(display_path(relative)))
            }
            Err(e) => {
                let target = ConfinedPath::new(relative.to_string(), absolute.to_path_buf());
                if !self.storage.exists(&target) && !self.storage.directory_exists(&target) {
                    return Err(EngineError::NotFound(display_path(relative)));
                }

                // Storage sees it but canonicalization failed: lexical check only.
                debug!(path = %relative, error = %e, "Canonicalization failed, using lexical root check");
                if lexically_within(&self.root, absolute) {
                    Ok(())
                } else {
                    Err(EngineError::PathOutsideRoot(display_path(relative)))
                }
            }
        }
    }

    fn check_parent(&self, relative: &str, actor: &Actor) -> Result<()> {
        let parent = parent_of(relative);
        let parent_abs = self.absolute_of(parent);
        let parent_path = ConfinedPath::new(parent.to_string(), parent_abs.clone());

        if !self.storage.directory_exists(&parent_path) {
            return Err(EngineError::NotFound(display_path(parent)));
        }

        match fs::canonicalize(&parent_abs) {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(()),
            Ok(_) => Err(EngineError::PathOutsideRoot(display_path(relative))),
            Err(e) => {
                self.audit.record(
                    AuditRecord::new(actor, "parent_unresolved", AuditOutcome::Warning)
                        .detail("path", relative)
                        .detail("error", e),
                );
                if lexically_within(&self.root, &parent_abs) {
                    Ok(())
                } else {
                    Err(EngineError::PathOutsideRoot(display_path(relative)))
                }
            }
        }
    }

    /// A creation target that is already a symlink must point inside the root.
    fn check_leaf_link(&self, relative: &str, absolute: &Path) -> Result<()> {
        let is_link = fs::symlink_metadata(absolute)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            return Ok(());
        }

        match fs::canonicalize(absolute) {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(()),
            _ => Err(EngineError::PathOutsideRoot(display_path(relative))),
        }
    }

    fn record_violation(&self, actor: &Actor, raw: &str, error: &EngineError) {
        let action = match error {
            EngineError::PathTraversal(_) => "path_traversal",
            EngineError::PathTooDeep { .. } => "path_too_deep",
            _ => "path_outside_root",
        };

        self.audit.record(
            AuditRecord::new(actor, action, AuditOutcome::Violation)
                .detail("path", raw)
                .detail("error", error),
        );
    }
}

/// Normalize a raw relative path.
///
/// Returns the decoded, forward-slash separated relative path (empty for the
/// root), or `PathTraversal`/`PathTooDeep`.
pub fn normalize(raw: Option<&str>, max_depth: usize) -> Result<String> {
    let raw = raw.unwrap_or("").trim();
    let unified = raw.replace('\\', "/");
    let traversal = || EngineError::PathTraversal(raw.to_string());

    let segments: Vec<&str> = unified.split('/').filter(|s| !s.is_empty()).collect();
    for segment in &segments {
        if segment.to_ascii_lowercase().contains("%2e%2e") {
            return Err(traversal());
        }
        let decoded = percent_decode_str(segment).decode_utf8_lossy();
        if is_dot_segment(&decoded) {
            return Err(traversal());
        }
    }

    let joined = segments.join("/");
    let decoded = percent_decode_str(&joined)
        .decode_utf8()
        .map_err(|_| EngineError::InvalidName(format!("path is not valid UTF-8: {}", raw)))?;

    if decoded.contains('\0') {
        return Err(traversal());
    }

    // Decoding may have produced new separators (%2F, %5C).
    let decoded = decoded.replace('\\', "/");
    let mut clean = Vec::with_capacity(segments.len());
    for segment in decoded.split('/').filter(|s| !s.is_empty()) {
        if is_dot_segment(segment) {
            return Err(traversal());
        }
        clean.push(segment);
    }

    if clean.len() > max_depth {
        return Err(EngineError::PathTooDeep {
            depth: clean.len(),
            max: max_depth,
        });
    }

    Ok(clean.join("/"))
}

fn check_derived(relative: &str) -> Result<String> {
    let traversal = || EngineError::PathTraversal(relative.to_string());
    if relative.contains('\0') || relative.contains('\\') {
        return Err(traversal());
    }

    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| is_dot_segment(s)) {
        return Err(traversal());
    }
    Ok(segments.join("/"))
}

fn is_dot_segment(segment: &str) -> bool {
    if segment == "." || segment == ".." {
        return true;
    }
    // Windows drops trailing dots and spaces, so ". ." or "..." reach the parent.
    cfg!(windows) && segment.trim_end_matches(['.', ' ']).is_empty()
}

#[cfg(windows)]
fn lexically_within(root: &Path, candidate: &Path) -> bool {
    let lower = |p: &Path| PathBuf::from(p.to_string_lossy().to_lowercase());
    lower(candidate).starts_with(lower(root))
}

#[cfg(not(windows))]
fn lexically_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}
