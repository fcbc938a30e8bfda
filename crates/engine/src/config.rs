//! Configuration management for the SFiles engine.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/sfiles/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("per_page must be between 1 and 1000, got {0}")]
    InvalidPerPage(usize),

    #[error("max_path_depth must be between 1 and 255, got {0}")]
    InvalidMaxPathDepth(usize),

    #[error("max_filename_length must be between 16 and 1024, got {0}")]
    InvalidMaxFilenameLength(usize),

    #[error("max_archive_files must be at least 1, got {0}")]
    InvalidMaxArchiveFiles(usize),

    #[error("max_file_size must be greater than 0, got {0}")]
    InvalidMaxFileSize(u64),

    #[error("cache ttl_secs must be at most 86400, got {0}")]
    InvalidCacheTtl(u64),

    #[error("storage root must not be empty")]
    EmptyRoot,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the SFiles engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Storage root and public URL prefix.
    pub storage: StorageConfig,

    /// Directory listing settings.
    pub listing: ListingConfig,

    /// Listing cache settings.
    pub cache: CacheConfig,

    /// Path and archive limits.
    pub security: SecurityConfig,

    /// Upload restrictions.
    pub upload: UploadConfig,

    /// Archive building settings.
    pub archive: ArchiveConfig,

    /// Logging and audit settings.
    pub logging: LoggingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory every operation is confined to.
    pub root: PathBuf,

    /// Prefix joined with relative paths to form public paths.
    pub public_prefix: String,
}

/// Listing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListingConfig {
    /// Entries per page.
    pub per_page: usize,
}

/// Listing cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether listings are cached at all.
    pub enabled: bool,

    /// Seconds before a cached listing expires.
    pub ttl_secs: u64,
}

/// Security limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum number of segments in a relative path.
    pub max_path_depth: usize,

    /// Maximum length of a sanitized name, in characters.
    pub max_filename_length: usize,

    /// Maximum number of files in one bulk archive.
    pub max_archive_files: usize,
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum upload size in bytes (default: 10MB).
    pub max_file_size: u64,

    /// Extensions always rejected, compared case-insensitively.
    pub blocked_extensions: Vec<String>,

    /// Extensions accepted. Empty means any extension not blocked.
    pub allowed_extensions: Vec<String>,

    /// Content types accepted, detected from the file bytes. Empty disables
    /// content type checks.
    pub allowed_mimes: Vec<String>,
}

/// Archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory for temporary zip files. Defaults to the OS temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit audit records. When false, audit records are discarded.
    pub audit_enabled: bool,

    /// Directory for daily rolling audit log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./uploads"),
            public_prefix: "uploads".to_string(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { per_page: 50 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300, // 5 minutes
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_path_depth: 20,
            max_filename_length: 255,
            max_archive_files: 300,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            blocked_extensions: default_blocked_extensions(),
            allowed_extensions: Vec::new(),
            allowed_mimes: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            audit_enabled: true,
            audit_dir: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sfiles")
        .join("config.toml")
}

fn default_blocked_extensions() -> Vec<String> {
    [
        "php", "php3", "php4", "php5", "phtml", "phar", "exe", "com", "sh", "bat", "cmd", "js",
        "jsp", "asp", "aspx", "cgi", "pl", "py", "htaccess",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl UploadConfig {
    /// Whether `ext` is rejected by the blocklist or missing from a
    /// non-empty allowlist.
    pub fn rejects_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        if self
            .blocked_extensions
            .iter()
            .any(|b| b.eq_ignore_ascii_case(&ext))
        {
            return true;
        }
        !self.allowed_extensions.is_empty()
            && !self
                .allowed_extensions
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&ext))
    }

    /// Whether `ext` is named in the allowlist.
    pub fn lists_extension(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|a| a.eq_ignore_ascii_case(ext))
    }

    /// Whether content type checks apply and accept `mime`.
    pub fn accepts_mime(&self, mime: &str) -> bool {
        self.allowed_mimes
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime))
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SFILES_ROOT: Override the storage root
    /// - SFILES_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("SFILES_ROOT") {
            if !root.is_empty() {
                tracing::info!(root = %root, "Overriding storage root from environment");
                self.storage.root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("SFILES_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!(level = %level, "Overriding log_level from environment");
                self.logging.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }

        if !(1..=1000).contains(&self.listing.per_page) {
            return Err(ConfigError::InvalidPerPage(self.listing.per_page));
        }

        if !(1..=255).contains(&self.security.max_path_depth) {
            return Err(ConfigError::InvalidMaxPathDepth(self.security.max_path_depth));
        }

        if !(16..=1024).contains(&self.security.max_filename_length) {
            return Err(ConfigError::InvalidMaxFilenameLength(
                self.security.max_filename_length,
            ));
        }

        if self.security.max_archive_files < 1 {
            return Err(ConfigError::InvalidMaxArchiveFiles(
                self.security.max_archive_files,
            ));
        }

        if self.upload.max_file_size == 0 {
            return Err(ConfigError::InvalidMaxFileSize(self.upload.max_file_size));
        }

        if self.cache.ttl_secs > 86400 {
            return Err(ConfigError::InvalidCacheTtl(self.cache.ttl_secs));
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = ?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!(path = ?path, "Configuration saved");
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
