//! User-supplied file and folder name cleaning.

use unicode_normalization::UnicodeNormalization;

use crate::error::{EngineError, Result};

/// Characters replaced with `_` besides separators and control characters.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Cleans names before they become path segments.
#[derive(Debug, Clone, Copy)]
pub struct NameSanitizer {
    max_length: usize,
}

impl Default for NameSanitizer {
    fn default() -> Self {
        Self::new(255)
    }
}

impl NameSanitizer {
    /// Create a sanitizer limiting names to `max_length` characters.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Clean a name. The result may be empty.
    ///
    /// NFC-normalizes, replaces separators, control and reserved characters
    /// with `_`, collapses whitespace, strips leading and trailing dots and
    /// spaces, then truncates to the length limit keeping the extension.
    pub fn sanitize(&self, name: &str) -> String {
        let normalized: String = name.trim().nfc().collect();

        let mut cleaned = String::with_capacity(normalized.len());
        let mut in_whitespace = false;
        for c in normalized.chars() {
            let c = if c == '/' || c == '\\' || c.is_control() || FORBIDDEN_CHARS.contains(&c) {
                '_'
            } else {
                c
            };

            if c.is_whitespace() {
                if !in_whitespace {
                    cleaned.push(' ');
                }
                in_whitespace = true;
            } else {
                cleaned.push(c);
                in_whitespace = false;
            }
        }

        let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
        self.truncate(trimmed)
    }

    /// Clean a name and reject results that cannot be used as a segment.
    pub fn sanitize_checked(&self, name: &str) -> Result<String> {
        let sanitized = self.sanitize(name);
        if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        Ok(sanitized)
    }

    fn truncate(&self, name: &str) -> String {
        if name.chars().count() <= self.max_length {
            return name.to_string();
        }

        if let (stem, Some(ext)) = split_extension(name) {
            let ext_len = ext.chars().count();
            if ext_len + 1 < self.max_length {
                let keep = self.max_length - ext_len - 1;
                let stem: String = stem.chars().take(keep).collect();
                return format!("{}.{}", trim_tail(&stem), ext);
            }
        }

        let cut: String = name.chars().take(self.max_length).collect();
        trim_tail(&cut).to_string()
    }
}

/// A cut can expose dots or spaces that the earlier trim removed.
fn trim_tail(name: &str) -> &str {
    name.trim_end_matches(|c| c == '.' || c == ' ')
}

/// Split a name into stem and extension.
///
/// A name whose only dot is the leading one (`.env`) has no extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// The `n`th collision-free alternative: `stem (n).ext`.
pub fn collision_candidate(stem: &str, ext: Option<&str>, n: usize) -> String {
    match ext {
        Some(ext) => format!("{} ({}).{}", stem, n, ext),
        None => format!("{} ({})", stem, n),
    }
}
