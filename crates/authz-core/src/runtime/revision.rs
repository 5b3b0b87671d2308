// crates/authz-core/src/runtime/revision.rs
// ============================================================================
// Module: File Revision Provider
// Description: Revision file reader with modification-time caching.
// Purpose: Serve the deployed policy revision without re-reading on every call.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! [`FileRevisionProvider`] stats the revision file on each call and only
//! re-reads it when the modification time or size changed. Errors are never
//! cached: a failed read leaves the previous cache entry in place.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::core::revision::RevisionMetadata;
use crate::interfaces::RevisionError;
use crate::interfaces::RevisionProvider;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Cached revision read.
#[derive(Debug, Clone)]
struct CachedRevision {
    /// Modification time of the file when read.
    modified: SystemTime,
    /// File length when read.
    len: u64,
    /// Parsed metadata.
    metadata: RevisionMetadata,
}

/// Revision provider backed by a JSON file.
#[derive(Debug)]
pub struct FileRevisionProvider {
    /// Revision file path; empty means unconfigured.
    path: PathBuf,
    /// Last successful read.
    cache: RwLock<Option<CachedRevision>>,
}

impl FileRevisionProvider {
    /// Creates a provider for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: RwLock::new(None) }
    }

    /// Returns the revision file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the revision file.
    fn read(&self) -> Result<RevisionMetadata, RevisionError> {
        let bytes = fs::read(&self.path).map_err(|err| RevisionError::Io(err.to_string()))?;
        let metadata: RevisionMetadata =
            serde_json::from_slice(&bytes).map_err(|err| RevisionError::Parse(err.to_string()))?;
        if metadata.revision.trim().is_empty() {
            return Err(RevisionError::EmptyRevision);
        }
        Ok(metadata)
    }
}

impl RevisionProvider for FileRevisionProvider {
    fn current(&self) -> Result<RevisionMetadata, RevisionError> {
        if self.path.as_os_str().is_empty() {
            return Err(RevisionError::NotConfigured);
        }
        let stat = fs::metadata(&self.path).map_err(|err| RevisionError::Io(err.to_string()))?;
        let modified = stat.modified().map_err(|err| RevisionError::Io(err.to_string()))?;
        let len = stat.len();
        if let Ok(guard) = self.cache.read()
            && let Some(cached) = guard.as_ref()
            && cached.modified == modified
            && cached.len == len
        {
            return Ok(cached.metadata.clone());
        }
        let metadata = self.read()?;
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(CachedRevision { modified, len, metadata: metadata.clone() });
        }
        Ok(metadata)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;

    #[test]
    fn errors_are_distinct_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.csv.rev");
        let provider = FileRevisionProvider::new(&path);
        assert!(matches!(provider.current(), Err(RevisionError::Io(_))));

        fs::write(&path, r#"{"revision": "  "}"#).unwrap();
        assert_eq!(provider.current(), Err(RevisionError::EmptyRevision));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(provider.current(), Err(RevisionError::Parse(_))));

        fs::write(&path, r#"{"revision":"rev-1","generated_at":"2026-01-02T03:04:05Z","entries":3}"#)
            .unwrap();
        let metadata = provider.current().unwrap();
        assert_eq!(metadata.revision, "rev-1");
        assert_eq!(metadata.entries, 3);
    }

    #[test]
    fn unconfigured_path_is_reported() {
        let provider = FileRevisionProvider::new("");
        assert_eq!(provider.current(), Err(RevisionError::NotConfigured));
    }
}
