//! Configuration management for the document store
//!
//! Memory limits are optional: an unset limit never triggers eviction.
//! Limits can also be changed at runtime through
//! `DocumentStore::set_max_document_count` / `set_max_document_bytes`.

use std::path::PathBuf;

use crate::error::{DocResult, DocStoreError};

/// Memory limits for resident documents. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of resident documents
    pub max_document_count: Option<usize>,
    /// Maximum combined byte size of resident documents
    pub max_document_bytes: Option<usize>,
}

impl Limits {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// True if either limit is set.
    pub fn is_bounded(&self) -> bool {
        self.max_document_count.is_some() || self.max_document_bytes.is_some()
    }

    /// True if `count`/`bytes` already violate a configured limit.
    pub fn exceeded_by(&self, count: usize, bytes: usize) -> bool {
        self.max_document_count.map_or(false, |max| count > max)
            || self.max_document_bytes.map_or(false, |max| bytes > max)
    }

    /// True if one more document of `size` bytes fits on top of `count`/`bytes`.
    pub fn admits(&self, count: usize, bytes: usize, size: usize) -> bool {
        !self.exceeded_by(count.saturating_add(1), bytes.saturating_add(size))
    }

    /// True if a document of `size` bytes can never be resident under these limits,
    /// which forces every resident document (the new one included) to disk.
    pub fn forces_full_eviction(&self, size: usize) -> bool {
        self.max_document_count == Some(0) || self.max_document_bytes.map_or(false, |max| size > max)
    }
}

/// Document store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one persisted file per demoted document
    pub base_dir: PathBuf,
    /// Optional resident document count limit
    pub max_document_count: Option<usize>,
    /// Optional resident byte limit
    pub max_document_bytes: Option<usize>,
    /// Sync every persisted document (and its directory) before returning
    pub durable_writes: bool,
}

impl StoreConfig {
    /// Unlimited store persisting under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_document_count: None,
            max_document_bytes: None,
            durable_writes: true,
        }
    }

    pub fn with_max_document_count(mut self, limit: usize) -> Self {
        self.max_document_count = Some(limit);
        self
    }

    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = Some(limit);
        self
    }

    /// Disabling durable writes skips fsync; documents still reach the page cache.
    pub fn with_durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = durable;
        self
    }

    /// The limit pair applied when the store is opened.
    pub fn limits(&self) -> Limits {
        Limits {
            max_document_count: self.max_document_count,
            max_document_bytes: self.max_document_bytes,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> DocResult<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(DocStoreError::invalid("base_dir must not be empty"));
        }
        if self.base_dir.is_file() {
            return Err(DocStoreError::invalid(format!(
                "base_dir {} is a file, expected a directory",
                self.base_dir.display()
            )));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self { Self::new(".") }
}
