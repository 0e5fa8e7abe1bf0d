//! DocStore Core: Embedded Document Store
//!
//! Keyed text and binary documents with word and prefix search, bounded
//! memory and multi-level undo.
//!
//! # Architecture
//!
//! - **Fast tier**: resident documents live in a RAM hash table, counted
//!   against optional count and byte limits
//! - **Disk tier**: the least recently used documents are demoted to one
//!   CRC32C-checked file per key and promoted back on first use
//! - **Search index**: a prefix tree over uppercased alphanumeric words,
//!   covering resident and demoted documents alike
//! - **Undo log**: every mutation pushes a command that reverses it exactly,
//!   including the demotions it caused
//!
//! ```no_run
//! use docstore_core::{DocumentFormat, DocumentKey, DocumentStore, StoreConfig};
//!
//! let mut store = DocumentStore::open(StoreConfig::new("/tmp/docs").with_max_document_count(100))?;
//! let key = DocumentKey::new("http://www.example.com/docs/one")?;
//! store.put(&key, Some(b"the cat sat".as_slice()), DocumentFormat::Text)?;
//! assert_eq!(store.search("cat")?.len(), 1);
//! store.undo()?;
//! # Ok::<(), docstore_core::DocStoreError>(())
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod format;
pub mod index;
pub mod persistence;
pub mod platform_durability;
pub mod recency;
pub mod shared;
pub mod storage;
pub mod store;
pub mod undo;

// Re-export key types for convenience
pub use config::{Limits, StoreConfig};
pub use document::{normalize, Content, Document, DocumentFormat, DocumentKey};
pub use error::{DocResult, DocStoreError};
pub use index::SearchIndex;
pub use persistence::{FilePersistence, PersistenceManager};
pub use recency::RecencyTracker;
pub use shared::SharedDocumentStore;
pub use storage::{DocumentStorage, Residency, TieredStore};
pub use store::{DocumentStore, Usage};
pub use undo::{Command, CompoundCommand, UndoEntry, UndoStack};
