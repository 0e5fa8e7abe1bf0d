//! Thread-shareable handle over one document store.
//!
//! The store itself is single-threaded. `SharedDocumentStore` serializes every
//! call through one mutex, so each operation (including the evictions and undo
//! bookkeeping it triggers) runs to completion before the next one starts.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::config::StoreConfig;
use crate::document::{Document, DocumentFormat, DocumentKey};
use crate::error::DocResult;
use crate::storage::{DocumentStorage, Residency, TieredStore};
use crate::store::{DocumentStore, Usage};

/// Cloneable, mutex-guarded [`DocumentStore`].
pub struct SharedDocumentStore<S: DocumentStorage = TieredStore> {
    inner: Arc<Mutex<DocumentStore<S>>>,
}

impl<S: DocumentStorage> Clone for SharedDocumentStore<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl SharedDocumentStore {
    pub fn open(config: StoreConfig) -> DocResult<Self> {
        Ok(Self::new(DocumentStore::open(config)?))
    }
}

impl<S: DocumentStorage> SharedDocumentStore<S> {
    pub fn new(store: DocumentStore<S>) -> Self {
        Self { inner: Arc::new(Mutex::new(store)) }
    }

    /// Hold the lock for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, DocumentStore<S>> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the store.
    pub fn with<R>(&self, f: impl FnOnce(&mut DocumentStore<S>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn put(&self, key: &DocumentKey, input: Option<&[u8]>, format: DocumentFormat) -> DocResult<Option<u32>> {
        self.inner.lock().put(key, input, format)
    }

    pub fn get(&self, key: &DocumentKey) -> DocResult<Option<Document>> {
        self.inner.lock().get(key)
    }

    pub fn delete(&self, key: &DocumentKey) -> DocResult<bool> {
        self.inner.lock().delete(key)
    }

    pub fn undo(&self) -> DocResult<()> {
        self.inner.lock().undo()
    }

    pub fn undo_key(&self, key: &DocumentKey) -> DocResult<()> {
        self.inner.lock().undo_key(key)
    }

    pub fn search(&self, word: &str) -> DocResult<Vec<Document>> {
        self.inner.lock().search(word)
    }

    pub fn search_by_prefix(&self, prefix: &str) -> DocResult<Vec<Document>> {
        self.inner.lock().search_by_prefix(prefix)
    }

    pub fn delete_all(&self, word: &str) -> DocResult<BTreeSet<DocumentKey>> {
        self.inner.lock().delete_all(word)
    }

    pub fn delete_all_with_prefix(&self, prefix: &str) -> DocResult<BTreeSet<DocumentKey>> {
        self.inner.lock().delete_all_with_prefix(prefix)
    }

    pub fn set_max_document_count(&self, limit: usize) -> DocResult<()> {
        self.inner.lock().set_max_document_count(limit)
    }

    pub fn set_max_document_bytes(&self, limit: usize) -> DocResult<()> {
        self.inner.lock().set_max_document_bytes(limit)
    }

    pub fn usage(&self) -> Usage {
        self.inner.lock().usage()
    }

    pub fn residency(&self, key: &DocumentKey) -> Residency {
        self.inner.lock().residency(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_concurrent_writers_share_one_store() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDocumentStore::open(
            StoreConfig::new(dir.path()).with_max_document_count(8).with_durable_writes(false),
        )
        .unwrap();

        let mut handles = vec![];
        for t in 0..4 {
            let store = shared.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    let key = DocumentKey::new(format!("http://host/t{}/d{}", t, i)).unwrap();
                    let text = format!("shared thread{} item{}", t, i);
                    store.put(&key, Some(text.as_bytes()), DocumentFormat::Text).unwrap();
                }
            }));
        }
        for h in handles { h.join().unwrap(); }

        assert_eq!(shared.usage().count, 8);
        assert_eq!(shared.search("shared").unwrap().len(), 40);
        assert_eq!(shared.search_by_prefix("thread").unwrap().len(), 40);
        assert_eq!(shared.with(|store| store.undo_depth()), 40);
    }

    #[test]
    fn test_lock_spans_several_operations() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDocumentStore::open(StoreConfig::new(dir.path()).with_durable_writes(false)).unwrap();
        let key = DocumentKey::new("notes/a").unwrap();
        {
            let mut store = shared.lock();
            store.put(&key, Some(b"one".as_slice()), DocumentFormat::Text).unwrap();
            store.undo().unwrap();
        }
        assert_eq!(shared.residency(&key), Residency::Absent);
        assert!(shared.get(&key).unwrap().is_none());
    }
}
