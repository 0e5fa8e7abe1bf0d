//! Two-tier document storage: an in-memory fast tier backed by a disk tier.
//!
//! Every key lives in at most one tier. Reading a demoted document through
//! [`DocumentStorage::get`] promotes it back into memory and consumes the
//! disk copy; [`DocumentStorage::move_to_disk`] does the opposite.
//!
//! The storage layer knows nothing about limits, recency or the search index.
//! Those belong to the orchestrating `DocumentStore`.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::document::{Document, DocumentKey};
use crate::error::{DocResult, DocStoreError};
use crate::persistence::{FilePersistence, PersistenceManager};

/// Where a key's document currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    /// No document under this key
    Absent,
    /// In the fast tier, counted against memory limits
    Memory,
    /// Demoted to the disk tier
    Disk,
}

/// Key/value contract between the orchestrator and its backing tiers.
pub trait DocumentStorage {
    /// Which tier holds `key`, if any. Never touches the disk tier's contents.
    fn residency(&self, key: &DocumentKey) -> Residency;

    /// Upsert into the fast tier, returning the displaced document.
    /// A displaced demoted document is read back and its disk copy removed.
    fn put(&mut self, doc: Document) -> DocResult<Option<Document>>;

    /// Remove `key` from whichever tier holds it.
    fn remove(&mut self, key: &DocumentKey) -> DocResult<Option<Document>>;

    /// Fetch `key`, promoting it into the fast tier if it was demoted.
    fn get(&mut self, key: &DocumentKey) -> DocResult<Option<&mut Document>>;

    /// Fast tier lookup only.
    fn peek(&self, key: &DocumentKey) -> Option<&Document>;

    /// Demote a resident document. The disk copy is written before the
    /// memory copy is dropped. Demoting an already demoted key is a no-op.
    fn move_to_disk(&mut self, key: &DocumentKey) -> DocResult<()>;

    /// Keys currently held in the fast tier.
    fn resident_keys(&self) -> Vec<DocumentKey>;
}

/// Hash map fast tier plus a [`PersistenceManager`] disk tier.
#[derive(Debug)]
pub struct TieredStore<P: PersistenceManager = FilePersistence> {
    memory: HashMap<DocumentKey, Document>,
    on_disk: HashSet<DocumentKey>,
    persistence: P,
}

impl<P: PersistenceManager> TieredStore<P> {
    pub fn new(persistence: P) -> Self {
        Self { memory: HashMap::new(), on_disk: HashSet::new(), persistence }
    }

    /// Store whose disk tier already holds `keys`, e.g. after recovery.
    pub fn with_demoted(persistence: P, keys: impl IntoIterator<Item = DocumentKey>) -> Self {
        Self { memory: HashMap::new(), on_disk: keys.into_iter().collect(), persistence }
    }

    pub fn resident_len(&self) -> usize {
        self.memory.len()
    }

    pub fn demoted_len(&self) -> usize {
        self.on_disk.len()
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Read back a demoted document and drop it from the disk tier.
    fn take_from_disk(&mut self, key: &DocumentKey) -> DocResult<Option<Document>> {
        if !self.on_disk.contains(key) {
            return Ok(None);
        }
        let doc = self.persistence.deserialize(key)?;
        self.on_disk.remove(key);
        if doc.is_none() {
            warn!(key = %key, "Demoted document missing from disk tier");
        }
        Ok(doc)
    }
}

impl<P: PersistenceManager> DocumentStorage for TieredStore<P> {
    fn residency(&self, key: &DocumentKey) -> Residency {
        if self.memory.contains_key(key) {
            Residency::Memory
        } else if self.on_disk.contains(key) {
            Residency::Disk
        } else {
            Residency::Absent
        }
    }

    fn put(&mut self, doc: Document) -> DocResult<Option<Document>> {
        let demoted = self.take_from_disk(doc.key())?;
        let resident = self.memory.insert(doc.key().clone(), doc);
        Ok(resident.or(demoted))
    }

    fn remove(&mut self, key: &DocumentKey) -> DocResult<Option<Document>> {
        if let Some(doc) = self.memory.remove(key) {
            return Ok(Some(doc));
        }
        self.take_from_disk(key)
    }

    fn get(&mut self, key: &DocumentKey) -> DocResult<Option<&mut Document>> {
        if !self.memory.contains_key(key) {
            if let Some(doc) = self.take_from_disk(key)? {
                debug!(key = %key, bytes = doc.size_bytes(), "Document promoted to memory");
                self.memory.insert(key.clone(), doc);
            }
        }
        Ok(self.memory.get_mut(key))
    }

    fn peek(&self, key: &DocumentKey) -> Option<&Document> {
        self.memory.get(key)
    }

    fn move_to_disk(&mut self, key: &DocumentKey) -> DocResult<()> {
        if self.on_disk.contains(key) {
            return Ok(());
        }
        let doc = self
            .memory
            .get(key)
            .ok_or_else(|| DocStoreError::invalid(format!("cannot demote {}: no such document", key)))?;
        self.persistence.serialize(key, doc)?;
        if let Some(doc) = self.memory.remove(key) {
            debug!(key = %key, bytes = doc.size_bytes(), "Document demoted to disk");
        }
        self.on_disk.insert(key.clone());
        Ok(())
    }

    fn resident_keys(&self) -> Vec<DocumentKey> {
        self.memory.keys().cloned().collect()
    }
}
