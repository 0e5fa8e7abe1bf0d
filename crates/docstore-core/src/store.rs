//! Document store orchestrator.
//!
//! `DocumentStore` ties the storage tiers, the search index, the recency
//! tracker and the undo log together. Every mutation keeps these in step:
//!
//! - a resident document is tracked by the recency tracker and counted in
//!   [`Usage`]; a demoted one is neither, but stays indexed
//! - the index only references keys with a document in some tier
//! - each `put`/`delete`/bulk delete pushes exactly one undo entry whose
//!   reversal restores index, usage and tracker contents
//!
//! **Eviction**: when a limit would be exceeded, the least recently used
//! resident document is demoted to disk until the limits hold. A document that
//! can never fit (count limit 0, or larger than the byte limit) is tracked like
//! any other and then demoted along with everything else.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::config::{Limits, StoreConfig};
use crate::document::{normalize, Document, DocumentFormat, DocumentKey, UseClock};
use crate::error::{DocResult, DocStoreError};
use crate::index::SearchIndex;
use crate::persistence::{FilePersistence, PersistenceManager};
use crate::recency::RecencyTracker;
use crate::storage::{DocumentStorage, Residency, TieredStore};
use crate::undo::{Command, CompoundCommand, Prior, UndoEntry, UndoStack, UndoTarget};

/// Count and total byte size of resident documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub count: usize,
    pub bytes: usize,
}

/// Embedded document store with bounded memory and undo.
#[derive(Debug)]
pub struct DocumentStore<S: DocumentStorage = TieredStore> {
    storage: S,
    index: SearchIndex<DocumentKey>,
    recency: RecencyTracker<DocumentKey>,
    undo_log: UndoStack<UndoEntry>,
    usage: Usage,
    limits: Limits,
    clock: UseClock,
}

impl DocumentStore<TieredStore<FilePersistence>> {
    /// Open or create a store under `config.base_dir`.
    ///
    /// Documents persisted by a previous session are registered as demoted
    /// and indexed; they are loaded into memory on first use.
    pub fn open(config: StoreConfig) -> DocResult<Self> {
        config.validate()?;
        let persistence = FilePersistence::new(&config.base_dir, config.durable_writes)?;
        let recovered = persistence.recover()?;
        let storage = TieredStore::with_demoted(persistence, recovered.iter().map(|doc| doc.key().clone()));

        let mut store = Self::with_storage(storage);
        for doc in &recovered {
            index_words(&mut store.index, doc);
        }
        store.limits = config.limits();

        info!(
            base_dir = %config.base_dir.display(),
            demoted = recovered.len(),
            max_document_count = ?store.limits.max_document_count,
            max_document_bytes = ?store.limits.max_document_bytes,
            "Document store opened"
        );
        Ok(store)
    }
}

impl<P: PersistenceManager> DocumentStore<TieredStore<P>> {
    /// Demote every resident document so the disk tier holds the full corpus.
    /// Returns how many documents were written.
    pub fn flush(&mut self) -> DocResult<usize> {
        let mut written = 0;
        for key in self.storage.resident_keys() {
            let size = self.storage.peek(&key).map_or(0, Document::size_bytes);
            self.storage.move_to_disk(&key)?;
            let storage = &self.storage;
            if self.recency.remove_key(&key, |k| stamp_of(storage, k)) {
                self.usage.count = self.usage.count.saturating_sub(1);
                self.usage.bytes = self.usage.bytes.saturating_sub(size);
            }
            written += 1;
        }
        info!(written, demoted = self.storage.demoted_len(), "Document store flushed");
        Ok(written)
    }
}

impl<S: DocumentStorage> DocumentStore<S> {
    /// Store over an existing storage backend, with no limits. Documents
    /// already in `storage` are not indexed.
    pub fn with_storage(storage: S) -> Self {
        Self {
            storage,
            index: SearchIndex::new(),
            recency: RecencyTracker::new(),
            undo_log: UndoStack::new(),
            usage: Usage::default(),
            limits: Limits::unlimited(),
            clock: UseClock::new(),
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert or replace the document at `key`; `None` input deletes it.
    ///
    /// Returns the content hash of the document that was replaced or deleted,
    /// or `None` if the key held nothing.
    pub fn put(&mut self, key: &DocumentKey, input: Option<&[u8]>, format: DocumentFormat) -> DocResult<Option<u32>> {
        match input {
            Some(bytes) => {
                let doc = Document::from_bytes(key.clone(), bytes.to_vec(), format)?;
                self.put_document(doc)
            }
            None => self.delete_entry(key),
        }
    }

    /// Insert or replace an already built document.
    pub fn put_document(&mut self, doc: Document) -> DocResult<Option<u32>> {
        let key = doc.key().clone();
        let installed = doc.clone();
        let (previous, demoted) = self.place(doc)?;
        let replaced = previous.as_ref().map(|prior| prior.document.content_hash());

        debug!(
            key = %key,
            bytes = installed.size_bytes(),
            replaced = replaced.is_some(),
            demoted = demoted.len(),
            "Document stored"
        );
        self.undo_log
            .push(UndoEntry::Single(Command::restore(key, Some(installed), previous, demoted)));
        Ok(replaced)
    }

    /// Delete the document at `key`. Returns false if there was none; an
    /// undo entry is pushed either way.
    pub fn delete(&mut self, key: &DocumentKey) -> DocResult<bool> {
        Ok(self.delete_entry(key)?.is_some())
    }

    /// Delete every document containing `word`. Returns the deleted keys.
    pub fn delete_all(&mut self, word: &str) -> DocResult<BTreeSet<DocumentKey>> {
        let keys = self.index.get_all(&query_token(word));
        self.remove_all(keys)
    }

    /// Delete every document containing a word starting with `prefix`.
    pub fn delete_all_with_prefix(&mut self, prefix: &str) -> DocResult<BTreeSet<DocumentKey>> {
        let keys = self.index.get_all_with_prefix(&query_token(prefix));
        self.remove_all(keys)
    }

    /// Set the resident document count limit and evict down to it.
    pub fn set_max_document_count(&mut self, limit: usize) -> DocResult<()> {
        self.limits.max_document_count = Some(limit);
        self.enforce_limits()
    }

    /// Set the resident byte limit and evict down to it.
    pub fn set_max_document_bytes(&mut self, limit: usize) -> DocResult<()> {
        self.limits.max_document_bytes = Some(limit);
        self.enforce_limits()
    }

    /// Replace both limits at once. Unset limits stop constraining residency.
    pub fn set_limits(&mut self, limits: Limits) -> DocResult<()> {
        self.limits = limits;
        self.enforce_limits()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch a document, promoting it from disk if needed.
    pub fn get(&mut self, key: &DocumentKey) -> DocResult<Option<Document>> {
        let now = self.clock.now();
        self.touch(key, now)
    }

    /// Documents containing `word`, most occurrences first.
    pub fn search(&mut self, word: &str) -> DocResult<Vec<Document>> {
        let token = query_token(word);
        let keys = self.index.get_all(&token);
        let mut docs = self.touch_all(&keys)?;
        let ranked = self.index.get_all_sorted(&token, |a, b| {
            let count = |key: &DocumentKey| docs.get(key).map_or(0, |doc| doc.token_count(&token));
            count(b).cmp(&count(a))
        });
        Ok(ranked.into_iter().filter_map(|key| docs.remove(&key)).collect())
    }

    /// Documents containing a word starting with `prefix`, ranked by the
    /// summed occurrences of all such words.
    pub fn search_by_prefix(&mut self, prefix: &str) -> DocResult<Vec<Document>> {
        let token = query_token(prefix);
        let keys = self.index.get_all_with_prefix(&token);
        let mut docs = self.touch_all(&keys)?;
        let ranked = self.index.get_all_with_prefix_sorted(&token, |a, b| {
            let count = |key: &DocumentKey| docs.get(key).map_or(0, |doc| doc.token_prefix_count(&token));
            count(b).cmp(&count(a))
        });
        Ok(ranked.into_iter().filter_map(|key| docs.remove(&key)).collect())
    }

    // ------------------------------------------------------------------
    // Undo
    // ------------------------------------------------------------------

    /// Reverse the most recent mutation.
    pub fn undo(&mut self) -> DocResult<()> {
        let entry = self.undo_log.pop().ok_or(DocStoreError::NoPendingAction)?;
        entry.undo(&mut Rollback(&mut *self))
    }

    /// Reverse the most recent mutation of `key`, leaving other entries in place.
    /// A bulk delete loses only the command for `key` and moves to the top.
    pub fn undo_key(&mut self, key: &DocumentKey) -> DocResult<()> {
        let entry = self
            .undo_log
            .remove_latest(|entry| entry.targets(key))
            .ok_or_else(|| DocStoreError::NoCommandForKey { key: key.to_string() })?;
        match entry {
            UndoEntry::Single(command) => command.undo(&mut Rollback(&mut *self)),
            UndoEntry::Compound(mut compound) => {
                let outcome = compound.undo_key(key, &mut Rollback(&mut *self));
                if !compound.is_empty() {
                    self.undo_log.push(UndoEntry::Compound(compound));
                }
                outcome.map(|_| ())
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of resident documents
    pub fn document_count(&self) -> usize {
        self.usage.count
    }

    /// Combined byte size of resident documents
    pub fn document_bytes(&self) -> usize {
        self.usage.bytes
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn residency(&self, key: &DocumentKey) -> Residency {
        self.storage.residency(key)
    }

    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.storage.residency(key) != Residency::Absent
    }

    pub fn index(&self) -> &SearchIndex<DocumentKey> {
        &self.index
    }

    pub fn recency(&self) -> &RecencyTracker<DocumentKey> {
        &self.recency
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_log.len()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn delete_entry(&mut self, key: &DocumentKey) -> DocResult<Option<u32>> {
        match self.remove_document(key)? {
            Some((document, resident)) => {
                let hash = document.content_hash();
                debug!(key = %key, resident, "Document deleted");
                let prior = Prior { document, resident };
                self.undo_log
                    .push(UndoEntry::Single(Command::restore(key.clone(), None, Some(prior), Vec::new())));
                Ok(Some(hash))
            }
            None => {
                self.undo_log.push(UndoEntry::Single(Command::vacant(key.clone())));
                Ok(None)
            }
        }
    }

    /// Remove each matched document with all of its tokens. A document that
    /// cannot be removed stays fully indexed and out of the compound.
    fn remove_all(&mut self, keys: Vec<DocumentKey>) -> DocResult<BTreeSet<DocumentKey>> {
        let mut compound = CompoundCommand::new();
        let mut removed = BTreeSet::new();
        let mut failure = None;
        for key in keys {
            match self.remove_document(&key) {
                Ok(Some((document, resident))) => {
                    compound.push(Command::restore(key.clone(), None, Some(Prior { document, resident }), Vec::new()));
                    removed.insert(key);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to remove document during bulk delete");
                    failure.get_or_insert(e);
                }
            }
        }
        debug!(removed = compound.len(), "Bulk delete");
        self.undo_log.push(UndoEntry::Compound(compound));
        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Drop `key` from every structure. Returns the document and whether it was resident.
    fn remove_document(&mut self, key: &DocumentKey) -> DocResult<Option<(Document, bool)>> {
        let resident = self.release(key);
        let Some(doc) = self.storage.remove(key)? else {
            return Ok(None);
        };
        unindex_words(&mut self.index, &doc);
        Ok(Some((doc, resident)))
    }

    /// Store `doc` in memory and index it, replacing any previous version.
    /// The new document is not yet tracked or counted.
    fn install(&mut self, doc: Document) -> DocResult<Option<Prior>> {
        let key = doc.key().clone();
        let resident = self.release(&key);
        let previous = self.storage.put(doc)?;
        if let Some(previous) = &previous {
            unindex_words(&mut self.index, previous);
        }
        if let Some(placed) = self.storage.peek(&key) {
            index_words(&mut self.index, placed);
        }
        Ok(previous.map(|document| Prior { document, resident }))
    }

    /// Install `doc` as a resident document. Returns what it displaced and
    /// the keys demoted to make room.
    fn place(&mut self, doc: Document) -> DocResult<(Option<Prior>, Vec<DocumentKey>)> {
        let key = doc.key().clone();
        let previous = self.install(doc)?;
        let now = self.clock.now();
        let demoted = self.admit(&key, now)?;
        Ok((previous, demoted))
    }

    /// Stop tracking a resident document. Returns false if it was not resident.
    fn release(&mut self, key: &DocumentKey) -> bool {
        let storage = &self.storage;
        if !self.recency.remove_key(key, |k| stamp_of(storage, k)) {
            return false;
        }
        let size = self.storage.peek(key).map_or(0, Document::size_bytes);
        self.usage.count = self.usage.count.saturating_sub(1);
        self.usage.bytes = self.usage.bytes.saturating_sub(size);
        true
    }

    /// Start tracking an in-memory document.
    fn track(&mut self, key: &DocumentKey, size: usize) {
        let storage = &self.storage;
        if self.recency.insert(key.clone(), |k| stamp_of(storage, k)) {
            self.usage.count += 1;
            self.usage.bytes += size;
        }
    }

    /// Make an untracked in-memory (or demoted) document resident at `stamp`,
    /// evicting as needed. Returns the demoted keys.
    fn admit(&mut self, key: &DocumentKey, stamp: u64) -> DocResult<Vec<DocumentKey>> {
        let size = match self.storage.get(key)? {
            Some(doc) => {
                doc.set_last_used(stamp);
                doc.size_bytes()
            }
            None => return Ok(Vec::new()),
        };

        let mut demoted = Vec::new();
        if self.limits.forces_full_eviction(size) {
            self.track(key, size);
            while self.usage.count > 0 {
                match self.evict_one()? {
                    Some(victim) => demoted.push(victim),
                    None => break,
                }
            }
        } else {
            while self.usage.count > 0 && !self.limits.admits(self.usage.count, self.usage.bytes, size) {
                match self.evict_one()? {
                    Some(victim) => demoted.push(victim),
                    None => break,
                }
            }
            self.track(key, size);
        }
        Ok(demoted)
    }

    fn enforce_limits(&mut self) -> DocResult<()> {
        if !self.limits.is_bounded() {
            return Ok(());
        }
        let mut demoted = 0usize;
        while self.usage.count > 0 && self.limits.exceeded_by(self.usage.count, self.usage.bytes) {
            match self.evict_one()? {
                Some(_) => demoted += 1,
                None => break,
            }
        }
        if demoted > 0 {
            debug!(demoted, count = self.usage.count, bytes = self.usage.bytes, "Limits enforced");
        }
        Ok(())
    }

    /// Demote the least recently used resident document.
    ///
    /// Demotion is best effort: on a write failure the victim is tracked
    /// again and `None` is returned so the caller stops evicting.
    fn evict_one(&mut self) -> DocResult<Option<DocumentKey>> {
        let storage = &self.storage;
        let victim = self.recency.remove(|k| stamp_of(storage, k))?;
        let size = self.storage.peek(&victim).map_or(0, Document::size_bytes);
        self.usage.count = self.usage.count.saturating_sub(1);
        self.usage.bytes = self.usage.bytes.saturating_sub(size);

        match self.storage.move_to_disk(&victim) {
            Ok(()) => {
                debug!(key = %victim, bytes = size, "Evicted least recently used document");
                Ok(Some(victim))
            }
            Err(e) => {
                warn!(key = %victim, error = %e, "Failed to demote document, keeping it resident");
                self.track(&victim, size);
                Ok(None)
            }
        }
    }

    /// Mark `key` used at `stamp` and return a copy of it.
    fn touch(&mut self, key: &DocumentKey, stamp: u64) -> DocResult<Option<Document>> {
        let residency = self.storage.residency(key);
        if residency == Residency::Absent {
            return Ok(None);
        }
        let doc = match self.storage.get(key)? {
            Some(doc) => {
                doc.set_last_used(stamp);
                doc.clone()
            }
            None => return Ok(None),
        };
        if residency == Residency::Disk {
            self.admit(key, stamp)?;
        } else {
            let storage = &self.storage;
            self.recency.reheapify(key, |k| stamp_of(storage, k))?;
        }
        Ok(Some(doc))
    }

    /// Touch every key with one shared stamp.
    fn touch_all(&mut self, keys: &[DocumentKey]) -> DocResult<HashMap<DocumentKey, Document>> {
        let stamp = self.clock.now();
        let mut docs = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.touch(key, stamp)? {
                docs.insert(key.clone(), doc);
            }
        }
        Ok(docs)
    }
}

/// Applies undo commands to a store.
struct Rollback<'a, S: DocumentStorage>(&'a mut DocumentStore<S>);

impl<S: DocumentStorage> UndoTarget for Rollback<'_, S> {
    fn uninstall(&mut self, doc: &Document) -> DocResult<()> {
        match self.0.remove_document(doc.key())? {
            Some((current, _)) if current != *doc => {
                warn!(key = %doc.key(), "Undo removed a document that differs from the one installed");
            }
            None => warn!(key = %doc.key(), "Undo found no document to remove"),
            Some(_) => {}
        }
        Ok(())
    }

    fn repromote(&mut self, key: &DocumentKey) -> DocResult<()> {
        let store = &mut *self.0;
        if store.storage.residency(key) == Residency::Disk {
            let now = store.clock.now();
            store.admit(key, now)?;
            debug!(key = %key, "Undo promoted document back to memory");
        }
        Ok(())
    }

    fn reinstall(&mut self, prior: Prior) -> DocResult<()> {
        let store = &mut *self.0;
        let key = prior.document.key().clone();
        if prior.resident {
            store.place(prior.document)?;
            return Ok(());
        }
        store.install(prior.document)?;
        if let Err(e) = store.storage.move_to_disk(&key) {
            warn!(key = %key, error = %e, "Failed to return document to disk, keeping it resident");
            let now = store.clock.now();
            store.admit(&key, now)?;
        }
        Ok(())
    }
}

fn query_token(query: &str) -> String {
    normalize(query).trim().to_string()
}

fn stamp_of<S: DocumentStorage>(storage: &S, key: &DocumentKey) -> Option<u64> {
    storage.peek(key).map(Document::last_used)
}

fn index_words(index: &mut SearchIndex<DocumentKey>, doc: &Document) {
    for word in doc.words() {
        if let Err(e) = index.put(word, doc.key().clone()) {
            warn!(key = %doc.key(), word, error = %e, "Skipping unindexable word");
        }
    }
}

fn unindex_words(index: &mut SearchIndex<DocumentKey>, doc: &Document) {
    for word in doc.words() {
        index.delete(word, doc.key());
    }
}
