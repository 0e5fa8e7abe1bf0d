//! Disk tier for demoted documents
//!
//! Each demoted document lives in its own file, named after its key. The key
//! is split on `/` and every piece becomes one path component, with bytes
//! outside `[a-z0-9_~-]` percent-encoded and an empty piece written as `%`.
//! `http://www.example.com/docs/One` is stored at
//! `<base_dir>/http%3A/%/www%2Eexample%2Ecom/docs/%4Fne.doc`.
//!
//! Distinct keys always get distinct files: the encoding can be reversed, no
//! directory name contains a `.`, and upper case never reaches the file
//! system, so case-insensitive volumes cannot merge two keys either.
//!
//! Writes use the atomic rename pattern for crash safety:
//! 1. Write the record to `<name>.doc.tmp`
//! 2. durable_sync the temp file
//! 3. Rename over `<name>.doc`
//! 4. Sync the parent directory
//!
//! A crash before the rename leaves an orphaned temp file, which recovery ignores.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{Document, DocumentKey};
use crate::error::{DocResult, DocStoreError};
use crate::format::{decode_document, encode_document};
use crate::platform_durability::{durable_sync, sync_directory};

/// File extension of a persisted document
pub const DOC_EXTENSION: &str = "doc";

/// Key/value persistence contract used by the tiered storage.
///
/// `deserialize` consumes the persisted copy: after a successful read the
/// document exists only in memory.
pub trait PersistenceManager {
    /// Persist `doc` under `key`, replacing any previous copy.
    fn serialize(&mut self, key: &DocumentKey, doc: &Document) -> DocResult<()>;

    /// Read back and remove the document stored under `key`.
    fn deserialize(&mut self, key: &DocumentKey) -> DocResult<Option<Document>>;

    /// Remove the persisted copy. Returns true if one existed.
    fn delete(&mut self, key: &DocumentKey) -> DocResult<bool>;

    /// Every document currently persisted, for rebuilding state on open.
    fn recover(&self) -> DocResult<Vec<Document>>;
}

/// One-file-per-document persistence rooted at a base directory.
#[derive(Debug)]
pub struct FilePersistence {
    base_dir: PathBuf,
    durable: bool,
}

impl FilePersistence {
    /// Open (creating if needed) a persistence directory.
    pub fn new(base_dir: impl Into<PathBuf>, durable: bool) -> DocResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .map_err(|e| DocStoreError::io_at(&base_dir, "Failed to create document directory", e))?;
        Ok(Self { base_dir, durable })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Location of the persisted copy of `key`.
    pub fn path_for(&self, key: &DocumentKey) -> PathBuf {
        let mut path = self.base_dir.clone();
        let mut pieces = key.as_str().split('/').peekable();
        while let Some(piece) = pieces.next() {
            let name = encode_path_piece(piece);
            if pieces.peek().is_some() {
                path.push(name);
            } else {
                path.push(format!("{}.{}", name, DOC_EXTENSION));
            }
        }
        path
    }

    fn read_file(path: &Path) -> DocResult<Option<Vec<u8>>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DocStoreError::io_at(path, "Failed to open document file", e)),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| DocStoreError::io_at(path, "Failed to read document file", e))?;
        Ok(Some(bytes))
    }

    fn remove_file(&self, path: &Path) -> DocResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(DocStoreError::io_at(path, "Failed to remove document file", e)),
        }
        self.prune_empty_parents(path);
        Ok(true)
    }

    /// Remove now-empty directories between `path` and the base directory.
    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.base_dir || !current.starts_with(&self.base_dir) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// Reversible file-name encoding of one `/`-separated piece of a key.
fn encode_path_piece(piece: &str) -> String {
    if piece.is_empty() {
        return "%".to_string();
    }
    let mut name = String::with_capacity(piece.len());
    for byte in piece.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'_' | b'~' | b'-' => name.push(byte as char),
            _ => name.push_str(&format!("%{:02X}", byte)),
        }
    }
    name
}

impl PersistenceManager for FilePersistence {
    fn serialize(&mut self, key: &DocumentKey, doc: &Document) -> DocResult<()> {
        let record = encode_document(doc)?;
        let path = self.path_for(key);
        let parent = path.parent().unwrap_or(&self.base_dir).to_path_buf();
        fs::create_dir_all(&parent)
            .map_err(|e| DocStoreError::io_at(&parent, "Failed to create document directory", e))?;

        let tmp_path = path.with_extension(format!("{}.tmp", DOC_EXTENSION));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| DocStoreError::io_at(&tmp_path, "Failed to create temp document file", e))?;
        file.write_all(&record)
            .map_err(|e| DocStoreError::io_at(&tmp_path, "Failed to write document file", e))?;
        if self.durable {
            durable_sync(&file).map_err(|e| DocStoreError::io_at(&tmp_path, "Failed to sync document file", e))?;
        }
        drop(file);

        fs::rename(&tmp_path, &path)
            .map_err(|e| DocStoreError::io_at(&path, "Failed to rename document file", e))?;
        if self.durable {
            sync_directory(&parent)
                .map_err(|e| DocStoreError::io_at(&parent, "Failed to sync document directory", e))?;
        }

        debug!(key = %key, path = %path.display(), bytes = record.len(), "Document persisted");
        Ok(())
    }

    fn deserialize(&mut self, key: &DocumentKey) -> DocResult<Option<Document>> {
        let path = self.path_for(key);
        let Some(bytes) = Self::read_file(&path)? else {
            return Ok(None);
        };
        let doc = decode_document(&bytes, &path)?;
        if doc.key() != key {
            return Err(DocStoreError::Corrupted {
                path,
                reason: format!("record holds key {}, expected {}", doc.key(), key),
            });
        }
        self.remove_file(&path)?;
        debug!(key = %key, path = %path.display(), "Document loaded from disk");
        Ok(Some(doc))
    }

    fn delete(&mut self, key: &DocumentKey) -> DocResult<bool> {
        let path = self.path_for(key);
        let removed = self.remove_file(&path)?;
        if removed {
            debug!(key = %key, path = %path.display(), "Persisted document removed");
        }
        Ok(removed)
    }

    fn recover(&self) -> DocResult<Vec<Document>> {
        let mut docs = Vec::new();
        for entry in WalkDir::new(&self.base_dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry in document directory");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != DOC_EXTENSION) {
                continue;
            }
            let decoded = Self::read_file(path).and_then(|bytes| match bytes {
                Some(bytes) => decode_document(&bytes, path).map(Some),
                None => Ok(None),
            });
            match decoded {
                Ok(Some(doc)) if self.path_for(doc.key()) == path => docs.push(doc),
                Ok(Some(doc)) => {
                    warn!(path = %path.display(), key = %doc.key(), "Skipping document stored under a foreign path");
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document file"),
            }
        }
        info!(base_dir = %self.base_dir.display(), count = docs.len(), "Recovered persisted documents");
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_persistence() -> (FilePersistence, TempDir) {
        let dir = TempDir::new().unwrap();
        let persistence = FilePersistence::new(dir.path(), true).unwrap();
        (persistence, dir)
    }

    fn text_doc(key: &str, text: &str) -> Document {
        Document::text(DocumentKey::new(key).unwrap(), text).unwrap()
    }

    #[test]
    fn test_path_for_mirrors_key() {
        let (persistence, dir) = test_persistence();
        let key = DocumentKey::new("http://www.example.com/docs/One").unwrap();
        assert_eq!(
            persistence.path_for(&key),
            dir.path()
                .join("http%3A")
                .join("%")
                .join("www%2Eexample%2Ecom")
                .join("docs")
                .join("%4Fne.doc")
        );
        let plain = DocumentKey::new("notes/to-do_list").unwrap();
        assert_eq!(persistence.path_for(&plain), dir.path().join("notes").join("to-do_list.doc"));
    }

    #[test]
    fn test_similar_keys_get_distinct_files() {
        let (mut persistence, _dir) = test_persistence();
        let docs = [
            text_doc("http://host/a", "plain"),
            text_doc("https://host/a", "secure"),
            text_doc("host/a", "schemeless"),
            text_doc("x/a:b", "colon"),
            text_doc("x/a_b", "underscore"),
            text_doc("x/a%3Ab", "escaped"),
            text_doc("a//b", "double"),
            text_doc("a/b", "single"),
            text_doc("a/B", "upper"),
            text_doc("x/a.doc/b", "directory"),
            text_doc("x/a", "file"),
        ];
        for doc in &docs {
            persistence.serialize(doc.key(), doc).unwrap();
        }
        let mut paths: Vec<PathBuf> = docs.iter().map(|doc| persistence.path_for(doc.key())).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), docs.len());

        let mut recovered = persistence.recover().unwrap();
        recovered.sort_by(|x, y| x.key().cmp(y.key()));
        let mut expected = docs.to_vec();
        expected.sort_by(|x, y| x.key().cmp(y.key()));
        assert_eq!(recovered, expected);

        for doc in &docs {
            assert_eq!(persistence.deserialize(doc.key()).unwrap().as_ref(), Some(doc));
        }
    }

    #[test]
    fn test_serialize_then_deserialize_consumes_file() {
        let (mut persistence, dir) = test_persistence();
        let doc = text_doc("http://host/docs/a", "cat dog");
        persistence.serialize(doc.key(), &doc).unwrap();

        let path = persistence.path_for(doc.key());
        assert!(path.exists());
        assert!(!path.with_extension("doc.tmp").exists());

        let loaded = persistence.deserialize(doc.key()).unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert!(!path.exists());
        // Emptied key directories are pruned back to the base directory.
        assert!(!dir.path().join("http%3A").exists());
        assert!(dir.path().exists());

        assert!(persistence.deserialize(doc.key()).unwrap().is_none());
    }

    #[test]
    fn test_delete_reports_presence() {
        let (mut persistence, _dir) = test_persistence();
        let doc = text_doc("notes/a", "hello");
        assert!(!persistence.delete(doc.key()).unwrap());
        persistence.serialize(doc.key(), &doc).unwrap();
        assert!(persistence.delete(doc.key()).unwrap());
        assert!(!persistence.path_for(doc.key()).exists());
    }

    #[test]
    fn test_serialize_overwrites_previous_copy() {
        let (mut persistence, _dir) = test_persistence();
        let first = text_doc("notes/a", "first");
        let second = text_doc("notes/a", "second");
        persistence.serialize(first.key(), &first).unwrap();
        persistence.serialize(second.key(), &second).unwrap();
        assert_eq!(persistence.deserialize(first.key()).unwrap().unwrap(), second);
    }

    #[test]
    fn test_recover_skips_corrupt_and_temp_files() {
        let (mut persistence, dir) = test_persistence();
        let a = text_doc("http://host/a", "alpha");
        let b = Document::binary(DocumentKey::new("http://host/sub/b").unwrap(), vec![1, 2, 3]).unwrap();
        persistence.serialize(a.key(), &a).unwrap();
        persistence.serialize(b.key(), &b).unwrap();

        let host_dir = persistence.path_for(a.key()).parent().unwrap().to_path_buf();
        fs::write(host_dir.join("junk.doc"), b"not a record").unwrap();
        fs::write(host_dir.join("a.doc.tmp"), b"orphan").unwrap();

        let mut recovered = persistence.recover().unwrap();
        recovered.sort_by(|x, y| x.key().cmp(y.key()));
        assert_eq!(recovered, vec![a, b]);
    }

    #[test]
    fn test_deserialize_rejects_corrupt_file() {
        let (mut persistence, _dir) = test_persistence();
        let doc = text_doc("notes/a", "hello world");
        persistence.serialize(doc.key(), &doc).unwrap();

        let path = persistence.path_for(doc.key());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            persistence.deserialize(doc.key()),
            Err(DocStoreError::ChecksumMismatch { .. })
        ));
        // A failed read leaves the file in place.
        assert!(path.exists());
    }
}
