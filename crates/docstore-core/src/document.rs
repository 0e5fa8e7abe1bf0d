//! Documents, document keys and tokenization.
//!
//! A document holds either text or binary content, fixed at construction.
//! Text documents derive a word table (uppercased ASCII alphanumeric token ->
//! occurrence count) once, when they are built; binary documents have none.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use hashbrown::HashMap;

use crate::error::{DocResult, DocStoreError};

/// How `put` should interpret raw input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    /// UTF-8 text, tokenized for search
    Text,
    /// Opaque bytes, never indexed
    Binary,
}

/// Validated document identifier, e.g. `http://www.example.com/docs/one`.
///
/// A key is non-empty, at most [`DocumentKey::MAX_LEN`] bytes, free of
/// whitespace, control characters and backslashes, and has at least one path
/// segment after an optional `scheme://` prefix. `.` and `..` segments are
/// rejected so a key can never name a file outside the store directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Maximum key length in bytes
    pub const MAX_LEN: usize = 1024;

    pub fn new(raw: impl Into<String>) -> DocResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(DocStoreError::invalid("document key must not be empty"));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(DocStoreError::invalid(format!(
                "document key is {} bytes, limit is {}",
                raw.len(),
                Self::MAX_LEN
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control() || c == '\\') {
            return Err(DocStoreError::invalid(format!("document key {:?} contains illegal characters", raw)));
        }
        let key = Self(raw);
        let segments: Vec<&str> = key.raw_segments().collect();
        if segments.is_empty() {
            return Err(DocStoreError::invalid(format!("document key {:?} has no authority or path", key.0)));
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(DocStoreError::invalid(format!("document key {:?} contains a relative segment", key.0)));
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn raw_segments(&self) -> impl Iterator<Item = &str> {
        let rest = match self.0.find("://") {
            Some(i) if is_scheme(&self.0[..i]) => &self.0[i + 3..],
            _ => self.0.as_str(),
        };
        rest.split('/').filter(|s| !s.is_empty())
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentKey {
    type Err = DocStoreError;

    fn from_str(s: &str) -> DocResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for DocumentKey {
    type Error = DocStoreError;

    fn try_from(s: &str) -> DocResult<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Document payload. Exactly one kind per document, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    pub fn format(&self) -> DocumentFormat {
        match self {
            Content::Text(_) => DocumentFormat::Text,
            Content::Binary(_) => DocumentFormat::Binary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Text(text) => text.as_bytes(),
            Content::Binary(bytes) => bytes,
        }
    }
}

/// A keyed document plus its derived word table and last-use stamp.
///
/// Equality is value equality over key and content; the word table is derived
/// from the content and the last-use stamp is bookkeeping, so neither takes part.
#[derive(Debug, Clone)]
pub struct Document {
    key: DocumentKey,
    content: Content,
    words: HashMap<String, u32>,
    last_used: u64,
}

impl Document {
    /// Text document. Empty text is rejected.
    pub fn text(key: DocumentKey, text: impl Into<String>) -> DocResult<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(DocStoreError::invalid(format!("text content for {} is empty", key)));
        }
        let words = word_table(&text);
        Ok(Self { key, content: Content::Text(text), words, last_used: 0 })
    }

    /// Binary document. Empty content is rejected.
    pub fn binary(key: DocumentKey, bytes: Vec<u8>) -> DocResult<Self> {
        if bytes.is_empty() {
            return Err(DocStoreError::invalid(format!("binary content for {} is empty", key)));
        }
        Ok(Self { key, content: Content::Binary(bytes), words: HashMap::new(), last_used: 0 })
    }

    /// Build from raw input. Text input must be valid UTF-8.
    pub fn from_bytes(key: DocumentKey, bytes: Vec<u8>, format: DocumentFormat) -> DocResult<Self> {
        match format {
            DocumentFormat::Binary => Self::binary(key, bytes),
            DocumentFormat::Text => {
                let text = String::from_utf8(bytes).map_err(|e| {
                    DocStoreError::invalid(format!("text content for {} is not UTF-8: {}", key, e))
                })?;
                Self::text(key, text)
            }
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn format(&self) -> DocumentFormat {
        self.content.format()
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            Content::Binary(_) => None,
        }
    }

    pub fn binary_content(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Binary(bytes) => Some(bytes),
            Content::Text(_) => None,
        }
    }

    /// Bytes this document counts against the memory limit.
    pub fn size_bytes(&self) -> usize {
        self.content.as_bytes().len()
    }

    /// Occurrences of `word` after normalization. Always 0 for binary documents.
    pub fn word_count(&self, word: &str) -> u32 {
        self.token_count(&normalize(word))
    }

    /// Sum of occurrences of every token starting with the normalized `prefix`.
    pub fn prefix_count(&self, prefix: &str) -> u32 {
        self.token_prefix_count(&normalize(prefix))
    }

    /// Distinct tokens of this document.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.keys().map(String::as_str)
    }

    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    pub(crate) fn set_last_used(&mut self, stamp: u64) {
        self.last_used = stamp;
    }

    pub(crate) fn token_count(&self, token: &str) -> u32 {
        self.words.get(token).copied().unwrap_or(0)
    }

    pub(crate) fn token_prefix_count(&self, prefix: &str) -> u32 {
        if prefix.is_empty() {
            return 0;
        }
        self.words
            .iter()
            .filter(|(word, _)| word.starts_with(prefix))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Content-identity signal: CRC32C over key, content kind and payload.
    pub fn content_hash(&self) -> u32 {
        let tag = match self.content {
            Content::Text(_) => [1u8],
            Content::Binary(_) => [2u8],
        };
        let crc = crc32c::crc32c(self.key.as_str().as_bytes());
        let crc = crc32c::crc32c_append(crc, &tag);
        crc32c::crc32c_append(crc, self.content.as_bytes())
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.content == other.content
    }
}

impl Eq for Document {}

/// Normalize text or a query: keep ASCII letters, digits and spaces, uppercase.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn word_table(text: &str) -> HashMap<String, u32> {
    let mut words = HashMap::new();
    for token in normalize(text).split(' ').filter(|t| !t.is_empty()) {
        *words.entry(token.to_string()).or_insert(0) += 1;
    }
    words
}

/// Strictly increasing monotonic nanosecond stamps for last-use tracking.
#[derive(Debug)]
pub struct UseClock {
    origin: Instant,
    last: u64,
}

impl UseClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), last: 0 }
    }

    /// Next stamp; never equal to or smaller than a previous one.
    pub fn now(&mut self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last = elapsed.max(self.last.saturating_add(1));
        self.last
    }
}

impl Default for UseClock {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> DocumentKey {
        DocumentKey::new(raw).unwrap()
    }

    #[test]
    fn test_key_validation() {
        assert!(DocumentKey::new("").is_err());
        assert!(DocumentKey::new("http://").is_err());
        assert!(DocumentKey::new("has space").is_err());
        assert!(DocumentKey::new("a\\b").is_err());
        assert!(DocumentKey::new("http://host/../etc").is_err());
        assert!(DocumentKey::new("x".repeat(DocumentKey::MAX_LEN + 1)).is_err());

        assert!(DocumentKey::new("http://www.example.com/docs/one").is_ok());
        assert!(DocumentKey::new("plain-name").is_ok());
        assert_eq!("doc1".parse::<DocumentKey>().unwrap().as_str(), "doc1");
    }

    #[test]
    fn test_word_table_counts_normalized_tokens() {
        let doc = Document::text(key("doc"), "Cat cat, DOG!  cat's 42 x-ray").unwrap();
        assert_eq!(doc.word_count("cat"), 2);
        assert_eq!(doc.word_count("CATS"), 1);
        assert_eq!(doc.word_count("dog"), 1);
        assert_eq!(doc.word_count("42"), 1);
        assert_eq!(doc.word_count("xray"), 1);
        assert_eq!(doc.word_count("bird"), 0);

        let mut words: Vec<&str> = doc.words().collect();
        words.sort_unstable();
        assert_eq!(words, vec!["42", "CAT", "CATS", "DOG", "XRAY"]);
    }

    #[test]
    fn test_prefix_count_sums_matching_tokens() {
        let doc = Document::text(key("doc"), "cat car car dog").unwrap();
        assert_eq!(doc.prefix_count("ca"), 3);
        assert_eq!(doc.prefix_count("car"), 2);
        assert_eq!(doc.prefix_count("d"), 1);
        assert_eq!(doc.prefix_count(""), 0);
    }

    #[test]
    fn test_binary_document_has_no_words() {
        let doc = Document::binary(key("blob"), vec![0, 159, 146, 150]).unwrap();
        assert_eq!(doc.words().count(), 0);
        assert_eq!(doc.word_count("anything"), 0);
        assert_eq!(doc.size_bytes(), 4);
        assert_eq!(doc.format(), DocumentFormat::Binary);
        assert!(doc.text_content().is_none());
    }

    #[test]
    fn test_empty_and_invalid_content_rejected() {
        assert!(Document::text(key("a"), "").is_err());
        assert!(Document::binary(key("a"), Vec::new()).is_err());
        assert!(matches!(
            Document::from_bytes(key("a"), vec![0xff, 0xfe], DocumentFormat::Text),
            Err(DocStoreError::InvalidArgument(_))
        ));
        assert!(Document::from_bytes(key("a"), vec![0xff, 0xfe], DocumentFormat::Binary).is_ok());
    }

    #[test]
    fn test_equality_and_content_hash() {
        let a = Document::text(key("a"), "hello").unwrap();
        let mut same = Document::text(key("a"), "hello").unwrap();
        same.set_last_used(99);
        let other_text = Document::text(key("a"), "world").unwrap();
        let as_binary = Document::binary(key("a"), b"hello".to_vec()).unwrap();

        assert_eq!(a, same);
        assert_eq!(a.content_hash(), same.content_hash());
        assert_ne!(a, other_text);
        assert_ne!(a.content_hash(), other_text.content_hash());
        assert_ne!(a, as_binary);
        assert_ne!(a.content_hash(), as_binary.content_hash());
    }

    #[test]
    fn test_use_clock_strictly_increases() {
        let mut clock = UseClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }
}
