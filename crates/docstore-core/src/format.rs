//! Binary record format for demoted documents
//!
//! Every document file holds exactly one record:
//! RecordHeader (24 bytes) + key bytes + content bytes

use std::path::Path;

use crate::document::{Content, Document, DocumentKey};
use crate::error::{DocResult, DocStoreError};

/// Magic bytes identifying a document record: "DOCS" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = *b"DOCS";

/// Current record layout version
pub const FORMAT_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// Maximum content size in bytes (512MB)
pub const MAX_CONTENT_SIZE: usize = 512 * 1024 * 1024;

/// Content kind tag for text documents
pub const KIND_TEXT: u8 = 1;

/// Content kind tag for binary documents
pub const KIND_BINARY: u8 = 2;

/// Fixed-size header preceding the key and content
///
/// Layout:
///   [0..4]   magic:       [u8;4] - "DOCS"
///   [4]      version:     u8
///   [5]      kind:        u8     - KIND_TEXT or KIND_BINARY
///   [6..8]   reserved:    [u8;2]
///   [8..12]  key_len:     u32 LE
///   [12..16] content_len: u32 LE
///   [16..20] checksum:    u32 LE - CRC32C of key bytes followed by content bytes
///   [20..24] padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub kind: u8,
    pub key_len: u32,
    pub content_len: u32,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4] = self.version;
        buf[5] = self.kind;
        buf[8..12].copy_from_slice(&self.key_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.content_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: bytes[4],
            kind: bytes[5],
            key_len: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            content_len: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            checksum: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        }
    }

    /// Total record size announced by this header
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_len as u64 + self.content_len as u64
    }
}

/// Serialize a document into one complete record
pub fn encode_document(doc: &Document) -> DocResult<Vec<u8>> {
    let key = doc.key().as_str().as_bytes();
    if key.len() > DocumentKey::MAX_LEN {
        return Err(DocStoreError::OversizedEntry {
            entry_size: key.len() as u64,
            max_size: DocumentKey::MAX_LEN as u64,
            component: "key".to_string(),
        });
    }
    let (kind, content) = match doc.content() {
        Content::Text(text) => (KIND_TEXT, text.as_bytes()),
        Content::Binary(bytes) => (KIND_BINARY, bytes.as_slice()),
    };
    if content.len() > MAX_CONTENT_SIZE {
        return Err(DocStoreError::OversizedEntry {
            entry_size: content.len() as u64,
            max_size: MAX_CONTENT_SIZE as u64,
            component: "content".to_string(),
        });
    }

    let checksum = crc32c::crc32c_append(crc32c::crc32c(key), content);
    let header = RecordHeader {
        magic: MAGIC_ARRAY,
        version: FORMAT_VERSION,
        kind,
        key_len: key.len() as u32,
        content_len: content.len() as u32,
        checksum,
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + content.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(content);
    Ok(buf)
}

/// Parse and verify one record. `path` is only used for error context.
pub fn decode_document(bytes: &[u8], path: &Path) -> DocResult<Document> {
    if bytes.len() < HEADER_SIZE {
        return Err(DocStoreError::TornWrite {
            path: path.to_path_buf(),
            expected_size: HEADER_SIZE as u64,
            available_bytes: bytes.len() as u64,
        });
    }
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = RecordHeader::from_bytes(&raw);

    if header.magic != MAGIC_ARRAY {
        return Err(DocStoreError::NoMagicFound { path: path.to_path_buf(), found_bytes: header.magic });
    }
    if header.version != FORMAT_VERSION {
        return Err(DocStoreError::Corrupted {
            path: path.to_path_buf(),
            reason: format!("unsupported record version {}", header.version),
        });
    }
    if header.key_len as usize > DocumentKey::MAX_LEN || header.content_len as usize > MAX_CONTENT_SIZE {
        return Err(DocStoreError::Corrupted {
            path: path.to_path_buf(),
            reason: format!("implausible lengths: key {} content {}", header.key_len, header.content_len),
        });
    }
    if (bytes.len() as u64) < header.record_len() {
        return Err(DocStoreError::TornWrite {
            path: path.to_path_buf(),
            expected_size: header.record_len(),
            available_bytes: bytes.len() as u64,
        });
    }

    let key_end = HEADER_SIZE + header.key_len as usize;
    let content_end = key_end + header.content_len as usize;
    let key_bytes = &bytes[HEADER_SIZE..key_end];
    let content = &bytes[key_end..content_end];

    let actual = crc32c::crc32c_append(crc32c::crc32c(key_bytes), content);
    if actual != header.checksum {
        return Err(DocStoreError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum,
            actual,
        });
    }

    let key = std::str::from_utf8(key_bytes)
        .map_err(|_| DocStoreError::Corrupted { path: path.to_path_buf(), reason: "key is not UTF-8".to_string() })
        .and_then(|raw| DocumentKey::new(raw))?;

    match header.kind {
        KIND_TEXT => {
            let text = std::str::from_utf8(content).map_err(|_| DocStoreError::Corrupted {
                path: path.to_path_buf(),
                reason: "text content is not UTF-8".to_string(),
            })?;
            Document::text(key, text)
        }
        KIND_BINARY => Document::binary(key, content.to_vec()),
        other => Err(DocStoreError::Corrupted {
            path: path.to_path_buf(),
            reason: format!("unknown content kind {}", other),
        }),
    }
}
