//! Codec error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors raised by the page codec and its key management.
///
/// Integrity failures never carry byte offsets or tag fragments: the caller
/// learns *which page* failed, not *where*.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Database is encrypted: a key must be set before page I/O")]
    KeyRequired,

    #[error("File is not a database or the key is incorrect")]
    WrongKey,

    #[error("Page {0} failed authentication: database disk image is malformed")]
    PageCorruption(PageId),

    /// Raw tag mismatch from [`PageCodec::decrypt`](super::PageCodec::decrypt).
    /// Callers above the codec see `WrongKey` or `PageCorruption` instead.
    #[error("Page integrity tag mismatch")]
    IntegrityError,

    #[error("Rekey aborted after {pages_rewritten} of {total_pages} pages; database left under the previous key")]
    RekeyAborted { pages_rewritten: u32, total_pages: u32 },

    #[error("Unsupported codec parameters (page size {page_size}, reserve {reserve_bytes}): {reason}")]
    UnsupportedParameters {
        page_size: usize,
        reserve_bytes: usize,
        reason: &'static str,
    },

    #[error("Database is not encrypted; use REKEY to encrypt it in place")]
    PlaintextDatabase,

    #[error("Unknown cipher suite: {0}")]
    UnknownCipher(String),

    #[error("Invalid key: {0}")]
    InvalidKey(&'static str),

    #[error("Buffer size must be {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Cipher provider failure: {0}")]
    Provider(&'static str),
}

impl CodecError {
    /// `KeyRequired` and `WrongKey` can be fixed by supplying another key.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CodecError::KeyRequired | CodecError::WrongKey)
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
