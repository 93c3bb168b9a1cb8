//! Storage layer error types.

use crate::codec::CodecError;
use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page {page} is beyond the end of the file ({num_pages} pages)")]
    PageOutOfRange { page: PageId, num_pages: u32 },

    #[error("Invalid page id: pages are numbered from 1")]
    InvalidPageId,

    #[error("Buffer size must be {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Invalid database file: {0}")]
    InvalidHeader(String),

    #[error("Buffer pool is full: cannot allocate new frame")]
    BufferPoolFull,

    #[error("{0} cached pages are still pinned")]
    PagesPinned(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// The codec error behind this failure, if any.
    pub fn codec_error(&self) -> Option<&CodecError> {
        match self {
            StorageError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
