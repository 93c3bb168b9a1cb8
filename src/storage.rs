//! Storage layer for sealdb.
//!
//! - **PageManager**: page-granular file I/O, with the codec hook applied to
//!   every page on its way to and from disk
//! - **BufferPoolManager**: in-memory cache of decrypted pages with LRU
//!   eviction
//!
//! Pages are numbered from 1. Callers only ever see a page's payload; the
//! reserve region at the end of each page belongs to the codec.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::PageId;
