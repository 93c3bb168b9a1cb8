//! Transparent page encryption.
//!
//! Every page passes through a [`CodecHook`] on its way to and from disk.
//! With a key installed, the hook encrypts the page payload with
//! AES-256-CTR and stores a fresh IV plus an HMAC tag in the page's reserve
//! region; on read the tag is checked before a single plaintext byte is
//! returned.
//!
//! ```text
//!  pager ── on_page_write ──▶ CodecHook ──▶ PageCodec::encrypt ──▶ disk
//!  pager ◀── on_page_read ─── CodecHook ◀── PageCodec::decrypt ◀── disk
//! ```

pub mod error;
pub mod header;
pub mod hook;
pub mod iv;
pub mod key;
pub mod key_manager;
pub mod page_codec;
pub mod params;
pub mod provider;

pub use error::{CodecError, CodecResult};
pub use header::{FileHeader, FileKind, HeaderSniffer, FILE_HEADER_SIZE, MAGIC};
pub use hook::{CodecHook, CodecMode};
pub use iv::{IvSource, RandomIv, SequentialIv};
pub use key::{KeyMaterial, KeySecret, Salt};
pub use key_manager::KeyManager;
pub use page_codec::PageCodec;
pub use params::{CipherSuite, CodecParams};
pub use provider::{CipherProvider, RustCryptoProvider};
