//! Transparent page-level encryption for a file-backed page store.
//!
//! - [`codec`]: key derivation, per-page encryption and authentication, and
//!   the hook the pager calls on every page I/O
//! - [`storage`]: the page manager and buffer pool the codec plugs into
//! - [`sql`]: parser for the key statements
//! - [`database`]: facade tying them together

pub mod codec;
pub mod database;
pub mod sql;
pub mod storage;
