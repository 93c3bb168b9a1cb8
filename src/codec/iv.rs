//! Per-write IV generation.
//!
//! Every page write draws a fresh IV and stores it in the page's reserve
//! region, so an IV is never reused for a `(key, page)` pair even though the
//! same page is rewritten many times under one key.

use super::error::{CodecError, CodecResult};
use crate::storage::page::PageId;
use byteorder::{BigEndian, ByteOrder};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait IvSource: Send + Sync {
    /// Fill `iv` with the IV for the next write of `page`.
    fn fill_iv(&self, page: PageId, iv: &mut [u8]) -> CodecResult<()>;
}

/// Random IVs from the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIv;

impl IvSource for RandomIv {
    fn fill_iv(&self, _page: PageId, iv: &mut [u8]) -> CodecResult<()> {
        OsRng
            .try_fill_bytes(iv)
            .map_err(|_| CodecError::Provider("system RNG unavailable"))
    }
}

/// Deterministic IVs: `be_u32(page) ‖ zero ‖ be_u64(counter)`.
///
/// The counter restarts with every instance, so reopening a file under the
/// same key would repeat IVs. Only for reproducible tests.
#[derive(Debug, Default)]
pub struct SequentialIv {
    counter: AtomicU64,
}

impl SequentialIv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(counter: u64) -> Self {
        SequentialIv {
            counter: AtomicU64::new(counter),
        }
    }
}

impl IvSource for SequentialIv {
    fn fill_iv(&self, page: PageId, iv: &mut [u8]) -> CodecResult<()> {
        if iv.len() < 16 {
            return Err(CodecError::Provider("IV buffer too short"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        iv.fill(0);
        BigEndian::write_u32(&mut iv[..4], page.0);
        BigEndian::write_u64(&mut iv[8..16], n);
        Ok(())
    }
}
