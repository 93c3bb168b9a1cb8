pub mod lru;
pub mod replacer;

use crate::codec::FILE_HEADER_SIZE;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use dashmap::DashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use replacer::{FrameId, Replacer};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Cached plaintext payload of one page.
struct Frame {
    data: Box<[u8]>,
    page_id: Option<PageId>,
}

struct FrameSlot {
    frame: Arc<RwLock<Frame>>,
    pin_count: AtomicU32,
    /// Set by a write guard as it drops, while it still holds the frame.
    is_dirty: AtomicBool,
}

impl FrameSlot {
    fn new() -> Self {
        Self {
            frame: Arc::new(RwLock::new(Frame {
                data: Vec::new().into_boxed_slice(),
                page_id: None,
            })),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }
}

/// Page cache above the [`PageManager`].
///
/// Frames hold decrypted payloads; pages are encoded by the page manager's
/// codec hook when they are flushed or evicted.
///
/// Lock order is `latch`, then `page_manager`. Frame locks are only taken
/// under the latch for frames nobody has pinned.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<Vec<Arc<FrameSlot>>>,
    replacer: Mutex<Box<dyn Replacer>>,
    page_manager: Mutex<PageManager>,
    /// Held while the page table, pin counts or frame assignment change.
    latch: Mutex<()>,
    max_frames: usize,
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(Vec::with_capacity(max_frames)),
                replacer: Mutex::new(replacer),
                page_manager: Mutex::new(page_manager),
                latch: Mutex::new(()),
                max_frames,
            }),
        }
    }

    pub fn payload_bytes(&self) -> usize {
        let _latch = self.inner.latch.lock();
        self.inner.page_manager.lock().payload_bytes()
    }

    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        let pin = self.pin(page_id)?;
        let guard = pin.slot.frame.read_arc();
        Ok(PageReadGuard { guard, pin })
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        let header = if page_id.is_first() {
            let _latch = self.inner.latch.lock();
            Some(self.inner.page_manager.lock().page_one_header())
        } else {
            None
        };
        let pin = self.pin(page_id)?;
        let guard = pin.slot.frame.write_arc();
        Ok(PageWriteGuard { guard, pin, header })
    }

    /// Append a zeroed page to the file and return it pinned for writing.
    pub fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        let _latch = self.inner.latch.lock();
        let (frame_id, slot) = self.get_frame()?;

        let allocated = {
            let mut page_manager = self.inner.page_manager.lock();
            let payload_bytes = page_manager.payload_bytes();
            let header = page_manager.page_one_header();
            page_manager
                .allocate_page()
                .map(|id| (id, payload_bytes, header))
        };
        let (page_id, payload_bytes, header) = match allocated {
            Ok(allocated) => allocated,
            Err(e) => {
                self.inner.replacer.lock().unpin(frame_id);
                return Err(e);
            }
        };
        let header = page_id.is_first().then_some(header);

        {
            let mut frame = slot.frame.write();
            frame.data = vec![0u8; payload_bytes].into_boxed_slice();
            if let Some(header) = &header {
                frame.data[..FILE_HEADER_SIZE].copy_from_slice(header);
            }
            frame.page_id = Some(page_id);
        }
        slot.pin_count.store(1, Ordering::SeqCst);
        slot.is_dirty.store(false, Ordering::SeqCst);
        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        let pin = PinHandle {
            inner: self.inner.clone(),
            frame_id,
            page_id,
            slot,
        };
        let guard = pin.slot.frame.write_arc();
        Ok((page_id, PageWriteGuard { guard, pin, header }))
    }

    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let pin = {
            let _latch = self.inner.latch.lock();
            match self.inner.page_table.get(&page_id).map(|e| *e.value()) {
                Some(frame_id) => self.pin_cached(page_id, frame_id),
                None => return Ok(()),
            }
        };
        self.write_back(&pin.slot)
    }

    /// Write every dirty page through the page manager. Waits for write
    /// guards held by other threads; must not be called while the calling
    /// thread holds a write guard.
    pub fn flush_all(&self) -> StorageResult<()> {
        let pins: Vec<PinHandle> = {
            let _latch = self.inner.latch.lock();
            let cached: Vec<(PageId, FrameId)> = self
                .inner
                .page_table
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect();
            cached
                .into_iter()
                .map(|(page_id, frame_id)| self.pin_cached(page_id, frame_id))
                .collect()
        };
        for pin in &pins {
            self.write_back(&pin.slot)?;
        }
        Ok(())
    }

    /// Drop every cached page without writing it back. Fails if any page is
    /// pinned; flush first to keep changes.
    pub fn discard_all(&self) -> StorageResult<()> {
        let _latch = self.inner.latch.lock();
        let frames = self.inner.frames.read();
        let pinned = frames
            .iter()
            .filter(|slot| slot.pin_count.load(Ordering::SeqCst) > 0)
            .count();
        if pinned > 0 {
            return Err(StorageError::PagesPinned(pinned));
        }
        for slot in frames.iter() {
            let mut frame = slot.frame.write();
            frame.data.fill(0);
            frame.page_id = None;
            slot.is_dirty.store(false, Ordering::SeqCst);
        }
        self.inner.page_table.clear();
        Ok(())
    }

    /// Run `f` with exclusive access to the page manager.
    pub fn with_page_manager<R>(&self, f: impl FnOnce(&mut PageManager) -> R) -> R {
        let _latch = self.inner.latch.lock();
        let mut page_manager = self.inner.page_manager.lock();
        f(&mut page_manager)
    }

    fn slot(&self, frame_id: FrameId) -> Arc<FrameSlot> {
        self.inner.frames.read()[frame_id as usize].clone()
    }

    /// Copy the frame out under its read lock, then write it. The dirty
    /// flag is cleared under the same lock, so a later write guard sets it
    /// again.
    fn write_back(&self, slot: &FrameSlot) -> StorageResult<()> {
        let (page_id, data) = {
            let frame = slot.frame.read();
            let Some(page_id) = frame.page_id else {
                return Ok(());
            };
            if !slot.is_dirty.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            (page_id, Zeroizing::new(frame.data.to_vec()))
        };
        let written = self
            .inner
            .page_manager
            .lock()
            .write_page(page_id, &data);
        if written.is_err() {
            slot.is_dirty.store(true, Ordering::SeqCst);
        }
        written
    }

    /// Pin a page already in the page table. Called with the latch held.
    fn pin_cached(&self, page_id: PageId, frame_id: FrameId) -> PinHandle {
        let slot = self.slot(frame_id);
        slot.pin_count.fetch_add(1, Ordering::SeqCst);
        self.inner.replacer.lock().pin(frame_id);
        PinHandle {
            inner: self.inner.clone(),
            frame_id,
            page_id,
            slot,
        }
    }

    fn pin(&self, page_id: PageId) -> StorageResult<PinHandle> {
        let _latch = self.inner.latch.lock();

        // Already cached
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            return Ok(self.pin_cached(page_id, frame_id));
        }

        // Load from disk
        let (frame_id, slot) = self.get_frame()?;
        {
            let mut page_manager = self.inner.page_manager.lock();
            let mut frame = slot.frame.write();
            let payload_bytes = page_manager.payload_bytes();
            if frame.data.len() != payload_bytes {
                frame.data = vec![0u8; payload_bytes].into_boxed_slice();
            }
            if let Err(e) = page_manager.read_page(page_id, &mut frame.data) {
                self.inner.replacer.lock().unpin(frame_id);
                return Err(e);
            }
            frame.page_id = Some(page_id);
        }
        slot.pin_count.store(1, Ordering::SeqCst);
        slot.is_dirty.store(false, Ordering::SeqCst);
        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        Ok(PinHandle {
            inner: self.inner.clone(),
            frame_id,
            page_id,
            slot,
        })
    }

    /// Find a free frame, evicting if needed. Called with the latch held.
    fn get_frame(&self) -> StorageResult<(FrameId, Arc<FrameSlot>)> {
        {
            let mut frames = self.inner.frames.write();
            if frames.len() < self.inner.max_frames {
                let frame_id = frames.len() as FrameId;
                let slot = Arc::new(FrameSlot::new());
                frames.push(slot.clone());
                return Ok((frame_id, slot));
            }
        }

        let frame_id = self
            .inner
            .replacer
            .lock()
            .evict()
            .ok_or(StorageError::BufferPoolFull)?;
        let slot = self.slot(frame_id);

        // Unpinned, so no guard holds the frame lock.
        if let Err(e) = self.write_back(&slot) {
            self.inner.replacer.lock().unpin(frame_id);
            return Err(e);
        }
        let mut frame = slot.frame.write();
        if let Some(old_page_id) = frame.page_id.take() {
            self.inner.page_table.remove(&old_page_id);
        }
        frame.data.fill(0);
        drop(frame);

        Ok((frame_id, slot))
    }
}

/// Keeps a frame pinned; unpins it on drop.
struct PinHandle {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    page_id: PageId,
    slot: Arc<FrameSlot>,
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        let _latch = self.inner.latch.lock();
        if self.slot.pin_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.replacer.lock().unpin(self.frame_id);
        }
    }
}

// Field order matters: the frame lock is released before the pin.

pub struct PageReadGuard {
    guard: ArcRwLockReadGuard<RawRwLock, Frame>,
    pin: PinHandle,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }
}

impl Deref for PageReadGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard.data
    }
}

pub struct PageWriteGuard {
    guard: ArcRwLockWriteGuard<RawRwLock, Frame>,
    pin: PinHandle,
    /// Page 1 only: the file header, restored over bytes 0..32 on drop.
    header: Option<[u8; FILE_HEADER_SIZE]>,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard.data
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.data
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        if let Some(header) = &self.header {
            self.guard.data[..FILE_HEADER_SIZE].copy_from_slice(header);
        }
        self.pin.slot.is_dirty.store(true, Ordering::SeqCst);
    }
}
