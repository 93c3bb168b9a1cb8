//! Eviction policy interface for the buffer pool.

use std::fmt::Debug;

pub type FrameId = u32;

/// Tracks which frames may be evicted and picks the victim.
///
/// The pool calls `unpin` when the last guard on a frame drops and `pin`
/// when a frame gains its first user again.
pub trait Replacer: Send + Sync + Debug {
    /// Choose and forget a victim. `None` when every frame is pinned.
    fn evict(&mut self) -> Option<FrameId>;

    fn pin(&mut self, frame_id: FrameId);

    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
