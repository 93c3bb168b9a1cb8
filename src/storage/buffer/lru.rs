use super::replacer::{FrameId, Replacer};
use std::collections::{BTreeMap, HashMap};

/// Least-recently-unpinned eviction.
///
/// Every unpin stamps the frame with a monotonically increasing tick; the
/// victim is the frame with the smallest tick.
#[derive(Debug)]
pub struct LruReplacer {
    by_tick: BTreeMap<u64, FrameId>,
    ticks: HashMap<FrameId, u64>,
    next_tick: u64,
    max_size: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            by_tick: BTreeMap::new(),
            ticks: HashMap::with_capacity(max_size),
            next_tick: 0,
            max_size,
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.by_tick.pop_first()?;
        self.ticks.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(tick) = self.ticks.remove(&frame_id) {
            self.by_tick.remove(&tick);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.ticks.contains_key(&frame_id) || self.ticks.len() >= self.max_size {
            return;
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.ticks.insert(frame_id, tick);
        self.by_tick.insert(tick, frame_id);
    }

    fn size(&self) -> usize {
        self.ticks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_in_unpin_order() {
        let mut replacer = LruReplacer::new(3);
        assert!(replacer.is_empty());
        assert_eq!(replacer.evict(), None);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_pinned_frames_are_skipped() {
        let mut replacer = LruReplacer::new(3);
        replacer.unpin(1);
        replacer.unpin(2);

        replacer.pin(1);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);

        // Re-unpinned frames go to the back
        replacer.unpin(1);
        replacer.unpin(4);
        replacer.pin(1);
        replacer.unpin(1);
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_repeated_unpin_and_unknown_pin() {
        let mut replacer = LruReplacer::new(2);
        replacer.unpin(1);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 1);

        replacer.pin(999);
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let mut replacer = LruReplacer::new(2);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 2);
    }
}
