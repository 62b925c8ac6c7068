//! Timestamp-keyed lookup from a completion back to its submission slot.
//!
//! [`TimestampCorrelator`] itself is not synchronized; the
//! [`CompletionCorrelator`](crate::CompletionCorrelator) keeps it behind the
//! same mutex that guards the registered receiver.

use std::collections::HashMap;

use crate::{frame_info::SlotRef, frames::TimestampKey};

/// Map from frame timestamp to the metadata slot reserved for that frame.
#[derive(Debug, Default)]
pub struct TimestampCorrelator {
    entries: HashMap<TimestampKey, SlotRef>,
}

impl TimestampCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Registers `slot` under `timestamp`.
    ///
    /// An entry that still points at the same slot belonged to a submission
    /// whose metadata has just been overwritten, so it is evicted. A previous
    /// entry for the same timestamp is replaced.
    pub fn map(&mut self, timestamp: TimestampKey, slot: SlotRef) {
        let before = self.entries.len();
        self.entries.retain(|_, existing| !existing.same_slot(&slot));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::debug!(
                "Evicted {evicted} stale mapping(s) for reused slot {} \
                 while mapping timestamp {timestamp}",
                slot.index()
            );
        }

        if let Some(previous) = self.entries.insert(timestamp, slot) {
            log::debug!(
                "Timestamp {timestamp} mapped twice; replacing slot {}",
                previous.index()
            );
        }
    }

    /// Removes and returns the entry for `timestamp`.
    pub fn pop(&mut self, timestamp: TimestampKey) -> Option<SlotRef> {
        self.entries.remove(&timestamp)
    }

    pub fn contains(&self, timestamp: TimestampKey) -> bool {
        self.entries.contains_key(&timestamp)
    }

    /// Entries the map can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame_info::FrameInfoStore, frames::FrameMetadata};

    fn meta(start: i64) -> FrameMetadata {
        FrameMetadata {
            decode_start_ms: start,
            ..FrameMetadata::default()
        }
    }

    #[test]
    fn test_map_then_pop() {
        let mut store = FrameInfoStore::new(4).unwrap();
        let mut map = TimestampCorrelator::new();
        map.map(100, store.reserve(meta(1)));

        let slot = map.pop(100).expect("entry should be present");
        assert_eq!(slot.load(), Some(meta(1)));
        assert!(map.pop(100).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_pop_absent_key() {
        let mut map = TimestampCorrelator::new();
        assert!(map.pop(12345).is_none());
    }

    #[test]
    fn test_duplicate_timestamp_replaces() {
        let mut store = FrameInfoStore::new(4).unwrap();
        let mut map = TimestampCorrelator::new();
        map.map(100, store.reserve(meta(1)));
        map.map(100, store.reserve(meta(2)));
        assert_eq!(map.len(), 1);

        let slot = map.pop(100).unwrap();
        assert_eq!(slot.load(), Some(meta(2)));
        assert!(map.pop(100).is_none());
    }

    #[test]
    fn test_slot_reuse_evicts_stale_entry() {
        let mut store = FrameInfoStore::new(2).unwrap();
        let mut map = TimestampCorrelator::new();
        map.map(1, store.reserve(meta(1)));
        map.map(2, store.reserve(meta(2)));
        map.map(3, store.reserve(meta(3)));

        assert!(!map.contains(1));
        assert!(map.contains(2));
        assert!(map.contains(3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_entries_bounded_by_store_capacity() {
        let mut store = FrameInfoStore::new(3).unwrap();
        let mut map = TimestampCorrelator::with_capacity(3);
        assert!(map.capacity() >= 3);
        for ts in 0..50u32 {
            map.map(ts * 90, store.reserve(meta(i64::from(ts))));
        }
        assert_eq!(map.len(), 3);
        assert!(map.contains(49 * 90));
        assert!(!map.contains(46 * 90));
    }
}
