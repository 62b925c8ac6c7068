//! Fixed-capacity ring of per-submission metadata slots.
//!
//! Slots are handed out strictly round-robin. When more submissions are in
//! flight than there are slots, the oldest slot is overwritten; a completion
//! for the overwritten submission then loads nothing and is dropped by the
//! correlator. There is no allocation per frame.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use crate::{frames::FrameMetadata, Error, Result};

/// Number of metadata slots an adapter keeps by default.
///
/// This bounds how many decodes may be outstanding before the oldest
/// submission's metadata is overwritten.
pub const DEFAULT_FRAME_INFO_CAPACITY: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    // 0 means the slot has never been written.
    generation: u64,
    metadata: FrameMetadata,
}

type Slots = Arc<[Mutex<Slot>]>;

/// Ring buffer of [`FrameMetadata`] owned by the submitting side.
///
/// # Examples
///
/// ```
/// use decode_correlator::{FrameInfoStore, FrameMetadata};
///
/// let mut store = FrameInfoStore::new(2)?;
/// let first = store.reserve(FrameMetadata { decode_start_ms: 1, ..Default::default() });
/// let _second = store.reserve(FrameMetadata { decode_start_ms: 2, ..Default::default() });
/// assert_eq!(first.load().unwrap().decode_start_ms, 1);
///
/// // The third reservation wraps around and overwrites the first slot.
/// let third = store.reserve(FrameMetadata { decode_start_ms: 3, ..Default::default() });
/// assert_eq!(third.index(), first.index());
/// assert!(first.load().is_none());
/// # Ok::<(), decode_correlator::Error>(())
/// ```
pub struct FrameInfoStore {
    slots: Slots,
    next: usize,
    generation: u64,
}

impl FrameInfoStore {
    /// Creates a store with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "frame info capacity must be at least 1".into(),
            ));
        }
        Ok(Self::with_slots(capacity))
    }

    fn with_slots(capacity: usize) -> Self {
        let slots: Slots = (0..capacity).map(|_| Mutex::new(Slot::default())).collect();
        Self {
            slots,
            next: 0,
            generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Writes `metadata` into the next slot and returns a reference to it.
    ///
    /// The write completes before the reference exists, so a slot is never
    /// visible to the completion side half-written.
    pub fn reserve(&mut self, metadata: FrameMetadata) -> SlotRef {
        self.generation += 1;
        let index = self.next;
        {
            let mut slot = self.slots[index]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Slot {
                generation: self.generation,
                metadata,
            };
        }
        self.next = (self.next + 1) % self.slots.len();

        SlotRef {
            slots: Arc::clone(&self.slots),
            index,
            generation: self.generation,
        }
    }
}

impl Default for FrameInfoStore {
    /// A store with [`DEFAULT_FRAME_INFO_CAPACITY`] slots.
    fn default() -> Self {
        Self::with_slots(DEFAULT_FRAME_INFO_CAPACITY)
    }
}

impl fmt::Debug for FrameInfoStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameInfoStore")
            .field("capacity", &self.slots.len())
            .field("next", &self.next)
            .field("generation", &self.generation)
            .finish()
    }
}

/// A handle to one reservation in a [`FrameInfoStore`].
///
/// The handle remembers which reservation it was created for. Once the slot
/// is reused by a later submission, [`SlotRef::load`] returns `None`.
#[derive(Clone)]
pub struct SlotRef {
    slots: Slots,
    index: usize,
    generation: u64,
}

impl SlotRef {
    /// Position of the slot in the ring.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reads the metadata if the slot still holds this reservation.
    pub fn load(&self) -> Option<FrameMetadata> {
        let slot = self.slots[self.index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (slot.generation == self.generation).then_some(slot.metadata)
    }

    /// Whether `other` refers to the same slot of the same store.
    pub(crate) fn same_slot(&self, other: &SlotRef) -> bool {
        self.index == other.index && Arc::ptr_eq(&self.slots, &other.slots)
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRef")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}
