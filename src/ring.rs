//! Ring Store - fixed-capacity record slots shared by the two ends of a ring.
//!
//! The store is a contiguous block of atomic words allocated once at
//! startup. Indices are free-running `u32` counters; a slot is chosen by
//! `index mod capacity` only at the point of storage or retrieval, so
//! `head == tail` is the empty test and `tail - head == capacity` is full.
//! Capacity must divide 2^32 (a power of two) for the counters to wrap
//! consistently.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::BitRecord;

/// Slots per ring.
pub const RING_CAPACITY: usize = 65_536;

/// Fixed-size records of `WORDS` 64-bit words.
pub struct RingStore<const WORDS: usize> {
    /// `capacity * WORDS` words, slot-major
    words: Box<[AtomicU64]>,
    capacity: usize,
}

impl<const WORDS: usize> RingStore<WORDS> {
    /// Create a store with `capacity` slots.
    ///
    /// # Panics
    /// Panics if capacity is not a power of two or exceeds 2^31.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity <= 1 << 31,
            "ring capacity must be a power of two no larger than 2^31"
        );
        Self {
            words: (0..capacity * WORDS).map(|_| AtomicU64::new(0)).collect(),
            capacity,
        }
    }

    #[inline]
    fn base(&self, index: u32) -> usize {
        (index as usize & (self.capacity - 1)) * WORDS
    }

    /// Write the slot addressed by `index`.
    ///
    /// Words are written relaxed; the caller publishes the slot by
    /// storing the advanced index with release ordering.
    #[inline]
    pub fn store(&self, index: u32, record: &BitRecord<WORDS>) {
        let base = self.base(index);
        for (slot, word) in self.words[base..base + WORDS].iter().zip(record.words()) {
            slot.store(*word, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn load(&self, index: u32) -> BitRecord<WORDS> {
        let base = self.base(index);
        let slots = &self.words[base..base + WORDS];
        BitRecord::from_words(std::array::from_fn(|k| slots[k].load(Ordering::Relaxed)))
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pre-fault every page of the store.
    pub fn warm_up(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }
}

impl<const WORDS: usize> fmt::Debug for RingStore<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingStore")
            .field("capacity", &self.capacity)
            .field("record_words", &WORDS)
            .finish()
    }
}
