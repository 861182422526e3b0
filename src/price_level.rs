//! Price Ladder - five fixed slots per book side.
//!
//! Slot 0 holds the best price. Inserting at a slot pushes the slots
//! below it one step deeper (the deepest is evicted); deleting pulls the
//! deeper slots up one step and leaves the deepest slot empty.

use crate::types::NUM_LEVELS;

/// One aggregated price level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PriceLevel {
    /// Number of orders resting at this price
    pub count: u32,
    /// Fixed-point price
    pub price: u32,
    /// Total quantity at this price
    pub quantity: u32,
}

impl PriceLevel {
    pub const EMPTY: Self = Self {
        count: 0,
        price: 0,
        quantity: 0,
    };

    #[inline]
    pub const fn new(count: u32, price: u32, quantity: u32) -> Self {
        Self {
            count,
            price,
            quantity,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0 && self.price == 0 && self.quantity == 0
    }
}

/// One side of one symbol's book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Ladder {
    levels: [PriceLevel; NUM_LEVELS],
}

impl Ladder {
    pub const fn new() -> Self {
        Self {
            levels: [PriceLevel::EMPTY; NUM_LEVELS],
        }
    }

    /// Insert at `level`, shifting deeper levels down.
    ///
    /// # Complexity
    /// O(NUM_LEVELS)
    #[inline]
    pub fn insert(&mut self, level: usize, entry: PriceLevel) {
        debug_assert!(level < NUM_LEVELS);
        self.levels.copy_within(level..NUM_LEVELS - 1, level + 1);
        self.levels[level] = entry;
    }

    /// Overwrite `level` in place.
    #[inline]
    pub fn modify(&mut self, level: usize, entry: PriceLevel) {
        debug_assert!(level < NUM_LEVELS);
        self.levels[level] = entry;
    }

    /// Remove `level`, shifting deeper levels up and emptying the last slot.
    ///
    /// # Complexity
    /// O(NUM_LEVELS)
    #[inline]
    pub fn delete(&mut self, level: usize) {
        debug_assert!(level < NUM_LEVELS);
        self.levels.copy_within(level + 1..NUM_LEVELS, level);
        self.levels[NUM_LEVELS - 1] = PriceLevel::EMPTY;
    }

    #[inline]
    pub fn level(&self, level: usize) -> PriceLevel {
        self.levels[level]
    }

    #[inline]
    pub fn levels(&self) -> &[PriceLevel; NUM_LEVELS] {
        &self.levels
    }

    #[inline]
    pub fn counts(&self) -> [u32; NUM_LEVELS] {
        self.levels.map(|l| l.count)
    }

    #[inline]
    pub fn prices(&self) -> [u32; NUM_LEVELS] {
        self.levels.map(|l| l.price)
    }

    #[inline]
    pub fn quantities(&self) -> [u32; NUM_LEVELS] {
        self.levels.map(|l| l.quantity)
    }

    /// Number of occupied slots counted from the top.
    pub fn depth(&self) -> usize {
        self.levels.iter().take_while(|l| !l.is_empty()).count()
    }

    /// True when no empty slot sits above an occupied one.
    pub fn is_contiguous(&self) -> bool {
        let depth = self.depth();
        self.levels[depth..].iter().all(PriceLevel::is_empty)
    }

    pub fn clear(&mut self) {
        self.levels = [PriceLevel::EMPTY; NUM_LEVELS];
    }
}
