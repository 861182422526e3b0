//! Order Book - per-symbol five-level ladders.
//!
//! Applies one [`BookOperation`] per activation to the ladder of its
//! symbol and side, then emits a full snapshot of that symbol. Every
//! operation yields exactly one snapshot, including no-ops and invalid
//! operations.

use std::sync::Arc;

use crate::codec::{pack_snapshot, SnapshotRecord};
use crate::control::{bits, ControlRegisters};
use crate::price_level::{Ladder, PriceLevel};
use crate::types::{
    BookOpCode, BookOperation, BookSnapshot, Side, LEVEL_UNSPECIFIED, NUM_LEVELS, NUM_SYMBOLS,
    SNAPSHOT_TIMESTAMP_MASK,
};

/// Both sides of one symbol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SymbolBook {
    pub bids: Ladder,
    pub asks: Ladder,
}

impl SymbolBook {
    #[inline]
    pub fn side(&self, side: Side) -> &Ladder {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    #[inline]
    pub fn side_mut(&mut self, side: Side) -> &mut Ladder {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}

/// Order book counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BookStats {
    /// Operations consumed
    pub operations: u32,
    /// Operations with an unknown opcode
    pub invalid_operations: u32,
    /// Snapshots generated
    pub snapshots: u32,
    /// Snapshots copied to the data mover
    pub ring_forwarded: u32,
    pub add: u32,
    pub modify: u32,
    pub delete: u32,
    /// Visible and hidden transacts
    pub transact: u32,
    pub halt: u32,
    /// Operations naming a level outside the ladder
    pub level_errors: u32,
}

/// Resolve an operation level to a ladder slot.
///
/// An unspecified level resolves to the top of the book. This is a
/// provisional policy.
#[inline]
pub fn resolve_level(level: i8) -> Option<usize> {
    if level == LEVEL_UNSPECIFIED {
        return Some(0);
    }
    usize::try_from(level).ok().filter(|l| *l < NUM_LEVELS)
}

/// The order book stage.
pub struct OrderBook {
    books: Box<[SymbolBook]>,
    stats: BookStats,
    capture: SnapshotRecord,
    control: Arc<ControlRegisters>,
}

impl OrderBook {
    pub fn new(control: Arc<ControlRegisters>) -> Self {
        Self {
            books: vec![SymbolBook::default(); NUM_SYMBOLS].into_boxed_slice(),
            stats: BookStats::default(),
            capture: SnapshotRecord::zeroed(),
            control,
        }
    }

    /// One activation. Consumes an operation only when every enabled
    /// output has room.
    pub fn poll(
        &mut self,
        input: &mut rtrb::Consumer<BookOperation>,
        output: &mut rtrb::Producer<BookSnapshot>,
        ring: &mut rtrb::Producer<BookSnapshot>,
    ) -> bool {
        let word = self.control.book.word();
        if word.reset_count() {
            self.stats = BookStats::default();
        }
        if word.reset_data() {
            self.clear();
        }
        if word.halted() || input.is_empty() || output.is_full() {
            return false;
        }
        let forward = word.has(bits::BOOK_FORWARD);
        if forward && ring.is_full() {
            return false;
        }

        let Ok(op) = input.pop() else {
            return false;
        };
        let snapshot = self.apply(&op);
        let _ = output.push(snapshot);
        if forward {
            let _ = ring.push(snapshot);
            self.stats.ring_forwarded = self.stats.ring_forwarded.wrapping_add(1);
        }
        true
    }

    /// Apply one operation and build the resulting snapshot.
    pub fn apply(&mut self, op: &BookOperation) -> BookSnapshot {
        let stats = &mut self.stats;
        stats.operations = stats.operations.wrapping_add(1);

        let book = &mut self.books[op.symbol_index as usize];
        let entry = PriceLevel::new(op.order_count, op.price as u32, op.quantity);
        let slot = resolve_level(op.level);

        match op.op_code {
            BookOpCode::Add => {
                stats.add = stats.add.wrapping_add(1);
                match slot {
                    Some(level) => book.side_mut(op.direction).insert(level, entry),
                    None => stats.level_errors = stats.level_errors.wrapping_add(1),
                }
            }
            BookOpCode::Modify => {
                stats.modify = stats.modify.wrapping_add(1);
                match slot {
                    Some(level) => book.side_mut(op.direction).modify(level, entry),
                    None => stats.level_errors = stats.level_errors.wrapping_add(1),
                }
            }
            BookOpCode::Delete => {
                stats.delete = stats.delete.wrapping_add(1);
                match slot {
                    Some(level) => book.side_mut(op.direction).delete(level),
                    None => stats.level_errors = stats.level_errors.wrapping_add(1),
                }
            }
            BookOpCode::TransactVisible | BookOpCode::TransactHidden => {
                stats.transact = stats.transact.wrapping_add(1);
            }
            BookOpCode::Halt => {
                stats.halt = stats.halt.wrapping_add(1);
            }
            BookOpCode::Unknown(_) => {
                stats.invalid_operations = stats.invalid_operations.wrapping_add(1);
            }
        }

        let snapshot = self.snapshot(op.symbol_index, op.timestamp);
        self.stats.snapshots = self.stats.snapshots.wrapping_add(1);
        if !self.control.book.capture_frozen() {
            self.capture = pack_snapshot(&snapshot);
        }
        snapshot
    }

    /// Current five-level view of `symbol`.
    pub fn snapshot(&self, symbol: u8, timestamp: u64) -> BookSnapshot {
        let book = &self.books[symbol as usize];
        BookSnapshot {
            timestamp: timestamp & SNAPSHOT_TIMESTAMP_MASK,
            symbol_index: symbol,
            bid_count: book.bids.counts(),
            bid_price: book.bids.prices(),
            bid_quantity: book.bids.quantities(),
            ask_count: book.asks.counts(),
            ask_price: book.asks.prices(),
            ask_quantity: book.asks.quantities(),
        }
    }

    #[inline]
    pub fn ladder(&self, symbol: u8, side: Side) -> &Ladder {
        self.books[symbol as usize].side(side)
    }

    #[inline]
    pub fn stats(&self) -> BookStats {
        self.stats
    }

    /// Most recent packed snapshot, unless capture was frozen.
    #[inline]
    pub fn capture(&self) -> SnapshotRecord {
        self.capture
    }

    /// Empty every ladder.
    pub fn clear(&mut self) {
        for book in self.books.iter_mut() {
            *book = SymbolBook::default();
        }
    }

    /// Touch every ladder so the pages are resident before trading.
    pub fn warm_up(&mut self) {
        for book in self.books.iter_mut() {
            *book = std::hint::black_box(*book);
        }
    }

    /// Compute a hash of every ladder (for determinism testing)
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.books.hash(&mut hasher);
        hasher.finish()
    }
}
