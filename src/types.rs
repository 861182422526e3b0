//! Shared data model for the trading pipeline.
//!
//! Book operations flow from the feed decoder into the order book,
//! snapshots flow from the book into the strategy engine, and order
//! requests flow from the strategy engine into order entry.

use rust_decimal::Decimal;

/// Number of instruments the pipeline tracks.
pub const NUM_SYMBOLS: usize = 256;

/// Depth of every price ladder.
pub const NUM_LEVELS: usize = 5;

/// Level value carried by an operation that does not name a level.
pub const LEVEL_UNSPECIFIED: i8 = -1;

/// Decimal places of the fixed-point price unit (1e-5).
pub const PRICE_SCALE: u32 = 5;

/// Snapshot timestamps are 56 bits wide.
pub const SNAPSHOT_TIMESTAMP_MASK: u64 = (1 << 56) - 1;

/// Convert a fixed-point price into a decimal for display.
#[inline]
pub fn price_to_decimal(price: i64) -> Decimal {
    Decimal::new(price, PRICE_SCALE)
}

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Decode a wire direction code.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Side::Bid),
            1 => Some(Side::Ask),
            _ => None,
        }
    }

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Book Operations
// ============================================================================

/// Book mutation codes. Codes outside the known set are carried through
/// so the order book can count them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BookOpCode {
    Add,
    Modify,
    Delete,
    TransactVisible,
    TransactHidden,
    Halt,
    Unknown(u8),
}

impl BookOpCode {
    #[inline]
    pub const fn code(self) -> u8 {
        match self {
            BookOpCode::Add => 0,
            BookOpCode::Modify => 1,
            BookOpCode::Delete => 2,
            BookOpCode::TransactVisible => 3,
            BookOpCode::TransactHidden => 4,
            BookOpCode::Halt => 6,
            BookOpCode::Unknown(code) => code,
        }
    }
}

impl From<u8> for BookOpCode {
    #[inline]
    fn from(code: u8) -> Self {
        match code {
            0 => BookOpCode::Add,
            1 => BookOpCode::Modify,
            2 => BookOpCode::Delete,
            3 => BookOpCode::TransactVisible,
            4 => BookOpCode::TransactHidden,
            6 => BookOpCode::Halt,
            other => BookOpCode::Unknown(other),
        }
    }
}

/// A single normalized mutation targeting one level of one symbol's ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookOperation {
    /// Exchange transact time
    pub timestamp: u64,
    pub op_code: BookOpCode,
    /// Dense symbol index assigned by the symbol table
    pub symbol_index: u8,
    pub order_id: u32,
    pub order_count: u32,
    pub quantity: u32,
    /// Fixed-point price (1.00000 -> 100000)
    pub price: i32,
    pub direction: Side,
    /// Ladder level 0..=4, or [`LEVEL_UNSPECIFIED`]
    pub level: i8,
}

// ============================================================================
// Book Snapshots
// ============================================================================

/// Five-level view of both sides of one symbol. Level 0 is the best price.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BookSnapshot {
    /// 56-bit timestamp (operation time, or RTT cycle stamp on the ring path)
    pub timestamp: u64,
    pub symbol_index: u8,
    pub bid_count: [u32; NUM_LEVELS],
    pub bid_price: [u32; NUM_LEVELS],
    pub bid_quantity: [u32; NUM_LEVELS],
    pub ask_count: [u32; NUM_LEVELS],
    pub ask_price: [u32; NUM_LEVELS],
    pub ask_quantity: [u32; NUM_LEVELS],
}

impl BookSnapshot {
    /// Best bid price (level 0), zero when the side is empty.
    #[inline]
    pub const fn best_bid(&self) -> u32 {
        self.bid_price[0]
    }

    /// Best ask price (level 0), zero when the side is empty.
    #[inline]
    pub const fn best_ask(&self) -> u32 {
        self.ask_price[0]
    }
}

// ============================================================================
// Order Requests
// ============================================================================

/// Order entry operation codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OrderOpCode {
    Add = 0,
    Modify = 1,
    Delete = 2,
}

impl OrderOpCode {
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OrderOpCode::Add),
            1 => Some(OrderOpCode::Modify),
            2 => Some(OrderOpCode::Delete),
            _ => None,
        }
    }
}

/// An order emitted by the strategy engine (or pushed by the host).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OrderRequest {
    pub timestamp: u64,
    pub op_code: OrderOpCode,
    pub symbol_index: u8,
    /// Assigned monotonically by the strategy engine, starting at 1
    pub order_id: u32,
    pub quantity: u32,
    /// Fixed-point price
    pub price: u32,
    pub direction: Side,
}

// ============================================================================
// Strategies
// ============================================================================

/// Strategy selector values written into the strategy control registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyId {
    None,
    Peg,
    Limit,
    Unknown(u8),
}

impl StrategyId {
    #[inline]
    pub const fn code(self) -> u8 {
        match self {
            StrategyId::None => 0,
            StrategyId::Peg => 1,
            StrategyId::Limit => 2,
            StrategyId::Unknown(code) => code,
        }
    }
}

impl From<u8> for StrategyId {
    #[inline]
    fn from(code: u8) -> Self {
        match code {
            0 => StrategyId::None,
            1 => StrategyId::Peg,
            2 => StrategyId::Limit,
            other => StrategyId::Unknown(other),
        }
    }
}
