//! Codec - fixed-width packed records shared with the host.
//!
//! Every record is a little-endian bit vector stored as `u64` words:
//! bit 0 is the least significant bit of word 0. Field positions are
//! given as `(lowest bit, width)`.
//!
//! # Operation record (224 bits)
//!
//! | Field       | Bits      |
//! |-------------|-----------|
//! | timestamp   | 223:160   |
//! | opcode      | 159:152   |
//! | symbol      | 151:144   |
//! | order id    | 143:112   |
//! | order count | 111:80    |
//! | quantity    | 79:48     |
//! | price       | 47:16     |
//! | direction   | 15:8      |
//! | level       | 7:0       |
//!
//! # Snapshot record (1024 bits)
//!
//! | Field        | Bits      |
//! |--------------|-----------|
//! | timestamp    | 1023:968  |
//! | symbol       | 967:960   |
//! | bid count    | 959:800   |
//! | bid price    | 799:640   |
//! | bid quantity | 639:480   |
//! | ask count    | 479:320   |
//! | ask price    | 319:160   |
//! | ask quantity | 159:0     |
//!
//! Each 160-bit array holds level `i` at bits `32i+31:32i` of the field.
//!
//! # Order record (256 bits, 184 used)
//!
//! | Field     | Bits    |
//! |-----------|---------|
//! | timestamp | 183:120 |
//! | opcode    | 119:112 |
//! | symbol    | 111:104 |
//! | order id  | 103:72  |
//! | quantity  | 71:40   |
//! | price     | 39:8    |
//! | direction | 7:0     |

use crate::error::CodecError;
use crate::types::{
    BookOpCode, BookOperation, BookSnapshot, OrderOpCode, OrderRequest, Side, NUM_LEVELS,
    SNAPSHOT_TIMESTAMP_MASK,
};

/// A fixed-width record of `WORDS` 64-bit words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitRecord<const WORDS: usize> {
    words: [u64; WORDS],
}

impl<const WORDS: usize> BitRecord<WORDS> {
    pub const BITS: usize = WORDS * 64;

    #[inline]
    pub const fn zeroed() -> Self {
        Self { words: [0; WORDS] }
    }

    #[inline]
    pub const fn from_words(words: [u64; WORDS]) -> Self {
        Self { words }
    }

    #[inline]
    pub const fn words(&self) -> &[u64; WORDS] {
        &self.words
    }

    /// Write `width` bits of `value` starting at bit `lo`.
    #[inline]
    pub fn set(&mut self, lo: usize, width: u32, value: u64) {
        debug_assert!(width >= 1 && width <= 64 && lo + width as usize <= Self::BITS);
        let mask = field_mask(width);
        let value = value & mask;
        let word = lo / 64;
        let shift = lo % 64;
        self.words[word] = (self.words[word] & !(mask << shift)) | (value << shift);
        if shift + width as usize > 64 {
            let placed = 64 - shift;
            let high_mask = mask >> placed;
            self.words[word + 1] = (self.words[word + 1] & !high_mask) | (value >> placed);
        }
    }

    /// Read `width` bits starting at bit `lo`.
    #[inline]
    pub fn get(&self, lo: usize, width: u32) -> u64 {
        debug_assert!(width >= 1 && width <= 64 && lo + width as usize <= Self::BITS);
        let word = lo / 64;
        let shift = lo % 64;
        let mut value = self.words[word] >> shift;
        if shift + width as usize > 64 {
            value |= self.words[word + 1] << (64 - shift);
        }
        value & field_mask(width)
    }

    /// Copy the record into `out` as little-endian bytes.
    ///
    /// Copies `min(out.len(), WORDS * 8)` bytes.
    pub fn write_le_bytes(&self, out: &mut [u8]) {
        for (chunk, word) in out.chunks_mut(8).zip(self.words.iter()) {
            let bytes = word.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

impl<const WORDS: usize> Default for BitRecord<WORDS> {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[inline]
const fn field_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Position of one field inside a record.
#[derive(Clone, Copy, Debug)]
struct Field {
    lo: usize,
    width: u32,
}

const fn field(lo: usize, width: u32) -> Field {
    Field { lo, width }
}

// ============================================================================
// Book Operations
// ============================================================================

/// 224-bit book operation record (padded to four words).
pub type OperationRecord = BitRecord<4>;

mod op_layout {
    use super::{field, Field};
    pub const TIMESTAMP: Field = field(160, 64);
    pub const OPCODE: Field = field(152, 8);
    pub const SYMBOL: Field = field(144, 8);
    pub const ORDER_ID: Field = field(112, 32);
    pub const ORDER_COUNT: Field = field(80, 32);
    pub const QUANTITY: Field = field(48, 32);
    pub const PRICE: Field = field(16, 32);
    pub const DIRECTION: Field = field(8, 8);
    pub const LEVEL: Field = field(0, 8);
}

fn put<const W: usize>(record: &mut BitRecord<W>, f: Field, value: u64) {
    record.set(f.lo, f.width, value);
}

fn take<const W: usize>(record: &BitRecord<W>, f: Field) -> u64 {
    record.get(f.lo, f.width)
}

pub fn pack_operation(op: &BookOperation) -> OperationRecord {
    use op_layout::*;
    let mut record = OperationRecord::zeroed();
    put(&mut record, TIMESTAMP, op.timestamp);
    put(&mut record, OPCODE, op.op_code.code() as u64);
    put(&mut record, SYMBOL, op.symbol_index as u64);
    put(&mut record, ORDER_ID, op.order_id as u64);
    put(&mut record, ORDER_COUNT, op.order_count as u64);
    put(&mut record, QUANTITY, op.quantity as u64);
    put(&mut record, PRICE, op.price as u32 as u64);
    put(&mut record, DIRECTION, op.direction.code() as u64);
    put(&mut record, LEVEL, op.level as u8 as u64);
    record
}

pub fn unpack_operation(record: &OperationRecord) -> Result<BookOperation, CodecError> {
    use op_layout::*;
    let direction_code = take(record, DIRECTION) as u8;
    let direction = Side::from_code(direction_code).ok_or(CodecError::Direction(direction_code))?;
    Ok(BookOperation {
        timestamp: take(record, TIMESTAMP),
        op_code: BookOpCode::from(take(record, OPCODE) as u8),
        symbol_index: take(record, SYMBOL) as u8,
        order_id: take(record, ORDER_ID) as u32,
        order_count: take(record, ORDER_COUNT) as u32,
        quantity: take(record, QUANTITY) as u32,
        price: take(record, PRICE) as u32 as i32,
        direction,
        level: take(record, LEVEL) as u8 as i8,
    })
}

// ============================================================================
// Book Snapshots
// ============================================================================

/// 1024-bit snapshot record.
pub type SnapshotRecord = BitRecord<16>;

/// Bytes in a packed snapshot.
pub const SNAPSHOT_RECORD_BYTES: usize = 128;

mod snapshot_layout {
    use super::{field, Field};
    pub const TIMESTAMP: Field = field(968, 56);
    pub const SYMBOL: Field = field(960, 8);
    pub const BID_COUNT: usize = 800;
    pub const BID_PRICE: usize = 640;
    pub const BID_QUANTITY: usize = 480;
    pub const ASK_COUNT: usize = 320;
    pub const ASK_PRICE: usize = 160;
    pub const ASK_QUANTITY: usize = 0;
}

fn put_levels(record: &mut SnapshotRecord, base: usize, values: &[u32; NUM_LEVELS]) {
    for (level, value) in values.iter().enumerate() {
        record.set(base + level * 32, 32, *value as u64);
    }
}

fn take_levels(record: &SnapshotRecord, base: usize) -> [u32; NUM_LEVELS] {
    std::array::from_fn(|level| record.get(base + level * 32, 32) as u32)
}

pub fn pack_snapshot(snapshot: &BookSnapshot) -> SnapshotRecord {
    use snapshot_layout::*;
    let mut record = SnapshotRecord::zeroed();
    put(&mut record, TIMESTAMP, snapshot.timestamp & SNAPSHOT_TIMESTAMP_MASK);
    put(&mut record, SYMBOL, snapshot.symbol_index as u64);
    put_levels(&mut record, BID_COUNT, &snapshot.bid_count);
    put_levels(&mut record, BID_PRICE, &snapshot.bid_price);
    put_levels(&mut record, BID_QUANTITY, &snapshot.bid_quantity);
    put_levels(&mut record, ASK_COUNT, &snapshot.ask_count);
    put_levels(&mut record, ASK_PRICE, &snapshot.ask_price);
    put_levels(&mut record, ASK_QUANTITY, &snapshot.ask_quantity);
    record
}

pub fn unpack_snapshot(record: &SnapshotRecord) -> BookSnapshot {
    use snapshot_layout::*;
    BookSnapshot {
        timestamp: take(record, TIMESTAMP),
        symbol_index: take(record, SYMBOL) as u8,
        bid_count: take_levels(record, BID_COUNT),
        bid_price: take_levels(record, BID_PRICE),
        bid_quantity: take_levels(record, BID_QUANTITY),
        ask_count: take_levels(record, ASK_COUNT),
        ask_price: take_levels(record, ASK_PRICE),
        ask_quantity: take_levels(record, ASK_QUANTITY),
    }
}

// ============================================================================
// Order Requests
// ============================================================================

/// 256-bit order record.
pub type OrderRecord = BitRecord<4>;

/// Bytes in a packed order.
pub const ORDER_RECORD_BYTES: usize = 32;

mod order_layout {
    use super::{field, Field};
    pub const TIMESTAMP: Field = field(120, 64);
    pub const OPCODE: Field = field(112, 8);
    pub const SYMBOL: Field = field(104, 8);
    pub const ORDER_ID: Field = field(72, 32);
    pub const QUANTITY: Field = field(40, 32);
    pub const PRICE: Field = field(8, 32);
    pub const DIRECTION: Field = field(0, 8);
}

pub fn pack_order(order: &OrderRequest) -> OrderRecord {
    use order_layout::*;
    let mut record = OrderRecord::zeroed();
    put(&mut record, TIMESTAMP, order.timestamp);
    put(&mut record, OPCODE, order.op_code as u64);
    put(&mut record, SYMBOL, order.symbol_index as u64);
    put(&mut record, ORDER_ID, order.order_id as u64);
    put(&mut record, QUANTITY, order.quantity as u64);
    put(&mut record, PRICE, order.price as u64);
    put(&mut record, DIRECTION, order.direction.code() as u64);
    record
}

pub fn unpack_order(record: &OrderRecord) -> Result<OrderRequest, CodecError> {
    use order_layout::*;
    let op = take(record, OPCODE) as u8;
    let op_code = OrderOpCode::from_code(op).ok_or(CodecError::OrderOpCode(op))?;
    let dir = take(record, DIRECTION) as u8;
    let direction = Side::from_code(dir).ok_or(CodecError::Direction(dir))?;
    Ok(OrderRequest {
        timestamp: take(record, TIMESTAMP),
        op_code,
        symbol_index: take(record, SYMBOL) as u8,
        order_id: take(record, ORDER_ID) as u32,
        quantity: take(record, QUANTITY) as u32,
        price: take(record, PRICE) as u32,
        direction,
    })
}
