//! Incremental-refresh template (id 32) parsing and encoding.
//!
//! # Body layout (little-endian)
//!
//! | Offset | Field                  | Type |
//! |--------|------------------------|------|
//! | 0      | transact time          | u64  |
//! | 8      | match event indicator  | u8   |
//!
//! The root block is `block_length` bytes long (from the message header).
//! It is followed by the book entry group:
//!
//! | Offset | Field            | Type |
//! |--------|------------------|------|
//! | 0      | block length     | u16  |
//! | 2      | entry count      | u8   |
//!
//! Each book entry (`block length` bytes, at least 27):
//!
//! | Offset | Field             | Type |
//! |--------|-------------------|------|
//! | 0      | price mantissa    | i64  |
//! | 8      | size              | i32  |
//! | 12     | security id       | i32  |
//! | 16     | report sequence   | u32  |
//! | 20     | number of orders  | i32  |
//! | 24     | price level       | u8   |
//! | 25     | update action     | u8   |
//! | 26     | entry type        | u8   |
//!
//! An optional order group follows with an 8-byte header (block length
//! u16 at 0, entry count u8 at 7) and entries of at least 22 bytes:
//! order id u64 @0, priority u64 @8, display quantity i32 @16,
//! reference id u8 @20, order update action u8 @21.

use crate::framing::{Framed, MessageHeader, MESSAGE_PREAMBLE_BYTES};
use crate::reassembly::{packet_frames, Frame, PACKET_HEADER_BYTES};
use crate::types::{BookOpCode, BookOperation, Side};

/// The only template that produces book operations.
pub const INCREMENTAL_REFRESH_TEMPLATE: u16 = 32;

/// Schema id written by the encoder.
pub const SCHEMA_ID: u16 = 1;

/// Schema version written by the encoder.
pub const SCHEMA_VERSION: u16 = 9;

/// Root block length written by the encoder.
pub const ROOT_BLOCK_BYTES: u16 = 11;

/// Book entry block length written by the encoder.
pub const BOOK_ENTRY_BYTES: u16 = 32;

/// Order entry block length written by the encoder.
pub const ORDER_ENTRY_BYTES: u16 = 24;

/// Price mantissa units per fixed-point price unit.
pub const MANTISSA_PER_PRICE: i64 = 100_000;

const MIN_ROOT_BYTES: usize = 9;
const MIN_BOOK_ENTRY_BYTES: usize = 27;
const MIN_ORDER_ENTRY_BYTES: usize = 22;
const BOOK_GROUP_HEADER_BYTES: usize = 3;
const ORDER_GROUP_HEADER_BYTES: usize = 8;

/// One decoded price-level entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BookEntry {
    /// Transact time of the enclosing message
    pub transact_time: u64,
    pub match_event: u8,
    pub price_mantissa: i64,
    pub size: i32,
    pub security_id: i32,
    pub rpt_seq: u32,
    pub number_of_orders: i32,
    pub price_level: u8,
    pub update_action: u8,
    /// ASCII `'0'` bid, `'1'` ask
    pub entry_type: u8,
}

impl BookEntry {
    /// Normalize into a book operation for `symbol_index`.
    ///
    /// Returns `None` when the entry type is not a bid or ask.
    #[inline]
    pub fn to_operation(&self, symbol_index: u8) -> Option<BookOperation> {
        let direction = Side::from_code(self.entry_type.wrapping_sub(b'0'))?;
        Some(BookOperation {
            timestamp: self.transact_time,
            op_code: BookOpCode::from(self.update_action),
            symbol_index,
            order_id: 0,
            order_count: self.number_of_orders as u32,
            quantity: self.size as u32,
            price: (self.price_mantissa / MANTISSA_PER_PRICE) as i32,
            direction,
            level: self.price_level as i8,
        })
    }
}

/// One decoded order-level entry. Not forwarded to the book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderDetail {
    pub order_id: u64,
    pub priority: u64,
    pub display_quantity: i32,
    pub reference_id: u8,
    pub update_action: u8,
}

// ============================================================================
// Parsing
// ============================================================================

#[inline]
fn read<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    buf.get(offset..offset + N)?.try_into().ok()
}

#[inline]
fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

#[inline]
fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    read(buf, offset).map(u16::from_le_bytes)
}

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    read(buf, offset).map(u32::from_le_bytes)
}

#[inline]
fn read_i32(buf: &[u8], offset: usize) -> Option<i32> {
    read(buf, offset).map(i32::from_le_bytes)
}

#[inline]
fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    read(buf, offset).map(u64::from_le_bytes)
}

/// What a single message body yielded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub book_entries: u32,
    pub order_entries: u32,
    /// Body ended before a declared group entry
    pub truncated: bool,
}

/// Walk an incremental-refresh body, reporting book entries in order.
pub fn parse_incremental_refresh<B, O>(
    body: &[u8],
    block_length: u16,
    mut on_book: B,
    mut on_order: O,
) -> ParseOutcome
where
    B: FnMut(BookEntry),
    O: FnMut(OrderDetail),
{
    let mut outcome = ParseOutcome::default();
    let root = (block_length as usize).max(MIN_ROOT_BYTES);
    let (Some(transact_time), Some(match_event)) = (read_u64(body, 0), read_u8(body, 8)) else {
        outcome.truncated = true;
        return outcome;
    };

    let mut offset = root;
    let (Some(entry_len), Some(count)) = (read_u16(body, offset), read_u8(body, offset + 2)) else {
        outcome.truncated = true;
        return outcome;
    };
    offset += BOOK_GROUP_HEADER_BYTES;
    let entry_len = entry_len as usize;
    if entry_len < MIN_BOOK_ENTRY_BYTES {
        outcome.truncated = count > 0;
        return outcome;
    }

    for _ in 0..count {
        let Some(entry) = body.get(offset..offset + entry_len) else {
            outcome.truncated = true;
            return outcome;
        };
        // Lengths were checked above, so the reads cannot miss
        let parsed = BookEntry {
            transact_time,
            match_event,
            price_mantissa: read_u64(entry, 0).unwrap_or_default() as i64,
            size: read_i32(entry, 8).unwrap_or_default(),
            security_id: read_i32(entry, 12).unwrap_or_default(),
            rpt_seq: read_u32(entry, 16).unwrap_or_default(),
            number_of_orders: read_i32(entry, 20).unwrap_or_default(),
            price_level: entry[24],
            update_action: entry[25],
            entry_type: entry[26],
        };
        on_book(parsed);
        outcome.book_entries += 1;
        offset += entry_len;
    }

    // Order group is optional
    let (Some(order_len), Some(order_count)) = (read_u16(body, offset), read_u8(body, offset + 7)) else {
        return outcome;
    };
    offset += ORDER_GROUP_HEADER_BYTES;
    let order_len = order_len as usize;
    if order_len < MIN_ORDER_ENTRY_BYTES {
        return outcome;
    }
    for _ in 0..order_count {
        let Some(entry) = body.get(offset..offset + order_len) else {
            outcome.truncated = true;
            return outcome;
        };
        on_order(OrderDetail {
            order_id: read_u64(entry, 0).unwrap_or_default(),
            priority: read_u64(entry, 8).unwrap_or_default(),
            display_quantity: read_i32(entry, 16).unwrap_or_default(),
            reference_id: entry[20],
            update_action: entry[21],
        });
        outcome.order_entries += 1;
        offset += order_len;
    }
    outcome
}

// ============================================================================
// Decoder
// ============================================================================

/// Template decoder counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Message bodies completed (any template)
    pub messages: u32,
    /// Messages of the incremental-refresh template
    pub supported: u32,
    /// Messages of any other template
    pub unsupported: u32,
    pub book_entries: u32,
    pub order_entries: u32,
    pub truncated: u32,
}

/// Collects framed message bodies and decodes supported templates.
#[derive(Debug)]
pub struct TemplateDecoder {
    header: Option<MessageHeader>,
    body: Vec<u8>,
    stats: DecoderStats,
}

impl TemplateDecoder {
    pub fn new() -> Self {
        Self {
            header: None,
            body: Vec::with_capacity(u16::MAX as usize),
            stats: DecoderStats::default(),
        }
    }

    /// Consume one framer output; completed entries go to `emit`.
    pub fn push<F: FnMut(BookEntry)>(&mut self, framed: Framed, emit: &mut F) {
        match framed {
            Framed::Header(header) => {
                self.header = Some(header);
                self.body.clear();
            }
            Framed::Body(word) => {
                let bytes = word.data.to_le_bytes();
                self.body.extend_from_slice(&bytes[..word.len.min(8) as usize]);
                if word.last {
                    self.finish(emit);
                }
            }
        }
    }

    fn finish<F: FnMut(BookEntry)>(&mut self, emit: &mut F) {
        let Some(header) = self.header.take() else {
            self.body.clear();
            return;
        };
        self.stats.messages = self.stats.messages.wrapping_add(1);
        if header.template_id != INCREMENTAL_REFRESH_TEMPLATE {
            self.stats.unsupported = self.stats.unsupported.wrapping_add(1);
            self.body.clear();
            return;
        }
        self.stats.supported = self.stats.supported.wrapping_add(1);
        let outcome = parse_incremental_refresh(&self.body, header.block_length, |e| emit(e), |_| {});
        self.stats.book_entries = self.stats.book_entries.wrapping_add(outcome.book_entries);
        self.stats.order_entries = self.stats.order_entries.wrapping_add(outcome.order_entries);
        if outcome.truncated {
            self.stats.truncated = self.stats.truncated.wrapping_add(1);
        }
        self.body.clear();
    }

    #[inline]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DecoderStats::default();
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.body.clear();
    }
}

impl Default for TemplateDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Append one complete incremental-refresh message to `out`.
pub fn encode_incremental_refresh(
    out: &mut Vec<u8>,
    transact_time: u64,
    match_event: u8,
    entries: &[BookEntry],
    orders: &[OrderDetail],
) {
    let start = out.len();
    // Size is patched once the body is written
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&ROOT_BLOCK_BYTES.to_le_bytes());
    out.extend_from_slice(&INCREMENTAL_REFRESH_TEMPLATE.to_le_bytes());
    out.extend_from_slice(&SCHEMA_ID.to_le_bytes());
    out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());

    out.extend_from_slice(&transact_time.to_le_bytes());
    out.push(match_event);
    out.extend_from_slice(&[0u8; 2]);

    out.extend_from_slice(&BOOK_ENTRY_BYTES.to_le_bytes());
    out.push(entries.len().min(u8::MAX as usize) as u8);
    for entry in entries.iter().take(u8::MAX as usize) {
        out.extend_from_slice(&entry.price_mantissa.to_le_bytes());
        out.extend_from_slice(&entry.size.to_le_bytes());
        out.extend_from_slice(&entry.security_id.to_le_bytes());
        out.extend_from_slice(&entry.rpt_seq.to_le_bytes());
        out.extend_from_slice(&entry.number_of_orders.to_le_bytes());
        out.push(entry.price_level);
        out.push(entry.update_action);
        out.push(entry.entry_type);
        out.extend_from_slice(&[0u8; 5]);
    }

    out.extend_from_slice(&ORDER_ENTRY_BYTES.to_le_bytes());
    out.extend_from_slice(&[0u8; 5]);
    out.push(orders.len().min(u8::MAX as usize) as u8);
    for order in orders.iter().take(u8::MAX as usize) {
        out.extend_from_slice(&order.order_id.to_le_bytes());
        out.extend_from_slice(&order.priority.to_le_bytes());
        out.extend_from_slice(&order.display_quantity.to_le_bytes());
        out.push(order.reference_id);
        out.push(order.update_action);
        out.extend_from_slice(&[0u8; 2]);
    }

    let size = (out.len() - start) as u16;
    out[start..start + 2].copy_from_slice(&size.to_le_bytes());
}

/// Builds one feed packet: sequence number, sending time, messages.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    bytes: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(sequence: u32, sending_time: u64) -> Self {
        let mut bytes = Vec::with_capacity(1500);
        bytes.extend_from_slice(&sequence.to_le_bytes());
        bytes.extend_from_slice(&sending_time.to_le_bytes());
        debug_assert_eq!(bytes.len(), PACKET_HEADER_BYTES);
        Self { bytes }
    }

    /// Append an incremental-refresh message.
    pub fn incremental_refresh(mut self, transact_time: u64, entries: &[BookEntry]) -> Self {
        encode_incremental_refresh(&mut self.bytes, transact_time, 0x80, entries, &[]);
        self
    }

    /// Append a message of an arbitrary template with an opaque body.
    pub fn raw_message(mut self, template_id: u16, body: &[u8]) -> Self {
        let size = body.len() as u16 + MESSAGE_PREAMBLE_BYTES;
        self.bytes.extend_from_slice(&size.to_le_bytes());
        self.bytes.extend_from_slice(&0u16.to_le_bytes());
        self.bytes.extend_from_slice(&template_id.to_le_bytes());
        self.bytes.extend_from_slice(&SCHEMA_ID.to_le_bytes());
        self.bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        self.bytes.extend_from_slice(body);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn frames(&self) -> Vec<Frame> {
        packet_frames(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::MessageFramer;
    use crate::reassembly::PacketReassembler;

    fn entry(security_id: i32, action: u8, entry_type: u8, level: u8) -> BookEntry {
        BookEntry {
            transact_time: 1_000,
            match_event: 0x80,
            price_mantissa: 10_000_000_000,
            size: 500,
            security_id,
            rpt_seq: 1,
            number_of_orders: 3,
            price_level: level,
            update_action: action,
            entry_type,
        }
    }

    fn decode(frames: &[Frame]) -> (Vec<BookEntry>, DecoderStats) {
        let mut reassembler = PacketReassembler::new();
        let mut framer = MessageFramer::new();
        let mut decoder = TemplateDecoder::new();
        let mut out = Vec::new();
        for frame in frames {
            for word in reassembler.push(*frame) {
                framer.push(word, &mut |framed| decoder.push(framed, &mut |e| out.push(e)));
            }
        }
        (out, decoder.stats())
    }

    #[test]
    fn test_parse_encoded_message() {
        let entries = [entry(0x1234_5678, 0, b'0', 0), entry(7, 2, b'1', 3)];
        let orders = [OrderDetail {
            order_id: 99,
            priority: 5,
            display_quantity: 10,
            reference_id: 1,
            update_action: 0,
        }];
        let mut message = Vec::new();
        encode_incremental_refresh(&mut message, 1_000, 0x80, &entries, &orders);
        let body = &message[MESSAGE_PREAMBLE_BYTES as usize..];

        let mut book = Vec::new();
        let mut details = Vec::new();
        let outcome = parse_incremental_refresh(body, ROOT_BLOCK_BYTES, |e| book.push(e), |o| details.push(o));
        assert_eq!(outcome.book_entries, 2);
        assert_eq!(outcome.order_entries, 1);
        assert!(!outcome.truncated);
        assert_eq!(book, entries.to_vec());
        assert_eq!(details, orders.to_vec());
    }

    #[test]
    fn test_to_operation_scales_price() {
        let op = entry(1, 0, b'0', 0).to_operation(9).unwrap();
        assert_eq!(op.price, 100_000);
        assert_eq!(op.quantity, 500);
        assert_eq!(op.order_count, 3);
        assert_eq!(op.direction, Side::Bid);
        assert_eq!(op.op_code, BookOpCode::Add);
        assert_eq!(op.symbol_index, 9);
        assert_eq!(op.order_id, 0);

        assert_eq!(entry(1, 0, b'1', 0).to_operation(0).map(|o| o.direction), Some(Side::Ask));
        assert!(entry(1, 0, b'2', 0).to_operation(0).is_none());
        assert!(entry(1, 0, b'A', 0).to_operation(0).is_none());
    }

    #[test]
    fn test_decoder_through_packet() {
        let frames = PacketBuilder::new(1, 0)
            .incremental_refresh(5, &[entry(11, 0, b'0', 0)])
            .raw_message(99, &[1, 2, 3, 4, 5])
            .incremental_refresh(6, &[entry(12, 1, b'1', 1), entry(13, 2, b'0', 2)])
            .frames();
        let (entries, stats) = decode(&frames);
        assert_eq!(entries.iter().map(|e| e.security_id).collect::<Vec<_>>(), vec![11, 12, 13]);
        assert_eq!(entries[0].transact_time, 5);
        assert_eq!(entries[2].transact_time, 6);
        assert_eq!(stats.messages, 3);
        assert_eq!(stats.supported, 2);
        assert_eq!(stats.unsupported, 1);
        assert_eq!(stats.book_entries, 3);
    }

    #[test]
    fn test_truncated_group_keeps_complete_entries() {
        let entries = [entry(1, 0, b'0', 0), entry(2, 0, b'0', 1)];
        let mut message = Vec::new();
        encode_incremental_refresh(&mut message, 1, 0, &entries, &[]);
        let body = &message[MESSAGE_PREAMBLE_BYTES as usize..];
        // Cut inside the second entry
        let cut = &body[..ROOT_BLOCK_BYTES as usize + 3 + 32 + 10];

        let mut book = Vec::new();
        let outcome = parse_incremental_refresh(cut, ROOT_BLOCK_BYTES, |e| book.push(e), |_| {});
        assert!(outcome.truncated);
        assert_eq!(book.len(), 1);
        assert_eq!(book[0].security_id, 1);
    }

    #[test]
    fn test_short_body_yields_nothing() {
        let mut book = Vec::new();
        let outcome = parse_incremental_refresh(&[0u8; 4], ROOT_BLOCK_BYTES, |e| book.push(e), |_| {});
        assert!(outcome.truncated);
        assert!(book.is_empty());
    }
}
