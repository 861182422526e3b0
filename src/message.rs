//! Order message encoding - decimal ASCII fields, template splice, checksum.
//!
//! Every order becomes one 256-byte tag=value message built from a fixed
//! template. Only five fields change per order:
//!
//! | Field         | Offset | Width | Encoding             |
//! |---------------|--------|-------|----------------------|
//! | MsgSeqNum     | 24     | 10    | order id, ASCII      |
//! | SendingTime   | 63     | 8     | timestamp, raw BE    |
//! | ClOrdID       | 75     | 10    | order id, ASCII      |
//! | OrderQty      | 89     | 10    | quantity, ASCII      |
//! | Price         | 103    | 10    | price, ASCII         |
//!
//! The checksum is a 16-bit ones'-complement sum over big-endian byte
//! pairs. The template's static contribution is summed once; each message
//! adds only the contribution of its dynamic fields.

use crate::types::OrderRequest;

/// Bytes per order message.
pub const MESSAGE_LEN: usize = 256;

/// Transmit words per order message.
pub const MESSAGE_WORDS: usize = MESSAGE_LEN / 8;

/// Digits produced by the decimal converter.
pub const ASCII_DIGITS: usize = 10;

pub const SEQ_NUM_OFFSET: usize = 24;
pub const SENDING_TIME_OFFSET: usize = 63;
pub const CL_ORD_ID_OFFSET: usize = 75;
pub const QUANTITY_OFFSET: usize = 89;
pub const PRICE_OFFSET: usize = 103;

/// NewOrderSingle template, `^` separated, dynamic fields zeroed.
pub const ORDER_TEMPLATE: &[u8; MESSAGE_LEN] = b"8=FIX.4.2^9=232^35=D^34=\
\0\0\0\0\0\0\0\0\0\0\
^49=FLASHTRD^56=EXCH^57=G^52=\
\0\0\0\0\0\0\0\0\
^11=\
\0\0\0\0\0\0\0\0\0\0\
^38=\
\0\0\0\0\0\0\0\0\0\0\
^44=\
\0\0\0\0\0\0\0\0\0\0\
^54=1^55=ESZ4^40=2^59=0^21=1^100=XCME^1028=N^107=ES DEC24^204=0^9702=1^58=\
.............................................................\
^10=000^";

// ============================================================================
// Decimal conversion
// ============================================================================

/// Convert to packed BCD with shift-and-add-3, ten digits, most
/// significant digit in bits 39:36.
#[inline]
pub fn binary_to_bcd(value: u32) -> u64 {
    let mut bcd: u64 = 0;
    for bit in (0..32).rev() {
        for digit in 0..ASCII_DIGITS {
            let shift = 4 * digit;
            if (bcd >> shift) & 0xF >= 5 {
                bcd += 3 << shift;
            }
        }
        bcd = (bcd << 1) | ((value >> bit) & 1) as u64;
    }
    bcd
}

/// Expand packed BCD into ASCII digits, most significant first.
#[inline]
pub fn bcd_to_ascii(bcd: u64) -> [u8; ASCII_DIGITS] {
    std::array::from_fn(|i| {
        let shift = 4 * (ASCII_DIGITS - 1 - i);
        ((bcd >> shift) & 0xF) as u8 + b'0'
    })
}

/// Fixed-width, zero-padded decimal ASCII of a 32-bit value.
#[inline]
pub fn u32_to_ascii(value: u32) -> [u8; ASCII_DIGITS] {
    bcd_to_ascii(binary_to_bcd(value))
}

// ============================================================================
// Checksum
// ============================================================================

/// Add a 16-bit slice and fold the carry back in.
#[inline]
pub const fn fold_add(sum: u32, slice: u32) -> u32 {
    let sum = sum + slice;
    (sum + (sum >> 16)) & 0xFFFF
}

/// Ones'-complement contribution of `bytes` placed at message `offset`.
///
/// Bytes at even positions are the high half of their 16-bit slice.
pub fn field_sum(mut sum: u32, bytes: &[u8], offset: usize) -> u32 {
    let mut position = offset;
    let mut rest = bytes;
    if position % 2 == 1 {
        if let Some((first, tail)) = rest.split_first() {
            sum = fold_add(sum, *first as u32);
            rest = tail;
            position += 1;
        }
    }
    debug_assert!(position % 2 == 0 || rest.is_empty());
    let mut pairs = rest.chunks_exact(2);
    for pair in &mut pairs {
        sum = fold_add(sum, u16::from_be_bytes([pair[0], pair[1]]) as u32);
    }
    if let [last] = pairs.remainder() {
        sum = fold_add(sum, (*last as u32) << 8);
    }
    sum
}

/// Checksum of a whole message buffer, as a receiver would compute it.
pub fn message_checksum(bytes: &[u8]) -> u16 {
    field_sum(0, bytes, 0) as u16
}

// ============================================================================
// Encoder
// ============================================================================

/// One serialized order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodedMessage {
    pub bytes: [u8; MESSAGE_LEN],
    pub checksum: u16,
    pub checksum_valid: bool,
}

impl EncodedMessage {
    /// Payload as network-order words: byte `8k` is the most significant
    /// byte of word `k`.
    pub fn words(&self) -> [u64; MESSAGE_WORDS] {
        std::array::from_fn(|k| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&self.bytes[8 * k..8 * k + 8]);
            u64::from_be_bytes(word)
        })
    }
}

/// Splices orders into the message template.
#[derive(Clone, Copy, Debug)]
pub struct MessageEncoder {
    template_sum: u32,
}

impl MessageEncoder {
    pub fn new() -> Self {
        Self {
            template_sum: field_sum(0, ORDER_TEMPLATE, 0),
        }
    }

    /// Precomputed contribution of the static template bytes.
    #[inline]
    pub fn template_sum(&self) -> u16 {
        self.template_sum as u16
    }

    /// Encode one order. The checksum is only computed when requested.
    pub fn encode(&self, order: &OrderRequest, checksum: bool) -> EncodedMessage {
        let order_id = u32_to_ascii(order.order_id);
        let sending_time = order.timestamp.to_be_bytes();
        let quantity = u32_to_ascii(order.quantity);
        let price = u32_to_ascii(order.price);

        let mut bytes = *ORDER_TEMPLATE;
        bytes[SEQ_NUM_OFFSET..SEQ_NUM_OFFSET + ASCII_DIGITS].copy_from_slice(&order_id);
        bytes[SENDING_TIME_OFFSET..SENDING_TIME_OFFSET + 8].copy_from_slice(&sending_time);
        bytes[CL_ORD_ID_OFFSET..CL_ORD_ID_OFFSET + ASCII_DIGITS].copy_from_slice(&order_id);
        bytes[QUANTITY_OFFSET..QUANTITY_OFFSET + ASCII_DIGITS].copy_from_slice(&quantity);
        bytes[PRICE_OFFSET..PRICE_OFFSET + ASCII_DIGITS].copy_from_slice(&price);

        let (checksum, checksum_valid) = if checksum {
            let mut sum = self.template_sum;
            sum = field_sum(sum, &order_id, SEQ_NUM_OFFSET);
            sum = field_sum(sum, &sending_time, SENDING_TIME_OFFSET);
            sum = field_sum(sum, &order_id, CL_ORD_ID_OFFSET);
            sum = field_sum(sum, &quantity, QUANTITY_OFFSET);
            sum = field_sum(sum, &price, PRICE_OFFSET);
            (sum as u16, true)
        } else {
            (0, false)
        };

        EncodedMessage {
            bytes,
            checksum,
            checksum_valid,
        }
    }
}

impl Default for MessageEncoder {
    fn default() -> Self {
        Self::new()
    }
}
