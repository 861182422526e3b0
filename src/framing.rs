//! Message framing - realigns packet words onto message boundaries.
//!
//! Messages sit back to back inside a packet at arbitrary byte offsets.
//! Each starts with `{message_size, block_length, template_id, schema_id}`
//! followed by a 2-byte schema version, then `message_size - 10` body
//! bytes. The framer keeps a two-word byte window, shifts it down as bytes
//! are consumed, and re-emits each message as a header followed by
//! 8-byte body words, the final one flagged.

use crate::reassembly::Word;

/// Bytes in the leading message header.
pub const MESSAGE_HEADER_BYTES: u8 = 8;

/// Schema version bytes following the header.
pub const VERSION_BYTES: u8 = 2;

/// Header plus version.
pub const MESSAGE_PREAMBLE_BYTES: u16 = (MESSAGE_HEADER_BYTES + VERSION_BYTES) as u16;

/// Leading header of every binary message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Whole message size including this header
    pub message_size: u16,
    /// Root block length of the template
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
}

impl MessageHeader {
    #[inline]
    fn from_le(raw: u64) -> Self {
        Self {
            message_size: raw as u16,
            block_length: (raw >> 16) as u16,
            template_id: (raw >> 32) as u16,
            schema_id: (raw >> 48) as u16,
        }
    }

    /// Body bytes following the preamble.
    #[inline]
    pub fn body_len(&self) -> u16 {
        self.message_size.saturating_sub(MESSAGE_PREAMBLE_BYTES)
    }
}

/// Output of the framer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framed {
    /// Start of a message
    Header(MessageHeader),
    /// Body bytes of the current message, `last` on the final word
    Body(Word),
}

/// Byte queue over a 16-byte window.
#[derive(Clone, Copy, Debug, Default)]
struct ByteWindow {
    acc: u128,
    len: u8,
}

impl ByteWindow {
    #[inline]
    fn push(&mut self, word: Word) {
        let len = word.len.min(8);
        let data = if len == 8 {
            word.data
        } else {
            word.data & ((1u64 << (8 * len)) - 1)
        };
        debug_assert!(self.len + len <= 16);
        self.acc |= (data as u128) << (8 * self.len as u32);
        self.len += len;
    }

    /// Remove `n <= 8` bytes from the front.
    #[inline]
    fn take(&mut self, n: u8) -> u64 {
        debug_assert!(n <= 8 && n <= self.len);
        let value = if n == 8 {
            self.acc as u64
        } else {
            (self.acc as u64) & ((1u64 << (8 * n)) - 1)
        };
        self.acc >>= 8 * n as u32;
        self.len -= n;
        value
    }

    #[inline]
    fn clear(&mut self) {
        self.acc = 0;
        self.len = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Header,
    Version { remaining: u16 },
    Body { remaining: u16 },
    /// Rest of the packet is padding or garbage
    Skip,
}

/// Framing counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Messages whose body was fully framed
    pub messages: u32,
    /// Messages cut short by the end of their packet
    pub truncated: u32,
}

/// Word-to-message framer for one packet stream.
#[derive(Debug)]
pub struct MessageFramer {
    window: ByteWindow,
    state: State,
    stats: FramerStats,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self {
            window: ByteWindow::default(),
            state: State::Header,
            stats: FramerStats::default(),
        }
    }

    /// Feed one reassembled word, emitting every header and body word it
    /// completes. A word flagged `last` closes the packet.
    pub fn push<F: FnMut(Framed)>(&mut self, word: Word, emit: &mut F) {
        self.window.push(word);
        loop {
            match self.state {
                State::Header => {
                    if self.window.len < MESSAGE_HEADER_BYTES {
                        break;
                    }
                    let header = MessageHeader::from_le(self.window.take(MESSAGE_HEADER_BYTES));
                    if header.message_size < MESSAGE_PREAMBLE_BYTES {
                        self.state = State::Skip;
                        continue;
                    }
                    emit(Framed::Header(header));
                    self.state = State::Version {
                        remaining: header.body_len(),
                    };
                }
                State::Version { remaining } => {
                    if self.window.len < VERSION_BYTES {
                        break;
                    }
                    self.window.take(VERSION_BYTES);
                    if remaining == 0 {
                        self.end_message(emit, 0, 0);
                    } else {
                        self.state = State::Body { remaining };
                    }
                }
                State::Body { remaining } => {
                    let n = remaining.min(8) as u8;
                    if self.window.len < n {
                        break;
                    }
                    let data = self.window.take(n);
                    let remaining = remaining - n as u16;
                    if remaining == 0 {
                        self.end_message(emit, data, n);
                    } else {
                        emit(Framed::Body(Word { data, len: n, last: false }));
                        self.state = State::Body { remaining };
                    }
                }
                State::Skip => {
                    self.window.clear();
                    break;
                }
            }
        }

        if word.last {
            match self.state {
                State::Version { .. } | State::Body { .. } => {
                    // Flush what the packet delivered of a cut-short message
                    let n = self.window.len.min(8);
                    let data = self.window.take(n);
                    self.stats.truncated = self.stats.truncated.wrapping_add(1);
                    emit(Framed::Body(Word { data, len: n, last: true }));
                }
                State::Header | State::Skip => {}
            }
            self.window.clear();
            self.state = State::Header;
        }
    }

    fn end_message<F: FnMut(Framed)>(&mut self, emit: &mut F, data: u64, len: u8) {
        emit(Framed::Body(Word { data, len, last: true }));
        self.stats.messages = self.stats.messages.wrapping_add(1);
        self.state = State::Header;
    }

    #[inline]
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FramerStats::default();
    }

    /// Drop any partially framed packet.
    pub fn reset(&mut self) {
        self.window.clear();
        self.state = State::Header;
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}
