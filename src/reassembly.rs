//! Packet reassembly - strips the packet header from a frame stream.
//!
//! Frames carry 8 payload bytes each, little-endian, with the final frame
//! of a packet flagged. A packet starts with a 4-byte sequence number and
//! an 8-byte sending time. The reassembler drops the first frame, holds the
//! second, and from then on merges the upper half of the held frame with
//! the lower half of the incoming one, so message bytes come out contiguous
//! starting at packet byte 12. On the final frame it flushes the upper half
//! of that frame as a 4-byte word marked last.

use arrayvec::ArrayVec;

/// Bytes of packet header preceding the first message.
pub const PACKET_HEADER_BYTES: usize = 12;

/// Payload bytes per frame.
pub const FRAME_BYTES: usize = 8;

/// One fixed-width input frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    /// Payload, byte `k` at bits `8k+7:8k`
    pub data: u64,
    /// Final frame of the packet
    pub last: bool,
}

/// A reassembled word of message bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Word {
    /// Bytes, little-endian, unused high bytes zero
    pub data: u64,
    /// Number of meaningful bytes (0..=8)
    pub len: u8,
    /// Final word of the packet
    pub last: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Expecting the frame with the sequence number
    First,
    /// Expecting the frame that completes the sending time
    Second,
    /// Forwarding merged words
    Forward,
}

/// Frame-to-word reassembler for one packet stream.
#[derive(Debug)]
pub struct PacketReassembler {
    state: State,
    held: u64,
}

impl PacketReassembler {
    pub const fn new() -> Self {
        Self {
            state: State::First,
            held: 0,
        }
    }

    /// Feed one frame and collect the words it completes.
    #[inline]
    pub fn push(&mut self, frame: Frame) -> ArrayVec<Word, 2> {
        let mut out = ArrayVec::new();
        match self.state {
            State::First => {
                if !frame.last {
                    self.state = State::Second;
                }
            }
            State::Second => {
                self.held = frame.data;
                if frame.last {
                    out.push(self.flush());
                } else {
                    self.state = State::Forward;
                }
            }
            State::Forward => {
                out.push(Word {
                    data: (self.held >> 32) | (frame.data << 32),
                    len: 8,
                    last: false,
                });
                self.held = frame.data;
                if frame.last {
                    out.push(self.flush());
                }
            }
        }
        out
    }

    fn flush(&mut self) -> Word {
        let word = Word {
            data: self.held >> 32,
            len: 4,
            last: true,
        };
        self.reset();
        word
    }

    /// Abandon any partial packet.
    pub fn reset(&mut self) {
        self.state = State::First;
        self.held = 0;
    }

    /// True when no packet is in progress.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == State::First
    }
}

impl Default for PacketReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Split raw packet bytes into frames, zero-padding the final frame.
pub fn packet_frames(packet: &[u8]) -> Vec<Frame> {
    let count = packet.len().div_ceil(FRAME_BYTES).max(1);
    let mut frames = Vec::with_capacity(count);
    let mut chunks = packet.chunks(FRAME_BYTES).peekable();
    if chunks.peek().is_none() {
        frames.push(Frame { data: 0, last: true });
        return frames;
    }
    while let Some(chunk) = chunks.next() {
        let mut bytes = [0u8; FRAME_BYTES];
        bytes[..chunk.len()].copy_from_slice(chunk);
        frames.push(Frame {
            data: u64::from_le_bytes(bytes),
            last: chunks.peek().is_none(),
        });
    }
    frames
}
