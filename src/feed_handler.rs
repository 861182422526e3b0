//! Feed Handler - frames in, normalized book operations out.
//!
//! Chains packet reassembly, message framing, template decoding and
//! symbol resolution. One input frame is consumed per activation; the
//! operations it completes wait in a small pending queue until the
//! downstream queue has room.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::codec::{pack_operation, OperationRecord};
use crate::control::ControlRegisters;
use crate::framing::MessageFramer;
use crate::reassembly::{Frame, PacketReassembler};
use crate::symbol::SymbolTable;
use crate::template::TemplateDecoder;
use crate::types::BookOperation;

/// Feed handler counters. All wrap at 32 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Frames consumed
    pub frames: u32,
    /// Packets completed
    pub packets: u32,
    /// Binary messages framed
    pub binary_messages: u32,
    /// Messages of the supported template
    pub template_messages: u32,
    /// Messages of other templates
    pub unsupported_messages: u32,
    /// Operations forwarded to the book
    pub operations: u32,
    /// Entries whose security id is not configured
    pub unresolved: u32,
    /// Entries with an entry type other than bid or ask
    pub direction_errors: u32,
    /// Messages cut short by their packet or group bounds
    pub truncated: u32,
}

/// The feed decoder stage.
pub struct FeedHandler {
    reassembler: PacketReassembler,
    framer: MessageFramer,
    decoder: TemplateDecoder,
    symbols: SymbolTable,
    pending: VecDeque<BookOperation>,
    frames: u32,
    packets: u32,
    operations: u32,
    unresolved: u32,
    direction_errors: u32,
    capture: OperationRecord,
    control: Arc<ControlRegisters>,
}

impl FeedHandler {
    pub fn new(symbols: SymbolTable, control: Arc<ControlRegisters>) -> Self {
        Self {
            reassembler: PacketReassembler::new(),
            framer: MessageFramer::new(),
            decoder: TemplateDecoder::new(),
            symbols,
            pending: VecDeque::with_capacity(256),
            frames: 0,
            packets: 0,
            operations: 0,
            unresolved: 0,
            direction_errors: 0,
            capture: OperationRecord::zeroed(),
            control,
        }
    }

    /// One activation: forward pending operations, then consume a frame.
    ///
    /// Returns `true` if anything moved.
    pub fn poll(
        &mut self,
        input: &mut rtrb::Consumer<Frame>,
        output: &mut rtrb::Producer<BookOperation>,
    ) -> bool {
        let word = self.control.feed.word();
        if word.reset_count() {
            self.reset_stats();
        }
        if word.reset_data() {
            self.reset();
        }
        if word.halted() {
            return false;
        }

        let mut progressed = self.forward(output);
        if self.pending.is_empty() {
            if let Ok(frame) = input.pop() {
                self.process_frame(frame);
                self.forward(output);
                progressed = true;
            }
        }
        progressed
    }

    fn forward(&mut self, output: &mut rtrb::Producer<BookOperation>) -> bool {
        let mut moved = false;
        while let Some(op) = self.pending.front() {
            if output.push(*op).is_err() {
                break;
            }
            self.pending.pop_front();
            self.operations = self.operations.wrapping_add(1);
            moved = true;
        }
        moved
    }

    /// Decode one frame into the pending queue.
    pub fn process_frame(&mut self, frame: Frame) {
        self.frames = self.frames.wrapping_add(1);
        if frame.last {
            self.packets = self.packets.wrapping_add(1);
        }

        let freeze = self.control.feed.capture_frozen();
        let Self {
            reassembler,
            framer,
            decoder,
            symbols,
            pending,
            unresolved,
            direction_errors,
            capture,
            ..
        } = self;

        for word in reassembler.push(frame) {
            framer.push(word, &mut |framed| {
                decoder.push(framed, &mut |entry| {
                    let Some(symbol_index) = symbols.lookup(entry.security_id as u32) else {
                        *unresolved = unresolved.wrapping_add(1);
                        return;
                    };
                    let Some(op) = entry.to_operation(symbol_index) else {
                        *direction_errors = direction_errors.wrapping_add(1);
                        return;
                    };
                    if !freeze {
                        *capture = pack_operation(&op);
                    }
                    pending.push_back(op);
                })
            });
        }
    }

    /// Decode a whole packet synchronously (tests, replay, benchmarks).
    pub fn decode_packet(&mut self, frames: &[Frame]) -> Vec<BookOperation> {
        for frame in frames {
            self.process_frame(*frame);
        }
        self.operations = self.operations.wrapping_add(self.pending.len() as u32);
        self.pending.drain(..).collect()
    }

    pub fn stats(&self) -> FeedStats {
        let framer = self.framer.stats();
        let decoder = self.decoder.stats();
        FeedStats {
            frames: self.frames,
            packets: self.packets,
            binary_messages: framer.messages,
            template_messages: decoder.supported,
            unsupported_messages: decoder.unsupported,
            operations: self.operations,
            unresolved: self.unresolved,
            direction_errors: self.direction_errors,
            truncated: framer.truncated.wrapping_add(decoder.truncated),
        }
    }

    /// Most recent packed operation, unless capture was frozen.
    #[inline]
    pub fn capture(&self) -> OperationRecord {
        self.capture
    }

    #[inline]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Operations decoded but not yet forwarded.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reset_stats(&mut self) {
        self.frames = 0;
        self.packets = 0;
        self.operations = 0;
        self.unresolved = 0;
        self.direction_errors = 0;
        self.framer.reset_stats();
        self.decoder.reset_stats();
    }

    /// Drop partial packets and undelivered operations.
    pub fn reset(&mut self) {
        self.reassembler.reset();
        self.framer.reset();
        self.decoder.reset();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::unpack_operation;
    use crate::control::bits;
    use crate::template::{BookEntry, PacketBuilder};
    use crate::types::{BookOpCode, Side};

    fn entry(security_id: i32, entry_type: u8, level: u8) -> BookEntry {
        BookEntry {
            transact_time: 0,
            match_event: 0,
            price_mantissa: 10_000_000_000,
            size: 500,
            security_id,
            rpt_seq: 1,
            number_of_orders: 1,
            price_level: level,
            update_action: 0,
            entry_type,
        }
    }

    fn handler() -> FeedHandler {
        let mut ids = vec![0u32; 16];
        ids[9] = 0x1234_5678;
        FeedHandler::new(SymbolTable::new(&ids), Arc::new(ControlRegisters::new()))
    }

    #[test]
    fn test_single_add_resolves() {
        let mut feed = handler();
        let frames = PacketBuilder::new(1, 0)
            .incremental_refresh(77, &[entry(0x1234_5678, b'0', 0)])
            .frames();
        let ops = feed.decode_packet(&frames);

        assert_eq!(ops.len(), 1);
        let op = ops[0];
        assert_eq!(op.op_code, BookOpCode::Add);
        assert_eq!(op.symbol_index, 9);
        assert_eq!(op.price, 100_000);
        assert_eq!(op.quantity, 500);
        assert_eq!(op.direction, Side::Bid);
        assert_eq!(op.level, 0);
        assert_eq!(op.timestamp, 77);

        let stats = feed.stats();
        assert_eq!(stats.frames as usize, frames.len());
        assert_eq!(stats.packets, 1);
        assert_eq!(stats.binary_messages, 1);
        assert_eq!(stats.template_messages, 1);
        assert_eq!(stats.operations, 1);
        assert_eq!(unpack_operation(&feed.capture()), Ok(op));
    }

    #[test]
    fn test_unresolved_and_bad_direction_dropped() {
        let mut feed = handler();
        let frames = PacketBuilder::new(1, 0)
            .incremental_refresh(1, &[entry(0xDEAD, b'0', 0), entry(0x1234_5678, b'7', 0)])
            .frames();
        assert!(feed.decode_packet(&frames).is_empty());
        assert_eq!(feed.stats().unresolved, 1);
        assert_eq!(feed.stats().direction_errors, 1);
        assert_eq!(feed.stats().operations, 0);
    }

    #[test]
    fn test_unsupported_template_counted() {
        let mut feed = handler();
        let frames = PacketBuilder::new(1, 0).raw_message(50, &[0u8; 30]).frames();
        assert!(feed.decode_packet(&frames).is_empty());
        let stats = feed.stats();
        assert_eq!(stats.binary_messages, 1);
        assert_eq!(stats.unsupported_messages, 1);
        assert_eq!(stats.template_messages, 0);
        assert_eq!(stats.frames as usize, frames.len());
    }

    #[test]
    fn test_capture_freeze_holds_value() {
        let mut feed = handler();
        let first = PacketBuilder::new(1, 0)
            .incremental_refresh(1, &[entry(0x1234_5678, b'0', 0)])
            .frames();
        feed.decode_packet(&first);
        let held = feed.capture();

        feed.control.feed.freeze_capture(true);
        let second = PacketBuilder::new(2, 0)
            .incremental_refresh(2, &[entry(0x1234_5678, b'1', 3)])
            .frames();
        assert_eq!(feed.decode_packet(&second).len(), 1);
        assert_eq!(feed.capture(), held);
    }

    #[test]
    fn test_poll_respects_output_capacity() {
        let mut feed = handler();
        let entries: Vec<BookEntry> = (0..4).map(|l| entry(0x1234_5678, b'0', l)).collect();
        let frames = PacketBuilder::new(1, 0).incremental_refresh(1, &entries).frames();

        let (mut frame_tx, mut frame_rx) = rtrb::RingBuffer::new(64);
        let (mut op_tx, mut op_rx) = rtrb::RingBuffer::new(2);
        for frame in &frames {
            frame_tx.push(*frame).unwrap();
        }

        // Consume frames until the packet completes and fills the output
        while feed.pending() == 0 && !frame_rx.is_empty() {
            feed.poll(&mut frame_rx, &mut op_tx);
        }
        assert_eq!(op_rx.slots(), 2);
        assert_eq!(feed.pending(), 2);

        // Blocked: no frame consumed while operations are pending
        let before = feed.stats().frames;
        op_rx.pop().unwrap();
        feed.poll(&mut frame_rx, &mut op_tx);
        assert_eq!(feed.stats().frames, before);
        assert_eq!(feed.pending(), 1);
        assert_eq!(feed.stats().operations, 3);
    }

    #[test]
    fn test_halt_is_noop() {
        let mut feed = handler();
        feed.control.feed.set(bits::HALT);
        let (mut frame_tx, mut frame_rx) = rtrb::RingBuffer::new(4);
        let (mut op_tx, _op_rx) = rtrb::RingBuffer::<BookOperation>::new(4);
        frame_tx.push(Frame { data: 1, last: false }).unwrap();
        assert!(!feed.poll(&mut frame_rx, &mut op_tx));
        assert_eq!(feed.stats().frames, 0);
    }
}
