//! Control registers - operator-written configuration read by the stages.
//!
//! Every stage reads its control word once at the start of an activation.
//! The operator (or a test) writes words at any time; no ordering beyond
//! single-word atomicity is required.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::PipelineConfig;
use crate::types::{StrategyId, NUM_SYMBOLS};

/// Control word bit assignments.
pub mod bits {
    /// Stage activation is a no-op
    pub const HALT: u32 = 1 << 0;
    /// Clear stage state
    pub const RESET_DATA: u32 = 1 << 1;
    /// Zero stage counters
    pub const RESET_COUNT: u32 = 1 << 2;

    /// Book: copy every snapshot to the data mover
    pub const BOOK_FORWARD: u32 = 1 << 3;

    /// Order entry: keep an outbound session open
    pub const CONNECT: u32 = 1 << 3;
    /// Order entry: generate message checksums
    pub const CHECKSUM: u32 = 1 << 4;

    /// Data mover: stamp and measure round trips
    pub const RTT_ENABLE: u32 = 1 << 1;
    /// Data mover: zero the cycle counter and latency statistics
    pub const RTT_RESET: u32 = 1 << 2;

    /// Strategy: apply the global strategy to every symbol
    pub const GLOBAL_OVERRIDE: u32 = 1 << 31;
    /// Strategy: bits holding the global strategy id
    pub const GLOBAL_STRATEGY_MASK: u32 = 0xFF;

    /// Capture register: stop updating the capture shadow
    pub const CAPTURE_FREEZE: u32 = 1 << 31;
}

/// A control word as read by one activation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlWord(pub u32);

impl ControlWord {
    #[inline]
    pub const fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    #[inline]
    pub const fn halted(self) -> bool {
        self.has(bits::HALT)
    }

    #[inline]
    pub const fn reset_data(self) -> bool {
        self.has(bits::RESET_DATA)
    }

    #[inline]
    pub const fn reset_count(self) -> bool {
        self.has(bits::RESET_COUNT)
    }
}

/// Control and capture words common to every stage.
#[derive(Debug, Default)]
pub struct StageControl {
    control: AtomicU32,
    capture: AtomicU32,
}

impl StageControl {
    #[inline]
    pub fn word(&self) -> ControlWord {
        ControlWord(self.control.load(Ordering::Relaxed))
    }

    pub fn write(&self, value: u32) {
        self.control.store(value, Ordering::Relaxed);
    }

    pub fn set(&self, bit: u32) {
        self.control.fetch_or(bit, Ordering::Relaxed);
    }

    pub fn clear(&self, bit: u32) {
        self.control.fetch_and(!bit, Ordering::Relaxed);
    }

    #[inline]
    pub fn capture_frozen(&self) -> bool {
        self.capture.load(Ordering::Relaxed) & bits::CAPTURE_FREEZE != 0
    }

    pub fn freeze_capture(&self, frozen: bool) {
        if frozen {
            self.capture.fetch_or(bits::CAPTURE_FREEZE, Ordering::Relaxed);
        } else {
            self.capture.fetch_and(!bits::CAPTURE_FREEZE, Ordering::Relaxed);
        }
    }
}

/// Strategy engine registers.
#[derive(Debug)]
pub struct StrategyControl {
    pub stage: StageControl,
    /// Bit 31 enables the override, bits 7:0 select the strategy
    global: AtomicU32,
    select: Box<[AtomicU32]>,
}

impl StrategyControl {
    pub fn new() -> Self {
        Self {
            stage: StageControl::default(),
            global: AtomicU32::new(0),
            select: (0..NUM_SYMBOLS).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Strategy in force for `symbol`, honoring the global override.
    #[inline]
    pub fn strategy_for(&self, symbol: u8) -> StrategyId {
        let global = self.global.load(Ordering::Relaxed);
        let code = if global & bits::GLOBAL_OVERRIDE != 0 {
            global & bits::GLOBAL_STRATEGY_MASK
        } else {
            self.select[symbol as usize].load(Ordering::Relaxed) & bits::GLOBAL_STRATEGY_MASK
        };
        StrategyId::from(code as u8)
    }

    pub fn select(&self, symbol: u8, strategy: StrategyId) {
        self.select[symbol as usize].store(strategy.code() as u32, Ordering::Relaxed);
    }

    /// Force one strategy for every symbol, or remove the override.
    pub fn set_global(&self, strategy: Option<StrategyId>) {
        let word = match strategy {
            Some(s) => bits::GLOBAL_OVERRIDE | s.code() as u32,
            None => 0,
        };
        self.global.store(word, Ordering::Relaxed);
    }
}

impl Default for StrategyControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Order entry registers.
#[derive(Debug, Default)]
pub struct OrderEntryControl {
    pub stage: StageControl,
    dest_address: AtomicU32,
    dest_port: AtomicU32,
    listen_port: AtomicU32,
}

impl OrderEntryControl {
    #[inline]
    pub fn dest_address(&self) -> u32 {
        self.dest_address.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dest_port(&self) -> u16 {
        self.dest_port.load(Ordering::Relaxed) as u16
    }

    #[inline]
    pub fn listen_port(&self) -> u16 {
        self.listen_port.load(Ordering::Relaxed) as u16
    }

    pub fn set_destination(&self, address: u32, port: u16) {
        self.dest_address.store(address, Ordering::Relaxed);
        self.dest_port.store(port as u32, Ordering::Relaxed);
    }

    pub fn set_listen_port(&self, port: u16) {
        self.listen_port.store(port as u32, Ordering::Relaxed);
    }

    /// Request (or withdraw) the outbound session.
    pub fn connect(&self, on: bool) {
        if on {
            self.stage.set(bits::CONNECT);
        } else {
            self.stage.clear(bits::CONNECT);
        }
    }
}

/// Data mover registers.
#[derive(Debug, Default)]
pub struct DataMoverControl {
    pub stage: StageControl,
    throttle_rate: AtomicU32,
}

impl DataMoverControl {
    #[inline]
    pub fn throttle_rate(&self) -> u32 {
        self.throttle_rate.load(Ordering::Relaxed)
    }

    pub fn set_throttle_rate(&self, rate: u32) {
        self.throttle_rate.store(rate, Ordering::Relaxed);
    }
}

/// All register blocks of one pipeline.
#[derive(Debug, Default)]
pub struct ControlRegisters {
    pub feed: StageControl,
    pub book: StageControl,
    pub strategy: StrategyControl,
    pub order_entry: OrderEntryControl,
    pub data_mover: DataMoverControl,
}

impl ControlRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers programmed with the configured start-up values.
    ///
    /// The configuration is expected to have passed validation.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let registers = Self::new();

        let default = StrategyId::from(config.strategy.default);
        for symbol in 0..NUM_SYMBOLS {
            registers.strategy.select(symbol as u8, default);
        }
        for rule in &config.strategy.symbols {
            registers
                .strategy
                .select(rule.symbol as u8, StrategyId::from(rule.strategy));
        }
        registers
            .strategy
            .set_global(config.strategy.global_override.map(StrategyId::from));

        let session = &config.session;
        registers
            .order_entry
            .set_destination(session.dest_ipv4().map(u32::from).unwrap_or(0), session.dest_port);
        registers.order_entry.set_listen_port(session.listen_port);
        if session.checksum {
            registers.order_entry.stage.set(bits::CHECKSUM);
        }
        registers.order_entry.connect(session.connect);

        if config.data_mover.forward_snapshots {
            registers.book.set(bits::BOOK_FORWARD);
        }
        if config.data_mover.rtt_enable {
            registers.data_mover.stage.set(bits::RTT_ENABLE);
        }
        registers
            .data_mover
            .set_throttle_rate(config.data_mover.throttle_rate);

        registers
    }
}
