//! Data Mover - the two host-facing rings between the book and order entry.
//!
//! ```text
//! book snapshots --> [snapshot ring] --> host
//! host orders    --> [order ring]    --> throttle --> order entry
//! ```
//!
//! The core writes `snapshot_tail` and `order_head`; the host writes
//! `snapshot_head` and `order_tail`. Each side publishes its index with
//! release ordering after touching the slot and reads the other side's
//! index with acquire ordering.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hdrhistogram::Histogram;
use rtrb::{Consumer, Producer};

use crate::codec::{pack_order, pack_snapshot, unpack_order, unpack_snapshot};
use crate::control::{bits, ControlRegisters};
use crate::error::PipelineError;
use crate::ring::{RingStore, RING_CAPACITY};
use crate::types::{BookSnapshot, OrderRequest};

/// Ring index registers.
#[derive(Debug, Default)]
pub struct RingIndices {
    pub snapshot_head: AtomicU32,
    pub snapshot_tail: AtomicU32,
    pub order_head: AtomicU32,
    pub order_tail: AtomicU32,
}

/// Point-in-time copy of the index registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingPositions {
    pub snapshot_head: u32,
    pub snapshot_tail: u32,
    pub order_head: u32,
    pub order_tail: u32,
}

impl RingIndices {
    pub fn positions(&self) -> RingPositions {
        RingPositions {
            snapshot_head: self.snapshot_head.load(Ordering::Acquire),
            snapshot_tail: self.snapshot_tail.load(Ordering::Acquire),
            order_head: self.order_head.load(Ordering::Acquire),
            order_tail: self.order_tail.load(Ordering::Acquire),
        }
    }
}

struct Rings {
    snapshots: RingStore<16>,
    orders: RingStore<4>,
    indices: RingIndices,
}

/// Data mover counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataMoverStats {
    /// Snapshots written to the snapshot ring
    pub snapshots: u32,
    /// Snapshot writes made while the host had not drained the ring
    pub overruns: u32,
    /// Order records taken from the order ring
    pub rx_orders: u32,
    /// Orders forwarded to order entry
    pub dispatched: u32,
    /// Records consumed while halted
    pub discarded: u32,
    /// Records that did not decode
    pub invalid: u32,
    /// Activations where records waited on the throttle
    pub backpressure: u32,
}

/// Round-trip latency statistics in cycle-counter ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttStats {
    pub min: u32,
    pub max: u32,
    pub sum: u64,
    pub count: u32,
}

impl Default for RttStats {
    fn default() -> Self {
        Self {
            min: u32::MAX,
            max: 0,
            sum: 0,
            count: 0,
        }
    }
}

impl RttStats {
    #[inline]
    fn record(&mut self, latency: u32) {
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        self.sum = self.sum.wrapping_add(latency as u64);
        self.count = self.count.wrapping_add(1);
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// The core side of the rings.
pub struct DataMover {
    rings: Arc<Rings>,
    throttle: u32,
    cycles: u32,
    stats: DataMoverStats,
    rtt: RttStats,
    histogram: Histogram<u64>,
    control: Arc<ControlRegisters>,
}

/// The host side of the rings.
pub struct HostPort {
    rings: Arc<Rings>,
}

impl DataMover {
    /// Create both ends with the standard ring capacity.
    pub fn new(control: Arc<ControlRegisters>) -> Result<(Self, HostPort), PipelineError> {
        Self::with_capacity(control, RING_CAPACITY)
    }

    /// Create both ends with `capacity` slots per ring (a power of two).
    pub fn with_capacity(
        control: Arc<ControlRegisters>,
        capacity: usize,
    ) -> Result<(Self, HostPort), PipelineError> {
        let rings = Arc::new(Rings {
            snapshots: RingStore::new(capacity),
            orders: RingStore::new(capacity),
            indices: RingIndices::default(),
        });
        let mover = Self {
            rings: Arc::clone(&rings),
            throttle: 0,
            cycles: 0,
            stats: DataMoverStats::default(),
            rtt: RttStats::default(),
            histogram: Histogram::new_with_bounds(1, u32::MAX as u64, 3)?,
            control,
        };
        Ok((mover, HostPort { rings }))
    }

    /// One activation: push at most one snapshot, pull at most one order.
    pub fn poll(
        &mut self,
        snapshots: &mut Consumer<BookSnapshot>,
        output: &mut Producer<OrderRequest>,
    ) -> bool {
        let word = self.control.data_mover.stage.word();
        if word.reset_count() {
            self.stats = DataMoverStats::default();
        }
        let rtt = word.has(bits::RTT_ENABLE);
        if word.has(bits::RTT_RESET) {
            self.cycles = 0;
            self.rtt = RttStats::default();
            self.histogram.reset();
        } else if rtt {
            self.cycles = self.cycles.wrapping_add(1);
        }

        let pushed = self.push_snapshot(snapshots, rtt);
        let pulled = self.pull_order(output, word.halted(), rtt);
        pushed || pulled
    }

    fn push_snapshot(&mut self, snapshots: &mut Consumer<BookSnapshot>, rtt: bool) -> bool {
        let Ok(mut snapshot) = snapshots.pop() else {
            return false;
        };
        if rtt {
            snapshot.timestamp = self.cycles as u64;
        }
        let indices = &self.rings.indices;
        let tail = indices.snapshot_tail.load(Ordering::Relaxed);
        let head = indices.snapshot_head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= self.rings.snapshots.capacity() {
            self.stats.overruns = self.stats.overruns.wrapping_add(1);
        }
        self.rings.snapshots.store(tail, &pack_snapshot(&snapshot));
        indices.snapshot_tail.store(tail.wrapping_add(1), Ordering::Release);
        self.stats.snapshots = self.stats.snapshots.wrapping_add(1);
        true
    }

    fn pull_order(&mut self, output: &mut Producer<OrderRequest>, halted: bool, rtt: bool) -> bool {
        let indices = &self.rings.indices;
        let head = indices.order_head.load(Ordering::Relaxed);
        let queued = head != indices.order_tail.load(Ordering::Acquire);

        if self.throttle != 0 {
            self.throttle -= 1;
            if queued {
                self.stats.backpressure = self.stats.backpressure.wrapping_add(1);
            }
            return queued;
        }
        if !queued || (!halted && output.is_full()) {
            return false;
        }

        let record = self.rings.orders.load(head);
        indices.order_head.store(head.wrapping_add(1), Ordering::Release);
        self.stats.rx_orders = self.stats.rx_orders.wrapping_add(1);

        if halted {
            self.stats.discarded = self.stats.discarded.wrapping_add(1);
            return true;
        }
        match unpack_order(&record) {
            Ok(order) => {
                if rtt {
                    let latency = self.cycles.wrapping_sub(order.timestamp as u32);
                    self.rtt.record(latency);
                    self.histogram.saturating_record(latency.max(1) as u64);
                }
                let _ = output.push(order);
                self.stats.dispatched = self.stats.dispatched.wrapping_add(1);
                self.throttle = self.control.data_mover.throttle_rate();
            }
            Err(err) => {
                self.stats.invalid = self.stats.invalid.wrapping_add(1);
                tracing::debug!(%err, index = head, "dropping undecodable order record");
            }
        }
        true
    }

    #[inline]
    pub fn stats(&self) -> DataMoverStats {
        self.stats
    }

    #[inline]
    pub fn rtt(&self) -> RttStats {
        self.rtt
    }

    /// Round-trip samples recorded since the last RTT reset.
    #[inline]
    pub fn rtt_histogram(&self) -> &Histogram<u64> {
        &self.histogram
    }

    #[inline]
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Remaining throttle countdown.
    #[inline]
    pub fn throttle(&self) -> u32 {
        self.throttle
    }

    pub fn positions(&self) -> RingPositions {
        self.rings.indices.positions()
    }

    pub fn warm_up(&self) {
        self.rings.snapshots.warm_up();
        self.rings.orders.warm_up();
    }
}

impl HostPort {
    /// Take the oldest unread snapshot.
    pub fn pop_snapshot(&mut self) -> Option<BookSnapshot> {
        let indices = &self.rings.indices;
        let head = indices.snapshot_head.load(Ordering::Relaxed);
        if head == indices.snapshot_tail.load(Ordering::Acquire) {
            return None;
        }
        let record = self.rings.snapshots.load(head);
        indices.snapshot_head.store(head.wrapping_add(1), Ordering::Release);
        Some(unpack_snapshot(&record))
    }

    /// Append an order for the core. Returns false when the ring is full.
    #[must_use]
    pub fn push_order(&mut self, order: &OrderRequest) -> bool {
        let indices = &self.rings.indices;
        let tail = indices.order_tail.load(Ordering::Relaxed);
        let head = indices.order_head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= self.rings.orders.capacity() {
            return false;
        }
        self.rings.orders.store(tail, &pack_order(order));
        indices.order_tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Snapshots written by the core and not yet read.
    pub fn pending_snapshots(&self) -> usize {
        let p = self.rings.indices.positions();
        p.snapshot_tail.wrapping_sub(p.snapshot_head) as usize
    }

    /// Orders written by the host and not yet taken by the core.
    pub fn pending_orders(&self) -> usize {
        let p = self.rings.indices.positions();
        p.order_tail.wrapping_sub(p.order_head) as usize
    }

    pub fn positions(&self) -> RingPositions {
        self.rings.indices.positions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderOpCode, Side};
    use rtrb::RingBuffer;

    struct Rig {
        mover: DataMover,
        host: HostPort,
        control: Arc<ControlRegisters>,
        snapshots: Producer<BookSnapshot>,
        snapshots_rx: Consumer<BookSnapshot>,
        orders_tx: Producer<OrderRequest>,
        orders: Consumer<OrderRequest>,
    }

    impl Rig {
        fn new(capacity: usize) -> Self {
            let control = Arc::new(ControlRegisters::new());
            let (mover, host) = DataMover::with_capacity(Arc::clone(&control), capacity).unwrap();
            let (snapshots, snapshots_rx) = RingBuffer::new(64);
            let (orders_tx, orders) = RingBuffer::new(64);
            Self {
                mover,
                host,
                control,
                snapshots,
                snapshots_rx,
                orders_tx,
                orders,
            }
        }

        fn poll(&mut self) -> bool {
            self.mover.poll(&mut self.snapshots_rx, &mut self.orders_tx)
        }
    }

    fn order(order_id: u32, timestamp: u64) -> OrderRequest {
        OrderRequest {
            timestamp,
            op_code: OrderOpCode::Add,
            symbol_index: 2,
            order_id,
            quantity: 800,
            price: 100_100,
            direction: Side::Bid,
        }
    }

    fn snapshot(symbol: u8, bid: u32) -> BookSnapshot {
        let mut snap = BookSnapshot {
            timestamp: 1234,
            symbol_index: symbol,
            ..Default::default()
        };
        snap.bid_price[0] = bid;
        snap
    }

    #[test]
    fn test_snapshots_reach_host_in_order() {
        let mut rig = Rig::new(16);
        for k in 0..3 {
            rig.snapshots.push(snapshot(k, 100 + k as u32)).unwrap();
        }
        for _ in 0..3 {
            assert!(rig.poll());
        }
        assert!(!rig.poll());
        assert_eq!(rig.host.pending_snapshots(), 3);
        for k in 0..3 {
            assert_eq!(rig.host.pop_snapshot(), Some(snapshot(k, 100 + k as u32)));
        }
        assert_eq!(rig.host.pop_snapshot(), None);
        assert_eq!(rig.mover.stats().snapshots, 3);
    }

    #[test]
    fn test_orders_reach_order_entry() {
        let mut rig = Rig::new(16);
        assert!(rig.host.push_order(&order(1, 9)));
        assert_eq!(rig.host.pending_orders(), 1);
        assert!(rig.poll());
        assert_eq!(rig.orders.pop(), Ok(order(1, 9)));
        assert_eq!(rig.host.pending_orders(), 0);
        assert_eq!(rig.mover.stats().dispatched, 1);
    }

    #[test]
    fn test_throttle_schedule() {
        let mut rig = Rig::new(16);
        rig.control.data_mover.set_throttle_rate(3);
        for k in 0..4 {
            assert!(rig.host.push_order(&order(k, 0)));
        }

        let mut dispatched_on = Vec::new();
        let mut backpressure_on = Vec::new();
        for activation in 1..=9 {
            let before = rig.mover.stats();
            rig.poll();
            let after = rig.mover.stats();
            if after.dispatched > before.dispatched {
                dispatched_on.push(activation);
            }
            if after.backpressure > before.backpressure {
                backpressure_on.push(activation);
            }
        }
        assert_eq!(dispatched_on, vec![1, 5, 9]);
        assert_eq!(backpressure_on, vec![2, 3, 4, 6, 7, 8]);
        assert_eq!(rig.host.pending_orders(), 1);
    }

    #[test]
    fn test_zero_rate_dispatches_every_activation() {
        let mut rig = Rig::new(16);
        for k in 0..3 {
            assert!(rig.host.push_order(&order(k, 0)));
        }
        for _ in 0..3 {
            rig.poll();
        }
        assert_eq!(rig.mover.stats().dispatched, 3);
        assert_eq!(rig.mover.stats().backpressure, 0);
    }

    #[test]
    fn test_full_output_holds_record() {
        let control = Arc::new(ControlRegisters::new());
        let (mut mover, mut host) = DataMover::with_capacity(control, 16).unwrap();
        let (_snapshots, mut snapshots_rx) = RingBuffer::<BookSnapshot>::new(4);
        let (mut output, mut output_rx) = RingBuffer::new(1);
        assert!(host.push_order(&order(1, 0)));
        assert!(host.push_order(&order(2, 0)));
        mover.poll(&mut snapshots_rx, &mut output);
        assert!(!mover.poll(&mut snapshots_rx, &mut output));
        assert_eq!(host.pending_orders(), 1);
        output_rx.pop().unwrap();
        assert!(mover.poll(&mut snapshots_rx, &mut output));
        assert_eq!(output_rx.pop().map(|o| o.order_id), Ok(2));
    }

    #[test]
    fn test_halt_discards_without_throttle() {
        let mut rig = Rig::new(16);
        rig.control.data_mover.set_throttle_rate(5);
        rig.control.data_mover.stage.set(bits::HALT);
        for k in 0..2 {
            assert!(rig.host.push_order(&order(k, 0)));
        }
        rig.poll();
        rig.poll();
        assert!(rig.orders.is_empty());
        let stats = rig.mover.stats();
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.rx_orders, 2);
        assert_eq!(rig.mover.throttle(), 0);
    }

    #[test]
    fn test_invalid_record_counted() {
        let mut rig = Rig::new(16);
        let mut bad = order(1, 0);
        bad.direction = Side::Ask;
        assert!(rig.host.push_order(&bad));
        // Corrupt the direction code in place
        let mut record = pack_order(&bad);
        record.set(0, 8, 9);
        rig.host.rings.orders.store(0, &record);
        rig.poll();
        assert_eq!(rig.mover.stats().invalid, 1);
        assert!(rig.orders.is_empty());
        assert_eq!(rig.mover.throttle(), 0);
    }

    #[test]
    fn test_host_push_refused_when_full() {
        let mut rig = Rig::new(4);
        for k in 0..4 {
            assert!(rig.host.push_order(&order(k, 0)));
        }
        assert!(!rig.host.push_order(&order(9, 0)));
        rig.poll();
        assert!(rig.host.push_order(&order(9, 0)));
    }

    #[test]
    fn test_snapshot_overrun_counted() {
        let mut rig = Rig::new(4);
        for k in 0..6 {
            rig.snapshots.push(snapshot(k, 1)).unwrap();
        }
        for _ in 0..6 {
            rig.poll();
        }
        assert_eq!(rig.mover.stats().overruns, 2);
    }

    #[test]
    fn test_round_trip_latency() {
        let mut rig = Rig::new(16);
        rig.control.data_mover.stage.set(bits::RTT_ENABLE);
        rig.snapshots.push(snapshot(0, 100)).unwrap();
        rig.poll();
        let stamped = rig.host.pop_snapshot().unwrap();
        assert_eq!(stamped.timestamp, 1);

        for _ in 0..4 {
            rig.poll();
        }
        assert!(rig.host.push_order(&order(1, stamped.timestamp)));
        rig.poll();
        assert_eq!(rig.mover.cycles(), 6);
        let rtt = rig.mover.rtt();
        assert_eq!((rtt.min, rtt.max, rtt.sum, rtt.count), (5, 5, 5, 1));
        assert_eq!(rtt.mean(), Some(5.0));
        assert_eq!(rig.mover.rtt_histogram().len(), 1);

        rig.control.data_mover.stage.set(bits::RTT_RESET);
        rig.poll();
        assert_eq!(rig.mover.rtt(), RttStats::default());
        assert_eq!(rig.mover.cycles(), 0);

        // Counting resumes once reset is released
        rig.control.data_mover.stage.clear(bits::RTT_RESET);
        rig.poll();
        assert_eq!(rig.mover.cycles(), 1);
    }

    #[test]
    fn test_index_wraparound() {
        let mut rig = Rig::new(4);
        let start = u32::MAX - 1;
        let indices = &rig.host.rings.indices;
        indices.order_head.store(start, Ordering::Relaxed);
        indices.order_tail.store(start, Ordering::Relaxed);
        for k in 0..4 {
            assert!(rig.host.push_order(&order(k, 0)));
        }
        for k in 0..4 {
            rig.poll();
            assert_eq!(rig.orders.pop().map(|o| o.order_id), Ok(k));
        }
        assert_eq!(rig.host.positions().order_head, 2);
        assert_eq!(rig.host.pending_orders(), 0);
    }
}
