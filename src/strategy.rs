//! Strategy Engine - top-of-book change detection and order generation.
//!
//! Keeps the last seen best bid/ask per symbol. When the best bid moves,
//! the strategy selected for the symbol may emit a bid-side order priced
//! off the new best bid. Order ids come from one counter shared by every
//! symbol.

use std::sync::Arc;

use crate::codec::{pack_order, OrderRecord};
use crate::control::ControlRegisters;
use crate::types::{BookSnapshot, OrderOpCode, OrderRequest, Side, StrategyId, NUM_SYMBOLS};

/// Quantity of every generated order.
pub const ORDER_QUANTITY: u32 = 800;

/// Peg offset above the best bid, in fixed-point units.
pub const PEG_OFFSET: u32 = 100;

/// Limit offset above the best bid, in fixed-point units.
pub const LIMIT_OFFSET: u32 = 50;

/// Last observed top of book for one symbol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CacheEntry {
    pub bid_price: u32,
    pub ask_price: u32,
    /// Set once the symbol has been seen
    pub valid: bool,
}

/// Strategy engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StrategyStats {
    /// Snapshots consumed
    pub snapshots: u32,
    /// Orders emitted
    pub orders: u32,
    pub strategy_none: u32,
    pub strategy_peg: u32,
    pub strategy_limit: u32,
    pub strategy_unknown: u32,
}

/// The strategy stage.
pub struct PricingEngine {
    cache: Box<[CacheEntry]>,
    /// Last order id handed out
    order_id: u32,
    stats: StrategyStats,
    capture: OrderRecord,
    control: Arc<ControlRegisters>,
}

impl PricingEngine {
    pub fn new(control: Arc<ControlRegisters>) -> Self {
        Self {
            cache: vec![CacheEntry::default(); NUM_SYMBOLS].into_boxed_slice(),
            order_id: 0,
            stats: StrategyStats::default(),
            capture: OrderRecord::zeroed(),
            control,
        }
    }

    /// One activation. A snapshot is consumed only when the output has room.
    pub fn poll(
        &mut self,
        input: &mut rtrb::Consumer<BookSnapshot>,
        output: &mut rtrb::Producer<OrderRequest>,
    ) -> bool {
        let word = self.control.strategy.stage.word();
        if word.reset_count() {
            self.stats = StrategyStats::default();
        }
        if word.reset_data() {
            self.clear();
        }
        if word.halted() || output.is_full() {
            return false;
        }
        let Ok(snapshot) = input.pop() else {
            return false;
        };
        if let Some(order) = self.evaluate(&snapshot) {
            let _ = output.push(order);
        }
        true
    }

    /// Run the symbol's strategy against a snapshot.
    pub fn evaluate(&mut self, snapshot: &BookSnapshot) -> Option<OrderRequest> {
        self.stats.snapshots = self.stats.snapshots.wrapping_add(1);

        let symbol = snapshot.symbol_index;
        let strategy = self.control.strategy.strategy_for(symbol);
        let cached = self.cache[symbol as usize];
        let best_bid = snapshot.best_bid();
        let moved = cached.bid_price != best_bid;

        let offset = match strategy {
            StrategyId::Peg => {
                self.stats.strategy_peg = self.stats.strategy_peg.wrapping_add(1);
                moved.then_some(PEG_OFFSET)
            }
            StrategyId::Limit => {
                self.stats.strategy_limit = self.stats.strategy_limit.wrapping_add(1);
                moved.then_some(LIMIT_OFFSET)
            }
            StrategyId::None => {
                self.stats.strategy_none = self.stats.strategy_none.wrapping_add(1);
                None
            }
            StrategyId::Unknown(_) => {
                self.stats.strategy_unknown = self.stats.strategy_unknown.wrapping_add(1);
                None
            }
        };

        self.cache[symbol as usize] = CacheEntry {
            bid_price: best_bid,
            ask_price: snapshot.best_ask(),
            valid: true,
        };

        let offset = offset?;
        self.order_id = self.order_id.wrapping_add(1);
        let order = OrderRequest {
            timestamp: snapshot.timestamp,
            op_code: OrderOpCode::Add,
            symbol_index: symbol,
            order_id: self.order_id,
            quantity: ORDER_QUANTITY,
            price: best_bid.wrapping_add(offset),
            direction: Side::Bid,
        };
        self.stats.orders = self.stats.orders.wrapping_add(1);
        if !self.control.strategy.stage.capture_frozen() {
            self.capture = pack_order(&order);
        }
        Some(order)
    }

    #[inline]
    pub fn cache(&self, symbol: u8) -> CacheEntry {
        self.cache[symbol as usize]
    }

    /// Last order id handed out (0 before the first order).
    #[inline]
    pub fn last_order_id(&self) -> u32 {
        self.order_id
    }

    #[inline]
    pub fn stats(&self) -> StrategyStats {
        self.stats
    }

    #[inline]
    pub fn capture(&self) -> OrderRecord {
        self.capture
    }

    /// Forget every cached top of book. Order ids keep counting.
    pub fn clear(&mut self) {
        for entry in self.cache.iter_mut() {
            *entry = CacheEntry::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::unpack_order;

    fn engine(strategy: StrategyId) -> PricingEngine {
        let control = Arc::new(ControlRegisters::new());
        control.strategy.set_global(Some(strategy));
        PricingEngine::new(control)
    }

    fn snapshot(symbol: u8, bid: u32, ask: u32) -> BookSnapshot {
        let mut snap = BookSnapshot {
            timestamp: 55,
            symbol_index: symbol,
            ..Default::default()
        };
        snap.bid_price[0] = bid;
        snap.ask_price[0] = ask;
        snap
    }

    #[test]
    fn test_peg_emits_on_bid_change() {
        let mut engine = engine(StrategyId::Peg);
        let order = engine.evaluate(&snapshot(0, 100_000, 100_500)).unwrap();
        assert_eq!(order.price, 100_100);
        assert_eq!(order.quantity, 800);
        assert_eq!(order.direction, Side::Bid);
        assert_eq!(order.op_code, OrderOpCode::Add);
        assert_eq!(order.order_id, 1);
        assert_eq!(order.timestamp, 55);
        assert_eq!(unpack_order(&engine.capture()), Ok(order));
    }

    #[test]
    fn test_limit_offset() {
        let mut engine = engine(StrategyId::Limit);
        let order = engine.evaluate(&snapshot(0, 100_000, 0)).unwrap();
        assert_eq!(order.price, 100_050);
    }

    #[test]
    fn test_repeated_bid_emits_once() {
        let mut engine = engine(StrategyId::Peg);
        assert!(engine.evaluate(&snapshot(1, 100, 200)).is_some());
        for _ in 0..5 {
            assert!(engine.evaluate(&snapshot(1, 100, 300)).is_none());
            assert_eq!(engine.cache(1).bid_price, 100);
        }
        // Ask updates are tracked but do not trigger
        assert_eq!(engine.cache(1).ask_price, 300);
        assert_eq!(engine.stats().orders, 1);
        assert_eq!(engine.stats().strategy_peg, 6);
    }

    #[test]
    fn test_order_ids_shared_across_symbols() {
        let mut engine = engine(StrategyId::Peg);
        let a = engine.evaluate(&snapshot(1, 10, 0)).unwrap();
        let b = engine.evaluate(&snapshot(2, 10, 0)).unwrap();
        let c = engine.evaluate(&snapshot(1, 20, 0)).unwrap();
        assert_eq!([a.order_id, b.order_id, c.order_id], [1, 2, 3]);
    }

    #[test]
    fn test_none_and_unknown_update_cache_only() {
        let mut engine = engine(StrategyId::None);
        assert!(engine.evaluate(&snapshot(0, 500, 600)).is_none());
        assert_eq!(
            engine.cache(0),
            CacheEntry {
                bid_price: 500,
                ask_price: 600,
                valid: true
            }
        );

        engine.control.strategy.set_global(Some(StrategyId::Unknown(7)));
        assert!(engine.evaluate(&snapshot(0, 900, 600)).is_none());
        assert_eq!(engine.cache(0).bid_price, 900);
        assert_eq!(engine.stats().strategy_unknown, 1);

        // Switching to peg does not fire on the already cached bid
        engine.control.strategy.set_global(Some(StrategyId::Peg));
        assert!(engine.evaluate(&snapshot(0, 900, 600)).is_none());
        assert_eq!(engine.last_order_id(), 0);
    }

    #[test]
    fn test_empty_book_does_not_fire() {
        let mut engine = engine(StrategyId::Peg);
        assert!(engine.evaluate(&snapshot(0, 0, 100)).is_none());
    }

    #[test]
    fn test_per_symbol_selection() {
        let control = Arc::new(ControlRegisters::new());
        control.strategy.select(4, StrategyId::Limit);
        let mut engine = PricingEngine::new(control);
        assert!(engine.evaluate(&snapshot(3, 100, 0)).is_none());
        assert_eq!(engine.evaluate(&snapshot(4, 100, 0)).map(|o| o.price), Some(150));
    }
}
