//! Benchmark harness using Criterion for per-stage latency measurement.
//!
//! Measures:
//! - Ladder insert / delete
//! - Book operation apply
//! - Strategy evaluation
//! - BCD conversion and message encoding
//! - Feed packet decode

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flash_trader::message::{binary_to_bcd, u32_to_ascii};
use flash_trader::symbol::SymbolTable;
use flash_trader::template::{BookEntry, PacketBuilder};
use flash_trader::types::NUM_LEVELS;
use flash_trader::{
    BookOpCode, BookOperation, ControlRegisters, FeedHandler, Ladder, MessageEncoder, OrderBook,
    OrderOpCode, OrderRequest, PriceLevel, PricingEngine, Side, StrategyId,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Generate a random book operation for one of `symbols` symbols
fn random_operation(rng: &mut ChaCha8Rng, symbols: u8) -> BookOperation {
    let op_code = match rng.gen_range(0..10) {
        0..=4 => BookOpCode::Add,
        5..=7 => BookOpCode::Modify,
        _ => BookOpCode::Delete,
    };
    BookOperation {
        timestamp: rng.gen(),
        op_code,
        symbol_index: rng.gen_range(0..symbols),
        order_id: 0,
        order_count: rng.gen_range(1..20),
        quantity: rng.gen_range(1..1000),
        price: rng.gen_range(99_000..101_000),
        direction: if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask },
        level: rng.gen_range(0..NUM_LEVELS as i8),
    }
}

/// Benchmark: Ladder shifts at each level
fn bench_ladder(c: &mut Criterion) {
    let mut group = c.benchmark_group("ladder");

    for level in [0usize, 2, 4].iter() {
        group.bench_with_input(BenchmarkId::new("insert_delete", level), level, |b, &level| {
            let mut ladder = Ladder::new();
            for k in 0..NUM_LEVELS {
                ladder.insert(k, PriceLevel::new(1, 100_000 - k as u32, 100));
            }
            b.iter(|| {
                ladder.insert(black_box(level), PriceLevel::new(3, 99_999, 250));
                ladder.delete(black_box(level));
                black_box(ladder.level(0))
            })
        });
    }

    group.finish();
}

/// Benchmark: Apply one operation and build the snapshot
fn bench_book_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("book_apply");

    for symbols in [1u8, 16, 255].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(symbols), symbols, |b, &symbols| {
            let mut book = OrderBook::new(Arc::new(ControlRegisters::new()));
            book.warm_up();
            let mut rng = ChaCha8Rng::seed_from_u64(0xDEADBEEF);
            let ops: Vec<BookOperation> =
                (0..4096).map(|_| random_operation(&mut rng, symbols)).collect();
            let mut i = 0usize;

            b.iter(|| {
                i = (i + 1) & 4095;
                black_box(book.apply(&ops[i]))
            })
        });
    }

    group.finish();
}

/// Benchmark: Strategy evaluation with a moving best bid
fn bench_strategy(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategy");

    for strategy in [StrategyId::None, StrategyId::Peg, StrategyId::Limit].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", strategy)),
            strategy,
            |b, &strategy| {
                let control = Arc::new(ControlRegisters::new());
                control.strategy.set_global(Some(strategy));
                let mut engine = PricingEngine::new(Arc::clone(&control));
                let mut book = OrderBook::new(control);
                let mut rng = ChaCha8Rng::seed_from_u64(0xCAFEBABE);
                let snapshots: Vec<_> = (0..4096)
                    .map(|_| book.apply(&random_operation(&mut rng, 8)))
                    .collect();
                let mut i = 0usize;

                b.iter(|| {
                    i = (i + 1) & 4095;
                    black_box(engine.evaluate(&snapshots[i]))
                })
            },
        );
    }

    group.finish();
}

/// Benchmark: Order serialization
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let mut rng = ChaCha8Rng::seed_from_u64(0x12345678);

    group.bench_function("binary_to_bcd", |b| {
        let value: u32 = rng.gen();
        b.iter(|| black_box(binary_to_bcd(black_box(value))))
    });

    group.bench_function("u32_to_ascii", |b| {
        let value: u32 = rng.gen();
        b.iter(|| black_box(u32_to_ascii(black_box(value))))
    });

    let encoder = MessageEncoder::new();
    let order = OrderRequest {
        timestamp: 1_700_000_000_000_000_000,
        op_code: OrderOpCode::Add,
        symbol_index: 3,
        order_id: 42,
        quantity: 800,
        price: 100_100,
        direction: Side::Bid,
    };
    for checksum in [false, true].iter() {
        group.bench_with_input(BenchmarkId::new("message", checksum), checksum, |b, &checksum| {
            b.iter(|| black_box(encoder.encode(black_box(&order), checksum)))
        });
    }

    group.finish();
}

/// Benchmark: Decode a packet carrying several entries
fn bench_feed_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed_decode");

    for entries in [1usize, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(entries), entries, |b, &entries| {
            let identifiers: Vec<u32> = (0..16).map(|k| 0x0100_0000 + k).collect();
            let mut feed = FeedHandler::new(
                SymbolTable::new(&identifiers),
                Arc::new(ControlRegisters::new()),
            );
            let mut rng = ChaCha8Rng::seed_from_u64(0xFEEDFACE);
            let book_entries: Vec<BookEntry> = (0..entries)
                .map(|k| BookEntry {
                    transact_time: k as u64,
                    match_event: 0,
                    price_mantissa: rng.gen_range(99_000i64..101_000) * 100_000,
                    size: rng.gen_range(1..1000),
                    security_id: identifiers[k % identifiers.len()] as i32,
                    rpt_seq: k as u32,
                    number_of_orders: rng.gen_range(1..10),
                    price_level: rng.gen_range(0..NUM_LEVELS as u8),
                    update_action: rng.gen_range(0..3),
                    entry_type: if rng.gen_bool(0.5) { b'0' } else { b'1' },
                })
                .collect();
            let frames = PacketBuilder::new(1, 1)
                .incremental_refresh(1, &book_entries)
                .frames();

            b.iter(|| black_box(feed.decode_packet(&frames)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ladder,
    bench_book_apply,
    bench_strategy,
    bench_encode,
    bench_feed_decode,
);

criterion_main!(benches);
