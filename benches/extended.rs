//! Extended Benchmark Suite - end-to-end and cross-stage measurements.
//!
//! Includes:
//! - Packet in to message out through the stepped pipeline
//! - Symbol count impact on the end-to-end path
//! - Host ring round trip through the data mover
//! - Batch throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flash_trader::engine::PipelineIo;
use flash_trader::template::{BookEntry, PacketBuilder};
use flash_trader::types::{BookSnapshot, NUM_LEVELS};
use flash_trader::{
    ControlRegisters, DataMover, Frame, LoopbackTransport, OrderOpCode, OrderRequest, Pipeline,
    PipelineConfig, Side, StrategyId,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rtrb::{Producer, RingBuffer};
use std::sync::Arc;

/// A connected pipeline with a loopback peer that discards messages
fn connected_pipeline(symbols: u32) -> (Pipeline, Producer<Frame>, LoopbackTransport, Vec<u32>) {
    let mut config = PipelineConfig::default();
    config.symbols = (0..symbols).map(|k| 0x0100_0000 + k).collect();
    config.strategy.default = StrategyId::Peg.code();
    config.session.connect = true;
    config.session.checksum = true;
    let identifiers = config.symbols.clone();

    let (mut pipeline, io) = Pipeline::new(&config).expect("valid config");
    let PipelineIo { frames, transport, .. } = io;
    let mut loopback = LoopbackTransport::new(transport);
    loopback.discard_messages(true);
    pipeline.warm_up();
    for _ in 0..64 {
        pipeline.step();
        loopback.poll();
    }
    (pipeline, frames, loopback, identifiers)
}

/// Pre-generate packets that each move the best bid of a random symbol
fn random_packets(rng: &mut ChaCha8Rng, identifiers: &[u32], count: usize) -> Vec<Vec<Frame>> {
    (0..count)
        .map(|k| {
            let entry = BookEntry {
                transact_time: k as u64,
                match_event: 0,
                price_mantissa: rng.gen_range(99_000i64..101_000) * 100_000,
                size: rng.gen_range(1..1000),
                security_id: identifiers[rng.gen_range(0..identifiers.len())] as i32,
                rpt_seq: k as u32,
                number_of_orders: rng.gen_range(1..10),
                price_level: rng.gen_range(0..NUM_LEVELS as u8),
                update_action: rng.gen_range(0..3),
                entry_type: if rng.gen_bool(0.5) { b'0' } else { b'1' },
            };
            PacketBuilder::new(k as u32, k as u64)
                .incremental_refresh(k as u64, &[entry])
                .frames()
        })
        .collect()
}

/// Push as many frames as fit; returns how many were accepted
fn push_frames(frames: &mut Producer<Frame>, packet: &[Frame]) -> usize {
    packet
        .iter()
        .take_while(|frame| frames.push(**frame).is_ok())
        .count()
}

fn drive(pipeline: &mut Pipeline, loopback: &mut LoopbackTransport) {
    loop {
        let moved = pipeline.step();
        if !(loopback.poll() || moved) {
            break;
        }
    }
}

/// Benchmark: One packet through every stage and onto the transport
fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");

    for symbols in [1u32, 16, 256].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(symbols), symbols, |b, &symbols| {
            let (mut pipeline, mut frames, mut loopback, identifiers) = connected_pipeline(symbols);
            let mut rng = ChaCha8Rng::seed_from_u64(0xDEADBEEF);
            let packets = random_packets(&mut rng, &identifiers, 1024);
            let mut i = 0usize;

            b.iter(|| {
                i = (i + 1) & 1023;
                push_frames(&mut frames, &packets[i]);
                drive(&mut pipeline, &mut loopback);
                black_box(pipeline.order_entry.stage.stats().tx_orders)
            })
        });
    }

    group.finish();
}

/// Benchmark: Snapshot out to the host ring and an order back in
fn bench_ring_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_round_trip");

    for throttle in [0u32, 4].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(throttle), throttle, |b, &throttle| {
            let control = Arc::new(ControlRegisters::new());
            control.data_mover.set_throttle_rate(throttle);
            let (mut mover, mut host) = DataMover::new(Arc::clone(&control)).expect("histogram");
            mover.warm_up();
            let (mut snap_tx, mut snap_rx) = RingBuffer::<BookSnapshot>::new(16);
            let (mut out_tx, mut out_rx) = RingBuffer::<OrderRequest>::new(16);
            let order = OrderRequest {
                timestamp: 0,
                op_code: OrderOpCode::Add,
                symbol_index: 1,
                order_id: 7,
                quantity: 100,
                price: 100_000,
                direction: Side::Ask,
            };

            b.iter(|| {
                let _ = snap_tx.push(BookSnapshot::default());
                mover.poll(&mut snap_rx, &mut out_tx);
                let snapshot = host.pop_snapshot();
                let _ = host.push_order(&order);
                while mover.poll(&mut snap_rx, &mut out_tx) {
                    while out_rx.pop().is_ok() {}
                }
                black_box(snapshot)
            })
        });
    }

    group.finish();
}

/// Benchmark: Throughput with batch processing
fn bench_batch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_throughput");

    for batch_size in [100usize, 1_000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let (mut pipeline, mut frames, mut loopback, identifiers) = connected_pipeline(16);
                let mut rng = ChaCha8Rng::seed_from_u64(0x12345678);
                let packets = random_packets(&mut rng, &identifiers, batch_size);

                b.iter(|| {
                    for packet in &packets {
                        let mut offset = 0;
                        while offset < packet.len() {
                            offset += push_frames(&mut frames, &packet[offset..]);
                            drive(&mut pipeline, &mut loopback);
                        }
                    }
                    drive(&mut pipeline, &mut loopback);
                    black_box(loopback.stats().messages)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    extended_benches,
    bench_end_to_end,
    bench_ring_round_trip,
    bench_batch_throughput,
);

criterion_main!(extended_benches);
