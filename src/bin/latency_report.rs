use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use flash_trader::engine::PipelineIo;
use flash_trader::session::SessionState;
use flash_trader::telemetry::init_tracing;
use flash_trader::template::{BookEntry, PacketBuilder};
use flash_trader::{LoopbackTransport, Pipeline, PipelineConfig, StrategyId};
use hdrhistogram::Histogram;

/// Measure packet-in to message-out latency of the pipeline in stepped mode.
#[derive(Parser, Debug)]
#[command(name = "latency-report")]
struct Args {
    /// Packets to send
    #[arg(short, long, default_value_t = 1_000_000)]
    iterations: u64,
    /// Pipeline configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

const SYMBOLS: u32 = 16;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("warn");
    let args = Args::parse();

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if config.symbols.is_empty() {
        config.symbols = (0..SYMBOLS).map(|k| 0x0100_0000 + k).collect();
        config.strategy.default = StrategyId::Peg.code();
    }
    config.session.connect = true;
    config.session.checksum = true;
    let identifiers = config.symbols.clone();

    println!("Preparing Latency Benchmark...");
    let (mut pipeline, io) = Pipeline::new(&config)?;
    let PipelineIo {
        mut frames,
        transport,
        ..
    } = io;
    let mut loopback = LoopbackTransport::new(transport);
    loopback.discard_messages(true);
    pipeline.warm_up();

    for _ in 0..64 {
        pipeline.step();
        loopback.poll();
    }
    if pipeline.order_entry.stage.session_state() != SessionState::Active {
        return Err("session did not come up on the loopback transport".into());
    }

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3)?;
    let mut total_duration = Duration::ZERO;
    let mut rng = 12345u64;
    let mut mid = 100_000i64;

    println!("Running {} iterations...", args.iterations);
    for i in 0..args.iterations {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        let r = rng >> 32;
        mid = (mid + (r % 11) as i64 - 5).max(1_000);

        let entry = BookEntry {
            transact_time: i,
            match_event: 0,
            price_mantissa: mid * 100_000,
            size: 1 + (r % 500) as i32,
            security_id: identifiers[(r as usize) % identifiers.len()] as i32,
            rpt_seq: i as u32,
            number_of_orders: 1 + (r % 7) as i32,
            price_level: (r % 5) as u8,
            update_action: if r % 4 == 0 { 2 } else { 0 },
            entry_type: if r % 2 == 0 { b'0' } else { b'1' },
        };
        let packet = PacketBuilder::new(i as u32, i)
            .incremental_refresh(i, &[entry])
            .frames();

        // Critical measurement section
        let start = Instant::now();
        for frame in &packet {
            let _ = frames.push(*frame);
        }
        loop {
            let moved = pipeline.step();
            if !(loopback.poll() || moved) {
                break;
            }
        }
        let elapsed = start.elapsed();

        histogram.saturating_record(elapsed.as_nanos() as u64);
        total_duration += elapsed;
    }

    let oe = pipeline.order_entry.stage.stats();
    let transport = loopback.stats();

    println!("\n=== Latency Report (ns) ===");
    println!("Packets:    {}", args.iterations);
    println!("Orders:     {} sent, {} dropped", oe.tx_orders, oe.tx_drop);
    println!("Messages:   {} ({} checksum failures)", transport.messages, transport.checksum_failures);
    println!(
        "Throughput: {:.2} packets/sec",
        args.iterations as f64 / total_duration.as_secs_f64()
    );
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");

    println!("\nDistribution:");
    for v in histogram.iter_log(100, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:8} ns: {:10} count", v.value_iterated_to(), count);
        }
    }
    Ok(())
}
