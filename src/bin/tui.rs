use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use flash_trader::engine::{Monitor, PipelineIo};
use flash_trader::template::{BookEntry, PacketBuilder};
use flash_trader::types::{BookSnapshot, NUM_LEVELS};
use flash_trader::{Frame, LoopbackTransport, Pipeline, PipelineConfig, Side, StrategyId};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};
use rtrb::Producer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::{io, time::Duration};

const SYMBOLS: u32 = 4;

/// Counters kept by the helper threads outside the pipeline.
#[derive(Default)]
struct SideStats {
    packets_sent: AtomicU64,
    messages: AtomicU64,
    checksum_failures: AtomicU64,
    host_snapshots: AtomicU64,
}

// Helper to generate the ASCII bar string for one side of the ladder
fn render_level_bars(snapshot: &BookSnapshot, side: Side) -> String {
    let (prices, quantities, counts) = match side {
        Side::Bid => (&snapshot.bid_price, &snapshot.bid_quantity, &snapshot.bid_count),
        Side::Ask => (&snapshot.ask_price, &snapshot.ask_quantity, &snapshot.ask_count),
    };
    let max_qty = quantities.iter().copied().max().unwrap_or(0).max(1) as f32;

    let mut out = String::new();
    for level in 0..NUM_LEVELS {
        let price_fmt = format!("{:.5}", prices[level] as f64 / 100_000.0);
        let bar_len = ((quantities[level] as f32 / max_qty) * 20.0) as usize;
        let bar = "█".repeat(bar_len);
        out.push_str(&format!(
            "L{} {:>12} {:<20} {:>6} ({})\n",
            level, price_fmt, bar, quantities[level], counts[level]
        ));
    }
    out
}

/// Synthetic feed: a random walk around one mid price shared by every symbol.
fn feed_loop(
    mut frames: Producer<Frame>,
    identifiers: Vec<u32>,
    stop: Arc<AtomicBool>,
    stats: Arc<SideStats>,
) {
    let mut rng = 12345u64; // Simple LCG for speed
    let mut mid = 300_000i64;
    let mut sequence = 0u32;

    while !stop.load(Ordering::Relaxed) {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        let r = rng >> 32;
        if r % 100 == 0 {
            mid = (mid + (r % 11) as i64 - 5).max(1_000);
        }
        let bid = r % 2 == 0;
        let offset = 50 + (r % 200) as i64;
        let price = if bid { mid - offset } else { mid + offset };
        sequence = sequence.wrapping_add(1);

        let entry = BookEntry {
            transact_time: sequence as u64,
            match_event: 0,
            price_mantissa: price * 100_000,
            size: 1 + (r % 1000) as i32,
            security_id: identifiers[(r as usize) % identifiers.len()] as i32,
            rpt_seq: sequence,
            number_of_orders: 1 + (r % 9) as i32,
            price_level: (r % NUM_LEVELS as u64) as u8,
            update_action: match r % 5 {
                0 => 2,
                1 => 1,
                _ => 0,
            },
            entry_type: if bid { b'0' } else { b'1' },
        };
        let packet = PacketBuilder::new(sequence, sequence as u64)
            .incremental_refresh(sequence as u64, &[entry])
            .frames();
        for frame in packet {
            while frames.push(frame).is_err() {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                std::hint::spin_loop();
            }
        }
        stats.packets_sent.fetch_add(1, Ordering::Relaxed);
    }
}

fn stats_text(monitor: &Monitor, side: &SideStats, throughput: f64) -> String {
    let feed = monitor.feed();
    let strategy = monitor.strategy();
    let oe = monitor.order_entry();
    let dm = monitor.data_mover();
    let rtt = dm
        .rtt
        .mean()
        .map(|mean| format!("{} / {:.1} / {}", dm.rtt.min, mean, dm.rtt.max))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "Packets: {} sent, {} decoded ({:.0} ops/sec)\n\
         Operations: {}  Unresolved: {}  Unsupported: {}\n\
         Orders: {}  Transmitted: {}  Dropped: {}\n\
         Session: {:?}  Listen: {:?}  Space: {}\n\
         Loopback: {} messages, {} checksum failures\n\
         Ring: {} snapshots to host, backpressure {}, RTT min/mean/max {}",
        side.packets_sent.load(Ordering::Relaxed),
        feed.packets,
        throughput,
        feed.operations,
        feed.unresolved,
        feed.unsupported_messages,
        strategy.orders,
        oe.stats.tx_orders,
        oe.stats.tx_drop,
        oe.state,
        oe.listen,
        oe.status.space,
        side.messages.load(Ordering::Relaxed),
        side.checksum_failures.load(Ordering::Relaxed),
        side.host_snapshots.load(Ordering::Relaxed),
        dm.stats.backpressure,
        rtt,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = PipelineConfig::load(None)?;
    if config.symbols.is_empty() {
        config.symbols = (0..SYMBOLS).map(|k| 0x0200_0000 + k).collect();
        config.strategy.default = StrategyId::Peg.code();
    }
    config.session.connect = true;
    config.session.checksum = true;
    config.data_mover.forward_snapshots = true;
    config.data_mover.rtt_enable = true;
    let identifiers = config.symbols.clone();

    let (pipeline, pipeline_io) = Pipeline::new(&config)?;
    let PipelineIo {
        frames,
        transport,
        mut host,
        ..
    } = pipeline_io;
    let handle = pipeline.spawn();
    let monitor = handle.monitor();

    let stop = Arc::new(AtomicBool::new(false));
    let side = Arc::new(SideStats::default());

    let feeder = {
        let stop = Arc::clone(&stop);
        let side = Arc::clone(&side);
        thread::spawn(move || feed_loop(frames, identifiers, stop, side))
    };

    // Transport peer and host reader share one thread
    let peer = {
        let stop = Arc::clone(&stop);
        let side = Arc::clone(&side);
        thread::spawn(move || {
            let mut loopback = LoopbackTransport::new(transport);
            loopback.discard_messages(true);
            while !stop.load(Ordering::Relaxed) {
                let mut moved = loopback.poll();
                if host.pop_snapshot().is_some() {
                    side.host_snapshots.fetch_add(1, Ordering::Relaxed);
                    moved = true;
                }
                let stats = loopback.stats();
                side.messages.store(stats.messages as u64, Ordering::Relaxed);
                side.checksum_failures
                    .store(stats.checksum_failures as u64, Ordering::Relaxed);
                if !moved {
                    std::hint::spin_loop();
                }
            }
        })
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut last_ops = 0u64;
    let mut last_time = std::time::Instant::now();
    let mut throughput = 0.0;

    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    break;
                }
            }
        }

        let now = std::time::Instant::now();
        if now.duration_since(last_time).as_secs_f64() >= 1.0 {
            let current_ops = monitor.feed().operations as u64;
            throughput = current_ops.saturating_sub(last_ops) as f64;
            last_ops = current_ops;
            last_time = now;
        }

        let book = monitor.book();
        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints(
                    [
                        Constraint::Length(3),  // Header
                        Constraint::Min(8),     // Book
                        Constraint::Length(8),  // Stats
                    ]
                    .as_ref(),
                )
                .split(f.size());

            let header = Block::default()
                .borders(Borders::ALL)
                .title("FLASH-TRADER Pipeline Monitor");
            let title = Paragraph::new(format!(
                "Symbol {} | Press 'q' to quit",
                book.last.symbol_index
            ))
            .block(header)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Cyan));
            f.render_widget(title, chunks[0]);

            let book_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[1]);

            let bids_widget = Paragraph::new(render_level_bars(&book.last, Side::Bid)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("BIDS")
                    .style(Style::default().fg(Color::Green)),
            );
            let asks_widget = Paragraph::new(render_level_bars(&book.last, Side::Ask)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("ASKS")
                    .style(Style::default().fg(Color::Red)),
            );
            f.render_widget(bids_widget, book_chunks[0]);
            f.render_widget(asks_widget, book_chunks[1]);

            let stats_block = Paragraph::new(stats_text(&monitor, &side, throughput))
                .block(Block::default().borders(Borders::ALL).title("Pipeline Telemetry"))
                .style(Style::default().fg(Color::Yellow));
            f.render_widget(stats_block, chunks[2]);
        })?;
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    stop.store(true, Ordering::Relaxed);
    let _ = feeder.join();
    let _ = peer.join();
    handle.shutdown()?;
    Ok(())
}
