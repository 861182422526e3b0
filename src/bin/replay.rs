use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use flash_trader::control::bits;
use flash_trader::message::{CL_ORD_ID_OFFSET, PRICE_OFFSET};
use flash_trader::session::{session_link, SessionChannels, SessionState};
use flash_trader::telemetry::init_tracing;
use flash_trader::types::OrderRequest;
use flash_trader::{
    replay, ControlRegisters, LoopbackTransport, OrderBook, OrderEntry, PipelineConfig,
    PricingEngine, StrategyId,
};
use rtrb::{Consumer, RingBuffer};

/// Replay recorded book operations through book, strategy and order entry.
#[derive(Parser, Debug)]
#[command(name = "replay")]
struct Args {
    /// CSV file: timestamp,symbol,action,side,level,price,quantity,orders
    input: PathBuf,
    /// Pipeline configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Force one strategy for every symbol
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Print every transmitted order
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    None,
    Peg,
    Limit,
}

impl From<StrategyArg> for StrategyId {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::None => StrategyId::None,
            StrategyArg::Peg => StrategyId::Peg,
            StrategyArg::Limit => StrategyId::Limit,
        }
    }
}

struct OrderPath {
    entry: OrderEntry,
    orders: Consumer<OrderRequest>,
    host_orders: Consumer<OrderRequest>,
    session: SessionChannels,
    loopback: LoopbackTransport,
}

impl OrderPath {
    /// Run order entry and the transport until neither moves.
    fn drain(&mut self) {
        loop {
            let moved = self
                .entry
                .poll(&mut self.orders, &mut self.host_orders, &mut self.session);
            if !(self.loopback.poll() || moved) {
                break;
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");
    let args = Args::parse();

    let config = PipelineConfig::load(args.config.as_deref())?;
    let control = Arc::new(ControlRegisters::from_config(&config));
    if let Some(strategy) = args.strategy {
        control.strategy.set_global(Some(strategy.into()));
    }
    control.order_entry.connect(true);
    control.order_entry.stage.set(bits::CHECKSUM);

    let operations = replay::load_operations(&args.input)?;

    let mut book = OrderBook::new(Arc::clone(&control));
    let mut strategy = PricingEngine::new(Arc::clone(&control));
    let (mut orders_tx, orders) = RingBuffer::new(config.queues.capacity);
    let (_host_tx, host_orders) = RingBuffer::new(1);
    let (session, transport) = session_link(config.queues.session_capacity);
    let mut path = OrderPath {
        entry: OrderEntry::new(Arc::clone(&control)),
        orders,
        host_orders,
        session,
        loopback: LoopbackTransport::new(transport),
    };

    path.drain();
    if path.entry.session_state() != SessionState::Active {
        return Err("session did not come up on the loopback transport".into());
    }

    for op in &operations {
        let snapshot = book.apply(op);
        if let Some(order) = strategy.evaluate(&snapshot) {
            while orders_tx.push(order).is_err() {
                path.drain();
            }
        }
        if orders_tx.slots() == 0 {
            path.drain();
        }
    }
    path.drain();

    if args.verbose {
        for message in path.loopback.received() {
            let text = |offset: usize| {
                String::from_utf8_lossy(&message.bytes[offset..offset + 10]).into_owned()
            };
            println!(
                "session {} order {} price {} checksum {:#06x}{}",
                message.meta.session_id,
                text(CL_ORD_ID_OFFSET),
                text(PRICE_OFFSET),
                message.meta.checksum,
                if message.checksum_ok { "" } else { " MISMATCH" },
            );
        }
    }

    let book_stats = book.stats();
    let strategy_stats = strategy.stats();
    let oe = path.entry.stats();
    let transport = path.loopback.stats();
    println!("\n=== Replay Summary ===");
    println!("Operations:  {} ({} invalid)", operations.len(), book_stats.invalid_operations);
    println!("Snapshots:   {}", book_stats.snapshots);
    println!("Orders:      {}", strategy_stats.orders);
    println!("Transmitted: {} ({} dropped)", oe.tx_orders, oe.tx_drop);
    println!(
        "Received:    {} ({} checksum failures)",
        transport.messages, transport.checksum_failures
    );
    Ok(())
}
