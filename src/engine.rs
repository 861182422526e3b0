//! Engine - pipeline assembly, cooperative stepping and pinned workers.
//!
//! ```text
//! frames -> [feed] -> ops -> [book] -> snapshots -> [strategy] -> orders -> [order entry] -> transport
//!                              |                                             ^
//!                              +--> ring tap -> [data mover] <-> host -------+ host orders
//! ```
//!
//! Every stage is wrapped in a worker that owns the stage and its queue
//! ends. [`Pipeline::step`] activates each worker once in dataflow order;
//! [`Pipeline::spawn`] moves each worker onto its own busy-polling thread.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::codec::unpack_snapshot;
use crate::config::{CpuConfig, PipelineConfig};
use crate::control::ControlRegisters;
use crate::data_mover::{DataMover, DataMoverStats, HostPort, RingPositions, RttStats};
use crate::error::PipelineError;
use crate::feed_handler::{FeedHandler, FeedStats};
use crate::order_book::{BookStats, OrderBook};
use crate::order_entry::{OrderEntry, OrderEntryStats};
use crate::reassembly::Frame;
use crate::session::{
    session_link, ListenState, SessionChannels, SessionState, SessionStatus, TransportChannels,
};
use crate::strategy::{PricingEngine, StrategyStats};
use crate::symbol::SymbolTable;
use crate::types::{BookOperation, BookSnapshot, OrderRequest};

/// Activations between monitor publications on a worker thread.
pub const PUBLISH_INTERVAL: u64 = 1024;

// ============================================================================
// Monitor
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct BookView {
    pub stats: BookStats,
    /// Most recent snapshot produced
    pub last: BookSnapshot,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DataMoverView {
    pub stats: DataMoverStats,
    pub rtt: RttStats,
    pub positions: RingPositions,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OrderEntryView {
    pub stats: OrderEntryStats,
    pub state: SessionState,
    pub status: SessionStatus,
    pub listen: ListenState,
}

/// Counters published by the stages for external observers.
///
/// Writers never block: a publication is skipped if a reader holds the lock.
#[derive(Debug, Default)]
pub struct Monitor {
    /// Total activations across every worker
    pub activations: AtomicU64,
    feed: RwLock<FeedStats>,
    book: RwLock<BookView>,
    strategy: RwLock<StrategyStats>,
    data_mover: RwLock<DataMoverView>,
    order_entry: RwLock<OrderEntryView>,
}

fn publish<T: Copy>(slot: &RwLock<T>, value: T) {
    if let Ok(mut guard) = slot.try_write() {
        *guard = value;
    }
}

fn read<T: Copy + Default>(slot: &RwLock<T>) -> T {
    slot.read().map(|guard| *guard).unwrap_or_default()
}

impl Monitor {
    pub fn feed(&self) -> FeedStats {
        read(&self.feed)
    }

    pub fn book(&self) -> BookView {
        read(&self.book)
    }

    pub fn strategy(&self) -> StrategyStats {
        read(&self.strategy)
    }

    pub fn data_mover(&self) -> DataMoverView {
        read(&self.data_mover)
    }

    pub fn order_entry(&self) -> OrderEntryView {
        read(&self.order_entry)
    }
}

// ============================================================================
// Workers
// ============================================================================

/// A stage bundled with the queue ends it polls.
pub trait Stage: Send + 'static {
    const NAME: &'static str;

    /// One non-blocking activation. Returns true if anything moved.
    fn activate(&mut self) -> bool;

    fn warm_up(&mut self) {}

    fn publish(&self, monitor: &Monitor);
}

pub struct FeedWorker {
    pub stage: FeedHandler,
    input: Consumer<Frame>,
    output: Producer<BookOperation>,
}

impl Stage for FeedWorker {
    const NAME: &'static str = "feed";

    #[inline]
    fn activate(&mut self) -> bool {
        self.stage.poll(&mut self.input, &mut self.output)
    }

    fn publish(&self, monitor: &Monitor) {
        publish(&monitor.feed, self.stage.stats());
    }
}

pub struct BookWorker {
    pub stage: OrderBook,
    input: Consumer<BookOperation>,
    output: Producer<BookSnapshot>,
    ring: Producer<BookSnapshot>,
}

impl Stage for BookWorker {
    const NAME: &'static str = "book";

    #[inline]
    fn activate(&mut self) -> bool {
        self.stage
            .poll(&mut self.input, &mut self.output, &mut self.ring)
    }

    fn warm_up(&mut self) {
        self.stage.warm_up();
    }

    fn publish(&self, monitor: &Monitor) {
        publish(
            &monitor.book,
            BookView {
                stats: self.stage.stats(),
                last: unpack_snapshot(&self.stage.capture()),
            },
        );
    }
}

pub struct StrategyWorker {
    pub stage: PricingEngine,
    input: Consumer<BookSnapshot>,
    output: Producer<OrderRequest>,
}

impl Stage for StrategyWorker {
    const NAME: &'static str = "strategy";

    #[inline]
    fn activate(&mut self) -> bool {
        self.stage.poll(&mut self.input, &mut self.output)
    }

    fn publish(&self, monitor: &Monitor) {
        publish(&monitor.strategy, self.stage.stats());
    }
}

pub struct DataMoverWorker {
    pub stage: DataMover,
    input: Consumer<BookSnapshot>,
    output: Producer<OrderRequest>,
}

impl Stage for DataMoverWorker {
    const NAME: &'static str = "data-mover";

    #[inline]
    fn activate(&mut self) -> bool {
        self.stage.poll(&mut self.input, &mut self.output)
    }

    fn warm_up(&mut self) {
        self.stage.warm_up();
    }

    fn publish(&self, monitor: &Monitor) {
        publish(
            &monitor.data_mover,
            DataMoverView {
                stats: self.stage.stats(),
                rtt: self.stage.rtt(),
                positions: self.stage.positions(),
            },
        );
    }
}

pub struct OrderEntryWorker {
    pub stage: OrderEntry,
    orders: Consumer<OrderRequest>,
    host_orders: Consumer<OrderRequest>,
    session: SessionChannels,
}

impl Stage for OrderEntryWorker {
    const NAME: &'static str = "order-entry";

    #[inline]
    fn activate(&mut self) -> bool {
        self.stage
            .poll(&mut self.orders, &mut self.host_orders, &mut self.session)
    }

    fn warm_up(&mut self) {
        self.stage.warm_up();
    }

    fn publish(&self, monitor: &Monitor) {
        publish(
            &monitor.order_entry,
            OrderEntryView {
                stats: self.stage.stats(),
                state: self.stage.session_state(),
                status: self.stage.session_status(),
                listen: self.stage.listen_state(),
            },
        );
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The external ends of a pipeline.
pub struct PipelineIo {
    pub frames: Producer<Frame>,
    pub transport: TransportChannels,
    pub host: HostPort,
    pub control: Arc<ControlRegisters>,
}

impl PipelineIo {
    /// Push as many frames as fit; returns how many were accepted.
    pub fn push_frames(&mut self, frames: &[Frame]) -> usize {
        frames
            .iter()
            .take_while(|frame| self.frames.push(**frame).is_ok())
            .count()
    }
}

pub struct Pipeline {
    pub feed: FeedWorker,
    pub book: BookWorker,
    pub strategy: StrategyWorker,
    pub data_mover: DataMoverWorker,
    pub order_entry: OrderEntryWorker,
    control: Arc<ControlRegisters>,
    cpu: CpuConfig,
    monitor: Arc<Monitor>,
}

impl Pipeline {
    /// Build every stage and queue from a validated configuration.
    pub fn new(config: &PipelineConfig) -> Result<(Self, PipelineIo), PipelineError> {
        config.validate()?;
        let control = Arc::new(ControlRegisters::from_config(config));
        let capacity = config.queues.capacity;

        let (frames_tx, frames_rx) = RingBuffer::new(capacity);
        let (ops_tx, ops_rx) = RingBuffer::new(capacity);
        let (snaps_tx, snaps_rx) = RingBuffer::new(capacity);
        let (ring_tx, ring_rx) = RingBuffer::new(capacity);
        let (orders_tx, orders_rx) = RingBuffer::new(capacity);
        let (host_orders_tx, host_orders_rx) = RingBuffer::new(capacity);
        let (session, transport) = session_link(config.queues.session_capacity);
        let (data_mover, host) = DataMover::new(Arc::clone(&control))?;

        let pipeline = Self {
            feed: FeedWorker {
                stage: FeedHandler::new(SymbolTable::new(&config.symbols), Arc::clone(&control)),
                input: frames_rx,
                output: ops_tx,
            },
            book: BookWorker {
                stage: OrderBook::new(Arc::clone(&control)),
                input: ops_rx,
                output: snaps_tx,
                ring: ring_tx,
            },
            strategy: StrategyWorker {
                stage: PricingEngine::new(Arc::clone(&control)),
                input: snaps_rx,
                output: orders_tx,
            },
            data_mover: DataMoverWorker {
                stage: data_mover,
                input: ring_rx,
                output: host_orders_tx,
            },
            order_entry: OrderEntryWorker {
                stage: OrderEntry::new(Arc::clone(&control)),
                orders: orders_rx,
                host_orders: host_orders_rx,
                session,
            },
            control: Arc::clone(&control),
            cpu: config.cpu.clone(),
            monitor: Arc::new(Monitor::default()),
        };
        tracing::info!(capacity, symbols = config.symbols.len(), "pipeline built");

        Ok((
            pipeline,
            PipelineIo {
                frames: frames_tx,
                transport,
                host,
                control,
            },
        ))
    }

    /// Activate every stage once, in dataflow order.
    pub fn step(&mut self) -> bool {
        let mut progressed = self.feed.activate();
        progressed |= self.book.activate();
        progressed |= self.strategy.activate();
        progressed |= self.data_mover.activate();
        progressed |= self.order_entry.activate();
        progressed
    }

    /// Step until no stage moves or `max_steps` is reached.
    /// Returns the number of steps taken.
    pub fn run_until_idle(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps {
            steps += 1;
            if !self.step() {
                break;
            }
        }
        steps
    }

    pub fn warm_up(&mut self) {
        self.feed.warm_up();
        self.book.warm_up();
        self.strategy.warm_up();
        self.data_mover.warm_up();
        self.order_entry.warm_up();
    }

    /// Publish every stage's counters to the monitor.
    pub fn publish(&self) {
        self.feed.publish(&self.monitor);
        self.book.publish(&self.monitor);
        self.strategy.publish(&self.monitor);
        self.data_mover.publish(&self.monitor);
        self.order_entry.publish(&self.monitor);
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    pub fn control(&self) -> &Arc<ControlRegisters> {
        &self.control
    }

    /// Hash of the book ladders, strategy state and last message.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.book.stage.state_hash().hash(&mut hasher);
        self.strategy.stage.last_order_id().hash(&mut hasher);
        self.strategy.stage.stats().orders.hash(&mut hasher);
        self.order_entry.stage.capture().hash(&mut hasher);
        hasher.finish()
    }

    /// Move every stage onto its own thread.
    pub fn spawn(self) -> PipelineHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let cores = worker_cores(&self.cpu, 5);
        let monitor = self.monitor;

        let workers = vec![
            spawn_worker(self.feed, cores[0], &shutdown, &monitor),
            spawn_worker(self.book, cores[1], &shutdown, &monitor),
            spawn_worker(self.strategy, cores[2], &shutdown, &monitor),
            spawn_worker(self.data_mover, cores[3], &shutdown, &monitor),
            spawn_worker(self.order_entry, cores[4], &shutdown, &monitor),
        ];
        tracing::info!(workers = workers.len(), "pipeline running");

        PipelineHandle {
            shutdown,
            workers,
            monitor,
        }
    }
}

/// Running pipeline threads.
pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    monitor: Arc<Monitor>,
}

impl PipelineHandle {
    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    /// Stop every worker and wait for it to exit.
    pub fn shutdown(self) -> Result<(), PipelineError> {
        self.shutdown.store(true, Ordering::Release);
        let mut result = Ok(());
        for (name, worker) in self.workers {
            if worker.join().is_err() {
                tracing::error!(worker = name, "worker panicked");
                result = Err(PipelineError::Worker(name));
            }
        }
        result
    }
}

fn spawn_worker<S: Stage>(
    mut stage: S,
    core: Option<usize>,
    shutdown: &Arc<AtomicBool>,
    monitor: &Arc<Monitor>,
) -> (&'static str, JoinHandle<()>) {
    let shutdown = Arc::clone(shutdown);
    let monitor = Arc::clone(monitor);
    let handle = thread::spawn(move || {
        if let Some(core) = core {
            if !pin_to_core(core) {
                tracing::warn!(worker = S::NAME, core, "could not pin worker");
            }
        }
        stage.warm_up();

        let mut activations = 0u64;
        while !shutdown.load(Ordering::Acquire) {
            if !stage.activate() {
                std::hint::spin_loop();
            }
            activations += 1;
            if activations % PUBLISH_INTERVAL == 0 {
                stage.publish(&monitor);
                monitor
                    .activations
                    .fetch_add(PUBLISH_INTERVAL, Ordering::Relaxed);
            }
        }
        stage.publish(&monitor);
    });
    (S::NAME, handle)
}

/// Pin the current thread to core `index`. Returns false if it does not exist.
pub fn pin_to_core(index: usize) -> bool {
    core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == index))
        .map(core_affinity::set_for_current)
        .unwrap_or(false)
}

/// Core for each of `workers` threads: the configured list, or the last
/// cores of the host (the ones least disturbed by the OS).
fn worker_cores(cpu: &CpuConfig, workers: usize) -> Vec<Option<usize>> {
    if !cpu.pin_workers {
        return vec![None; workers];
    }
    if let Some(cores) = &cpu.cores {
        return (0..workers).map(|k| cores.get(k).copied()).collect();
    }
    let ids = core_affinity::get_core_ids().unwrap_or_default();
    let skip = ids.len().saturating_sub(workers);
    let mut cores: Vec<Option<usize>> = ids[skip..].iter().map(|id| Some(id.id)).collect();
    cores.resize(workers, None);
    cores
}
