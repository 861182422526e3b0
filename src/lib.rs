//! # Flash-Trader
//!
//! A low-latency pipeline from exchange market data to order entry.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: every piece of state is owned by exactly one stage
//! - **One Item per Activation**: stages never block; a full output or an
//!   empty input makes the activation a no-op
//! - **Counted, Never Fatal**: anything that cannot be processed is dropped
//!   and counted
//! - **Fixed Layouts**: book depth, records and messages have fixed sizes
//!
//! ## Architecture
//!
//! ```text
//! [Feed Handler] --> [Order Book] --> [Strategy] --> [Order Entry] --> transport
//!                         |                               ^
//!                         +--> [Data Mover] <--> host ----+
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod data_mover;
pub mod engine;
pub mod error;
pub mod feed_handler;
pub mod framing;
pub mod loopback;
pub mod message;
pub mod order_book;
pub mod order_entry;
pub mod price_level;
pub mod reassembly;
pub mod replay;
pub mod ring;
pub mod session;
pub mod strategy;
pub mod symbol;
pub mod telemetry;
pub mod template;
pub mod types;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use control::{bits, ControlRegisters};
pub use data_mover::{DataMover, HostPort};
pub use engine::{Monitor, Pipeline, PipelineHandle, PipelineIo};
pub use error::{CodecError, ConfigError, PipelineError, ReplayError};
pub use feed_handler::FeedHandler;
pub use loopback::LoopbackTransport;
pub use message::MessageEncoder;
pub use order_book::OrderBook;
pub use order_entry::OrderEntry;
pub use price_level::{Ladder, PriceLevel};
pub use reassembly::Frame;
pub use strategy::PricingEngine;
pub use types::{
    BookOpCode, BookOperation, BookSnapshot, OrderOpCode, OrderRequest, Side, StrategyId,
};
