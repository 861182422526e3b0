//! Error types for the edges of the pipeline.
//!
//! The data path itself never fails: dropped items are counted by the
//! stage that drops them. These errors cover record decoding of
//! host-written data, configuration, replay input and worker lifecycle.

use thiserror::Error;

/// A packed record carried a field value with no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown direction code {0}")]
    Direction(u8),
    #[error("unknown order opcode {0}")]
    OrderOpCode(u8),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("symbol map holds {0} entries, at most 256 are addressable")]
    TooManySymbols(usize),
    #[error("queue capacity must be nonzero")]
    ZeroCapacity,
    #[error("invalid destination address {0:?}")]
    DestAddress(String),
    #[error("strategy override names symbol {0}, outside the symbol map")]
    StrategySymbol(usize),
    #[error("core index {0} is not available on this host")]
    Core(usize),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: unknown side {value:?}")]
    Side { row: usize, value: String },
    #[error("row {row}: unknown action {value:?}")]
    Action { row: usize, value: String },
    #[error("row {row}: price {value} does not fit the fixed-point range")]
    Price { row: usize, value: rust_decimal::Decimal },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
    #[error("worker thread {0} panicked")]
    Worker(&'static str),
}
