//! Pipeline configuration.
//!
//! Loaded from an optional TOML file with environment overrides
//! (`FLASH__SECTION__KEY=value`), then validated before any register
//! is programmed.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::NUM_SYMBOLS;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FLASH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queues: QueueConfig,
    /// Raw security identifiers; position is the symbol index
    pub symbols: Vec<u32>,
    pub strategy: StrategyConfig,
    pub session: SessionConfig,
    pub data_mover: DataMoverConfig,
    pub cpu: CpuConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of each inter-stage queue
    pub capacity: usize,
    /// Capacity of each session interface queue
    pub session_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            session_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Strategy id applied to every symbol (0 none, 1 peg, 2 limit)
    pub default: u8,
    pub symbols: Vec<StrategyRule>,
    pub global_override: Option<u8>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StrategyRule {
    pub symbol: usize,
    pub strategy: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub listen_port: u16,
    /// Dotted IPv4 destination of the outbound session
    pub dest_address: String,
    pub dest_port: u16,
    /// Request the outbound session at start
    pub connect: bool,
    /// Generate message checksums
    pub checksum: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_port: 7,
            dest_address: "127.0.0.1".to_string(),
            dest_port: 23,
            connect: false,
            checksum: false,
        }
    }
}

impl SessionConfig {
    pub fn dest_ipv4(&self) -> Result<Ipv4Addr, ConfigError> {
        self.dest_address
            .parse()
            .map_err(|_| ConfigError::DestAddress(self.dest_address.clone()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataMoverConfig {
    /// Activations to wait after each ring dispatch
    pub throttle_rate: u32,
    pub rtt_enable: bool,
    /// Copy every book snapshot into the ring
    pub forward_snapshots: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub pin_workers: bool,
    /// Explicit core per worker, in stage order; otherwise the last cores are used
    pub cores: Option<Vec<usize>>,
}

impl PipelineConfig {
    /// Load from `path` (if any) layered under environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        tracing::info!(
            symbols = config.symbols.len(),
            queue_capacity = config.queues.capacity,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.len() > NUM_SYMBOLS {
            return Err(ConfigError::TooManySymbols(self.symbols.len()));
        }
        if self.queues.capacity == 0 || self.queues.session_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        self.session.dest_ipv4()?;
        if let Some(rule) = self.strategy.symbols.iter().find(|r| r.symbol >= NUM_SYMBOLS) {
            return Err(ConfigError::StrategySymbol(rule.symbol));
        }
        if let Some(cores) = &self.cpu.cores {
            let available = core_affinity::get_core_ids().map(|ids| ids.len()).unwrap_or(0);
            if let Some(core) = cores.iter().find(|c| **c >= available) {
                return Err(ConfigError::Core(*core));
            }
        }
        Ok(())
    }
}
