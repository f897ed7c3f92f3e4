//! Simulation parameters: CLI parsing and validation.
//!
//! Flags are `--name=value` with the external names kept verbatim (`--N`,
//! `--X1`, ...). clap handles `--help` (exit 0) and unknown flags (exit 2);
//! relation checks between parameters live in [`Config::validate`] and are
//! reported once on stderr with exit 1.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "parksim",
    version,
    about = "Threaded amusement-park coordination simulator"
)]
pub struct Config {
    /// Number of visitors to spawn over the run.
    #[arg(long = "tourists_total", default_value_t = 80)]
    pub tourists_total: u32,

    /// Lifetime admission cap.
    #[arg(long = "N", default_value_t = 60)]
    pub entry_limit: u32,

    /// Guided group size.
    #[arg(long = "M", default_value_t = 6)]
    pub group_size: u32,

    /// Number of guide threads.
    #[arg(long = "P", default_value_t = 2)]
    pub guides: u32,

    /// Bridge capacity (must satisfy X1 < M).
    #[arg(long = "X1", default_value_t = 4)]
    pub bridge_cap: u32,

    /// Tower capacity (must satisfy X2 < 2*M).
    #[arg(long = "X2", default_value_t = 10)]
    pub tower_cap: u32,

    /// Ferry capacity (must satisfy X3 < 1.5*M).
    #[arg(long = "X3", default_value_t = 8)]
    pub ferry_cap: u32,

    /// Ferry one-way crossing time.
    #[arg(long = "ferry_T_ms", default_value_t = 900)]
    pub ferry_t_ms: u64,

    /// Simulated park open duration.
    #[arg(long = "duration_ms", default_value_t = 30_000)]
    pub duration_ms: u64,

    /// Max random delay between consecutive arrivals.
    #[arg(long = "arrival_jitter_ms", default_value_t = 500)]
    pub arrival_jitter_ms: u64,

    /// RNG seed.
    #[arg(long, default_value_t = 12345)]
    pub seed: u64,

    /// Per-tower-step evacuation probability.
    #[arg(long = "signal1_prob", default_value_t = 0.10)]
    pub signal1_prob: f64,

    /// Per-segment abort probability.
    #[arg(long = "signal2_prob", default_value_t = 0.05)]
    pub signal2_prob: f64,

    /// Inter-stage walking time, lower bound.
    #[arg(long = "segment_min_ms", default_value_t = 400)]
    pub segment_min_ms: u64,

    /// Inter-stage walking time, upper bound.
    #[arg(long = "segment_max_ms", default_value_t = 1200)]
    pub segment_max_ms: u64,

    /// Bridge transit time, lower bound.
    #[arg(long = "bridge_min_ms", default_value_t = 400)]
    pub bridge_min_ms: u64,

    /// Bridge transit time, upper bound.
    #[arg(long = "bridge_max_ms", default_value_t = 1000)]
    pub bridge_max_ms: u64,

    /// Tower stay, lower bound.
    #[arg(long = "tower_min_ms", default_value_t = 700)]
    pub tower_min_ms: u64,

    /// Tower stay, upper bound.
    #[arg(long = "tower_max_ms", default_value_t = 1500)]
    pub tower_max_ms: u64,

    /// Probability that a spawned visitor holds a VIP pass.
    #[arg(long = "vip_prob", default_value_t = 0.15)]
    pub vip_prob: f64,

    /// Event log destination (parent directories are created).
    #[arg(long = "log_path", default_value = "logs/sim.log")]
    pub log_path: PathBuf,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("M must be > 0")]
    GroupSize,

    #[error("P must be > 0")]
    Guides,

    #[error("X1 must satisfy 0 < X1 < M (got X1={x1}, M={m})")]
    BridgeCap { x1: u32, m: u32 },

    #[error("X2 must satisfy 0 < X2 < 2*M (got X2={x2}, M={m})")]
    TowerCap { x2: u32, m: u32 },

    #[error("X3 must satisfy 0 < X3 < 1.5*M (got X3={x3}, M={m})")]
    FerryCap { x3: u32, m: u32 },

    #[error("duration_ms must be > 0")]
    Duration,

    #[error("{name} must be a probability in [0,1] (got {value})")]
    Probability { name: &'static str, value: f64 },

    #[error("{name}: lower bound {min} exceeds upper bound {max}")]
    Interval {
        name: &'static str,
        min: u64,
        max: u64,
    },
}

impl Config {
    /// Check range and relation constraints that clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_size == 0 {
            return Err(ConfigError::GroupSize);
        }
        if self.guides == 0 {
            return Err(ConfigError::Guides);
        }
        if self.bridge_cap == 0 || self.bridge_cap >= self.group_size {
            return Err(ConfigError::BridgeCap {
                x1: self.bridge_cap,
                m: self.group_size,
            });
        }
        if self.tower_cap == 0 || self.tower_cap >= 2 * self.group_size {
            return Err(ConfigError::TowerCap {
                x2: self.tower_cap,
                m: self.group_size,
            });
        }
        // X3 < 1.5*M, kept in integers as 2*X3 < 3*M.
        if self.ferry_cap == 0 || 2 * self.ferry_cap >= 3 * self.group_size {
            return Err(ConfigError::FerryCap {
                x3: self.ferry_cap,
                m: self.group_size,
            });
        }
        if self.duration_ms == 0 {
            return Err(ConfigError::Duration);
        }
        for (name, value) in [
            ("signal1_prob", self.signal1_prob),
            ("signal2_prob", self.signal2_prob),
            ("vip_prob", self.vip_prob),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        for (name, min, max) in [
            ("segment_ms", self.segment_min_ms, self.segment_max_ms),
            ("bridge_ms", self.bridge_min_ms, self.bridge_max_ms),
            ("tower_ms", self.tower_min_ms, self.tower_max_ms),
        ] {
            if min > max {
                return Err(ConfigError::Interval { name, min, max });
            }
        }
        Ok(())
    }
}
