//! Engine configuration loaded from environment variables.
//!
//! Every knob has a default; `EMBER_*` variables override. The one hard
//! validation rule: the cycle timeout must be strictly less than the cycle
//! interval, so a stuck cycle always releases the guard before the next
//! tick arrives.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use ember_core::constants::{
    BLOCK_REWARD, DEFAULT_ALERT_FAILURE_THRESHOLD, DEFAULT_CYCLE_INTERVAL_SECS,
    DEFAULT_CYCLE_TIMEOUT_SECS,
};

/// Configuration for the production engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite ledger database.
    pub db_path: PathBuf,
    /// Wall-clock interval between production cycles.
    pub cycle_interval: Duration,
    /// Watchdog timeout for a single cycle. Strictly less than the interval.
    pub cycle_timeout: Duration,
    /// Nominal reward per block, in cinders.
    pub block_reward: f64,
    /// Consecutive failure count that triggers an error-level alert log.
    pub alert_threshold: u32,
}

/// Invalid engine configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidInteger { var: &'static str, value: String },
    #[error("{var} must be a positive number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("cycle timeout ({timeout_secs}s) must be strictly less than the cycle interval ({interval_secs}s)")]
    TimeoutNotBelowInterval {
        timeout_secs: u64,
        interval_secs: u64,
    },
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("embermine");

        Self {
            db_path: data_dir.join("ledger.db"),
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_SECS),
            cycle_timeout: Duration::from_secs(DEFAULT_CYCLE_TIMEOUT_SECS),
            block_reward: BLOCK_REWARD,
            alert_threshold: DEFAULT_ALERT_FAILURE_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `EMBER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = lookup("EMBER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let interval_secs: u64 =
            parse_positive(&lookup, "EMBER_CYCLE_INTERVAL_SECS", DEFAULT_CYCLE_INTERVAL_SECS)?;
        let timeout_secs: u64 =
            parse_positive(&lookup, "EMBER_CYCLE_TIMEOUT_SECS", DEFAULT_CYCLE_TIMEOUT_SECS)?;
        let alert_threshold: u32 = parse_positive(
            &lookup,
            "EMBER_ALERT_THRESHOLD",
            DEFAULT_ALERT_FAILURE_THRESHOLD,
        )?;

        let block_reward = match lookup("EMBER_BLOCK_REWARD") {
            None => defaults.block_reward,
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) if v > 0.0 && v.is_finite() => v,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        var: "EMBER_BLOCK_REWARD",
                        value: raw,
                    });
                }
            },
        };

        if timeout_secs >= interval_secs {
            return Err(ConfigError::TimeoutNotBelowInterval {
                timeout_secs,
                interval_secs,
            });
        }

        Ok(Self {
            db_path,
            cycle_interval: Duration::from_secs(interval_secs),
            cycle_timeout: Duration::from_secs(timeout_secs),
            block_reward,
            alert_threshold,
        })
    }
}

/// Parse a positive integer at the knob's own width, so an out-of-range
/// value fails like any other garbage instead of wrapping or truncating.
fn parse_positive<T>(
    lookup: impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.parse::<T>() {
            Ok(v) if v > T::from(0) => Ok(v),
            _ => Err(ConfigError::InvalidInteger { var, value: raw }),
        },
    }
}
