//! Pipeline configuration from environment variables
//!
//! Per-stage settings are comma-separated lists aligned with
//! `STAGE_INTERVALS`; a single value applies to every stage.

use super::interval::Interval;
use super::triggers::TriggerKind;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings for one aggregation stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub interval: Interval,

    /// Maximum rows kept per symbol
    pub buffer_size: usize,

    /// Sleep between the end of one iteration and the start of the next
    pub delay_ms: u64,

    pub trigger: TriggerKind,

    /// Append each screened set to the previous one instead of replacing it
    pub append_screened: bool,

    /// Cap on appended screened entries (0 = no cap)
    pub screened_roll: usize,

    /// Rebuild bar volumes from rolling volume (one-minute stage only)
    pub recover_volumes: bool,

    /// Minimum spacing between persists; shutdown always persists
    pub persist_interval_ms: u64,
}

/// Configuration for the pipeline runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Stages in cascade order; the first one polls the exchange
    pub stages: Vec<StageConfig>,

    /// Per-call deadline for every exchange request
    pub call_timeout_ms: u64,

    /// Minimum 24h volume (reference asset) for the tradable universe
    pub min_usdt_volume: f64,

    /// Maximum bid/ask spread (percent) for the tradable universe
    pub max_spread_percent: f64,

    /// JSON cache of exchange-info pairs
    pub pairs_cache_path: String,

    /// Symbols seeded from historical klines when stores are empty (empty = off)
    pub bootstrap_symbols: Vec<String>,

    /// One-minute bars fetched per bootstrapped symbol
    pub bootstrap_lookback: usize,

    /// Master enable flag
    pub enabled: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `COINFLOW_DB_PATH` (default: coinflow.db)
    /// - `STAGE_INTERVALS` (default: 15s,1min,30min,1h,1d)
    /// - `STAGE_BUFFER_SIZES` (default: 60,1500,60,60,60)
    /// - `STAGE_DELAYS_MS` (default: 15000,15000,60000,60000,60000)
    /// - `STAGE_TRIGGERS` (default: movers,not_square_wave,always,always,always)
    /// - `STAGE_PERSIST_INTERVAL_MS` (default: 60000)
    /// - `SCREENED_APPEND` (default: true,false,false,false,false)
    /// - `SCREENED_ROLL` (default: 60,0,0,0,0)
    /// - `MOVERS_PRICE_PERCENT` (default: 1.0), `MOVERS_VOLUME_PERCENT` (default: 0.0)
    /// - `MIN_USDT_VOLUME` (default: 1000000), `MAX_SPREAD_PERCENT` (default: 0.1)
    /// - `EXCHANGE_CALL_TIMEOUT_MS` (default: 10000)
    /// - `PAIRS_CACHE_PATH` (default: exchange_info.json)
    /// - `BOOTSTRAP_SYMBOLS` (default: empty), `BOOTSTRAP_LOOKBACK` (default: 2880)
    /// - `ENABLE_PIPELINE` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let intervals: Vec<Interval> = split_var("STAGE_INTERVALS", "15s,1min,30min,1h,1d")
            .iter()
            .map(|s| {
                Interval::from_str(s)
                    .ok_or_else(|| ConfigError::InvalidValue(format!("STAGE_INTERVALS: unknown interval '{}'", s)))
            })
            .collect::<Result<_, _>>()?;
        let count = intervals.len();

        let price_percent: f64 = scalar_var("MOVERS_PRICE_PERCENT", 1.0)?;
        let volume_percent: f64 = scalar_var("MOVERS_VOLUME_PERCENT", 0.0)?;

        let buffer_sizes = list_var("STAGE_BUFFER_SIZES", "60,1500,60,60,60", count, |s| s.parse().ok())?;
        let delays = list_var("STAGE_DELAYS_MS", "15000,15000,60000,60000,60000", count, |s| s.parse().ok())?;
        let triggers = list_var(
            "STAGE_TRIGGERS",
            "movers,not_square_wave,always,always,always",
            count,
            |s| TriggerKind::from_str(s, price_percent, volume_percent),
        )?;
        let persist = list_var("STAGE_PERSIST_INTERVAL_MS", "60000", count, |s| s.parse().ok())?;
        let append = list_var("SCREENED_APPEND", "true,false,false,false,false", count, |s| s.parse().ok())?;
        let roll = list_var("SCREENED_ROLL", "60,0,0,0,0", count, |s| s.parse().ok())?;

        let stages = (0..count)
            .map(|i| StageConfig {
                interval: intervals[i],
                buffer_size: buffer_sizes[i],
                delay_ms: delays[i],
                trigger: triggers[i].clone(),
                append_screened: append[i],
                screened_roll: roll[i],
                recover_volumes: intervals[i] == Interval::Min1,
                persist_interval_ms: persist[i],
            })
            .collect();

        let config = Self {
            db_path: env::var("COINFLOW_DB_PATH").unwrap_or_else(|_| "coinflow.db".to_string()),
            stages,
            call_timeout_ms: scalar_var("EXCHANGE_CALL_TIMEOUT_MS", 10_000)?,
            min_usdt_volume: scalar_var("MIN_USDT_VOLUME", 1_000_000.0)?,
            max_spread_percent: scalar_var("MAX_SPREAD_PERCENT", 0.1)?,
            pairs_cache_path: env::var("PAIRS_CACHE_PATH").unwrap_or_else(|_| "exchange_info.json".to_string()),
            bootstrap_symbols: env::var("BOOTSTRAP_SYMBOLS")
                .map(|s| {
                    s.split(',')
                        .map(|v| v.trim().to_uppercase())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            bootstrap_lookback: scalar_var("BOOTSTRAP_LOOKBACK", 2_880)?,
            enabled: scalar_var("ENABLE_PIPELINE", true)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cascade ordering and buffer sizes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::InvalidValue("at least one stage is required".to_string()));
        }
        for pair in self.stages.windows(2) {
            if pair[1].interval <= pair[0].interval {
                return Err(ConfigError::InvalidValue(format!(
                    "stage intervals must increase: {} then {}",
                    pair[0].interval, pair[1].interval
                )));
            }
        }
        if let Some(stage) = self.stages.iter().find(|s| s.buffer_size < 2) {
            return Err(ConfigError::InvalidValue(format!(
                "buffer size for {} must be at least 2",
                stage.interval
            )));
        }
        Ok(())
    }
}

fn split_var(name: &str, default: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Per-stage list; a single value is broadcast to every stage
fn list_var<T, F>(name: &str, default: &str, count: usize, parse: F) -> Result<Vec<T>, ConfigError>
where
    T: Clone,
    F: Fn(&str) -> Option<T>,
{
    let raw = split_var(name, default);
    let values: Vec<T> = raw
        .iter()
        .map(|s| parse(s).ok_or_else(|| ConfigError::InvalidValue(format!("{}: cannot parse '{}'", name, s))))
        .collect::<Result<_, _>>()?;

    match values.len() {
        1 => Ok(vec![values[0].clone(); count]),
        n if n == count => Ok(values),
        n => Err(ConfigError::InvalidValue(format!(
            "{}: expected {} values (one per stage), got {}",
            name, count, n
        ))),
    }
}

pub(crate) fn scalar_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}: cannot parse '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "COINFLOW_DB_PATH",
        "STAGE_INTERVALS",
        "STAGE_BUFFER_SIZES",
        "STAGE_DELAYS_MS",
        "STAGE_TRIGGERS",
        "STAGE_PERSIST_INTERVAL_MS",
        "SCREENED_APPEND",
        "SCREENED_ROLL",
        "MIN_USDT_VOLUME",
        "ENABLE_PIPELINE",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    // Env vars are process-global, so every case runs inside one test
    #[test]
    fn test_config_from_env() {
        // Test: Default configuration when no env vars set
        clear();
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.db_path, "coinflow.db");
        assert_eq!(config.stages.len(), 5);
        assert_eq!(config.stages[0].interval, Interval::Sec15);
        assert_eq!(config.stages[1].buffer_size, 1_500);
        assert!(config.stages[1].recover_volumes);
        assert!(!config.stages[2].recover_volumes);
        assert!(config.stages[0].append_screened);
        assert_eq!(config.stages[0].screened_roll, 60);
        assert_eq!(
            config.stages[0].trigger,
            TriggerKind::Movers { price_percent: 1.0, volume_percent: 0.0 }
        );
        assert!(config.enabled);

        // Test: Custom cascade with broadcast values
        env::set_var("STAGE_INTERVALS", "1min,1h");
        env::set_var("STAGE_BUFFER_SIZES", "100");
        env::set_var("STAGE_DELAYS_MS", "1000,2000");
        env::set_var("STAGE_TRIGGERS", "always");
        env::set_var("SCREENED_APPEND", "false");
        env::set_var("SCREENED_ROLL", "0");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.stages.len(), 2);
        assert!(config.stages.iter().all(|s| s.buffer_size == 100));
        assert_eq!(config.stages[1].delay_ms, 2_000);

        // Test: Mismatched list length
        env::set_var("STAGE_DELAYS_MS", "1,2,3");
        assert!(matches!(PipelineConfig::from_env(), Err(ConfigError::InvalidValue(_))));
        env::set_var("STAGE_DELAYS_MS", "1000");

        // Test: Decreasing intervals rejected
        env::set_var("STAGE_INTERVALS", "1h,1min");
        assert!(PipelineConfig::from_env().is_err());

        // Test: Unparseable number rejected
        env::set_var("STAGE_INTERVALS", "1min");
        env::set_var("MIN_USDT_VOLUME", "lots");
        assert!(PipelineConfig::from_env().is_err());

        clear();
    }
}
