use crate::pipeline::config::{scalar_var, ConfigError};
use std::env;

/// Risk and rotation settings for the trader
#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    /// Asset parked in when nothing is buyable or a risk limit is hit
    pub stable_asset: String,

    /// Gain (percent) over the purchase price that counts as take-profit
    pub take_profit_percent: f64,

    /// Loss (percent) under the purchase price that counts as stop-loss
    pub stop_loss_percent: f64,

    /// Take-profit hits after which an asset is no longer bought
    pub take_profit_count: u32,

    /// Stop-loss hits after which an asset is no longer bought
    pub stop_loss_count: u32,

    /// Blacklist entries older than this are evicted
    pub blacklist_retention_secs: i64,

    /// Delay between trader iterations
    pub poll_delay_ms: u64,

    /// Upper bound for the doubling tick adjustment of one order
    pub max_tick_adjustment: u32,

    /// Upper bound for restarts of one rotation
    pub max_rotation_attempts: u32,

    /// Whether the runtime starts the trader at all
    pub enabled: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stable_asset: "USDT".to_string(),
            take_profit_percent: 5.0,
            stop_loss_percent: 2.0,
            take_profit_count: 2,
            stop_loss_count: 1,
            blacklist_retention_secs: 900,
            poll_delay_ms: 15_000,
            max_tick_adjustment: 64,
            max_rotation_attempts: 3,
            enabled: false,
        }
    }
}

impl RiskConfig {
    /// Load risk configuration from environment variables
    ///
    /// Environment variables:
    /// - `STABLE_ASSET` (default: USDT)
    /// - `TAKE_PROFIT_PERCENT` (default: 5.0)
    /// - `STOP_LOSS_PERCENT` (default: 2.0)
    /// - `TAKE_PROFIT_COUNT` (default: 2)
    /// - `STOP_LOSS_COUNT` (default: 1)
    /// - `BLACKLIST_RETENTION_SECS` (default: 900)
    /// - `TRADER_POLL_DELAY_MS` (default: 15000)
    /// - `MAX_TICK_ADJUSTMENT` (default: 64)
    /// - `MAX_ROTATION_ATTEMPTS` (default: 3)
    /// - `ENABLE_TRADER` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            stable_asset: env::var("STABLE_ASSET")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.stable_asset),
            take_profit_percent: scalar_var("TAKE_PROFIT_PERCENT", defaults.take_profit_percent)?,
            stop_loss_percent: scalar_var("STOP_LOSS_PERCENT", defaults.stop_loss_percent)?,
            take_profit_count: scalar_var("TAKE_PROFIT_COUNT", defaults.take_profit_count)?,
            stop_loss_count: scalar_var("STOP_LOSS_COUNT", defaults.stop_loss_count)?,
            blacklist_retention_secs: scalar_var("BLACKLIST_RETENTION_SECS", defaults.blacklist_retention_secs)?,
            poll_delay_ms: scalar_var("TRADER_POLL_DELAY_MS", defaults.poll_delay_ms)?,
            max_tick_adjustment: scalar_var("MAX_TICK_ADJUSTMENT", defaults.max_tick_adjustment)?,
            max_rotation_attempts: scalar_var("MAX_ROTATION_ATTEMPTS", defaults.max_rotation_attempts)?,
            enabled: scalar_var("ENABLE_TRADER", defaults.enabled)?,
        };

        if config.stable_asset.is_empty() {
            return Err(ConfigError::InvalidValue("STABLE_ASSET must not be empty".to_string()));
        }
        if config.max_rotation_attempts == 0 {
            return Err(ConfigError::InvalidValue("MAX_ROTATION_ATTEMPTS must be at least 1".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_config_from_env() {
        env::remove_var("TAKE_PROFIT_PERCENT");
        env::remove_var("MAX_ROTATION_ATTEMPTS");
        env::set_var("STABLE_ASSET", "busd");

        let config = RiskConfig::from_env().unwrap();
        assert_eq!(config.stable_asset, "BUSD");
        assert_eq!(config.take_profit_percent, 5.0);
        assert_eq!(config.stop_loss_count, 1);

        env::set_var("MAX_ROTATION_ATTEMPTS", "0");
        assert!(RiskConfig::from_env().is_err());

        env::set_var("MAX_ROTATION_ATTEMPTS", "many");
        assert!(matches!(RiskConfig::from_env(), Err(ConfigError::InvalidValue(_))));

        env::remove_var("MAX_ROTATION_ATTEMPTS");
        env::remove_var("STABLE_ASSET");
    }
}
