//! Routing priority profiles
//!
//! BFS over the pair graph finds many equally short paths. The profile
//! decides which intermediate assets are explored first:
//!
//! - `accuracy` - deepest books first (BTC, ETH, BNB, USDT, BUSD)
//! - `fees` - fee-discount asset first (BNB, BTC, ETH, USDT, BUSD)
//! - `wallet_size` - stablecoins first (USDT, BUSD, BTC, ETH, BNB)

use std::env;

/// Named routing profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingProfile {
    Accuracy,
    Fees,
    WalletSize,
}

impl RoutingProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingProfile::Accuracy => "accuracy",
            RoutingProfile::Fees => "fees",
            RoutingProfile::WalletSize => "wallet_size",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "accuracy" => Some(RoutingProfile::Accuracy),
            "fees" => Some(RoutingProfile::Fees),
            "wallet_size" => Some(RoutingProfile::WalletSize),
            _ => None,
        }
    }

    /// Built-in asset order for this profile
    pub fn default_assets(&self) -> &'static [&'static str] {
        match self {
            RoutingProfile::Accuracy => &["BTC", "ETH", "BNB", "USDT", "BUSD"],
            RoutingProfile::Fees => &["BNB", "BTC", "ETH", "USDT", "BUSD"],
            RoutingProfile::WalletSize => &["USDT", "BUSD", "BTC", "ETH", "BNB"],
        }
    }
}

/// Ordered list of preferred intermediate assets
///
/// Assets not in the list rank after every listed asset and are then
/// ordered alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PriorityList {
    assets: Vec<String>,
}

impl PriorityList {
    pub fn new<I, S>(assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            assets: assets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_profile(profile: RoutingProfile) -> Self {
        Self::new(profile.default_assets().iter().copied())
    }

    /// Sort key for neighbor expansion
    pub fn rank(&self, asset: &str) -> (usize, String) {
        let index = self
            .assets
            .iter()
            .position(|a| a == asset)
            .unwrap_or(usize::MAX);
        (index, asset.to_string())
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }
}

/// Routing configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Active profile
    pub profile: RoutingProfile,

    /// Priority list for the active profile (built-in or overridden)
    pub priority: PriorityList,

    /// Asset used to value wallets and volumes
    pub reference_asset: String,
}

impl RoutingConfig {
    /// Load routing configuration from environment variables
    ///
    /// Environment variables:
    /// - `ROUTING_PROFILE` (default: accuracy)
    /// - `ROUTING_PRIORITY_ACCURACY` / `ROUTING_PRIORITY_FEES` / `ROUTING_PRIORITY_WALLET_SIZE`
    ///   comma-separated override for the matching profile
    /// - `REFERENCE_ASSET` (default: USDT)
    pub fn from_env() -> Self {
        let profile = env::var("ROUTING_PROFILE")
            .ok()
            .and_then(|s| RoutingProfile::from_str(&s))
            .unwrap_or(RoutingProfile::Accuracy);

        let override_var = format!("ROUTING_PRIORITY_{}", profile.as_str().to_uppercase());
        let priority = env::var(&override_var)
            .ok()
            .map(|s| {
                PriorityList::new(
                    s.split(',')
                        .map(|a| a.trim().to_uppercase())
                        .filter(|a| !a.is_empty()),
                )
            })
            .unwrap_or_else(|| PriorityList::from_profile(profile));

        Self {
            profile,
            priority,
            reference_asset: env::var("REFERENCE_ASSET").unwrap_or_else(|_| "USDT".to_string()),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            profile: RoutingProfile::Accuracy,
            priority: PriorityList::from_profile(RoutingProfile::Accuracy),
            reference_asset: "USDT".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_listed_before_unlisted() {
        let priority = PriorityList::from_profile(RoutingProfile::Accuracy);
        let mut assets = vec!["ADA", "USDT", "BTC", "AAVE"];
        assets.sort_by_key(|a| priority.rank(a));
        assert_eq!(assets, vec!["BTC", "USDT", "AAVE", "ADA"]);
    }

    #[test]
    fn test_routing_config_from_env() {
        env::remove_var("ROUTING_PROFILE");
        env::remove_var("ROUTING_PRIORITY_FEES");
        env::remove_var("REFERENCE_ASSET");
        let config = RoutingConfig::from_env();
        assert_eq!(config.profile, RoutingProfile::Accuracy);
        assert_eq!(config.reference_asset, "USDT");

        env::set_var("ROUTING_PROFILE", "fees");
        env::set_var("ROUTING_PRIORITY_FEES", "bnb, eth");
        let config = RoutingConfig::from_env();
        assert_eq!(config.profile, RoutingProfile::Fees);
        assert_eq!(config.priority.assets(), &["BNB".to_string(), "ETH".to_string()]);

        env::remove_var("ROUTING_PROFILE");
        env::remove_var("ROUTING_PRIORITY_FEES");
    }
}
