//! Paper trading exchange with simulated fills
//!
//! Market data (tickers, exchange info, klines) is delegated to a real
//! source; market orders fill instantly at the last seen close, pay a fee
//! in the received asset, and move in-memory balances. Orders larger than
//! the available balance are rejected as insufficient balance, like the
//! live exchange does.
//!
//! ## Limitations
//!
//! - No slippage or market impact
//! - No partial fills

use super::{Balance, Exchange, ExchangeError, Fill, OrderSide, Pair, RejectionKind};
use crate::pipeline::config::{scalar_var, ConfigError};
use crate::pipeline::interval::Interval;
use crate::pipeline::types::{Bar, TickSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Configuration for the paper exchange
#[derive(Debug, Clone, PartialEq)]
pub struct PaperConfig {
    /// Starting balances
    pub balances: Vec<Balance>,
    /// Fee rate (e.g., 0.001 for 0.1%)
    pub fee_rate: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            balances: vec![Balance {
                asset: "USDT".to_string(),
                free: 1_000.0,
            }],
            fee_rate: 0.001,
        }
    }
}

impl PaperConfig {
    /// Load paper settings from environment variables
    ///
    /// Environment variables:
    /// - `PAPER_BALANCES` (default: USDT:1000) comma-separated ASSET:AMOUNT
    /// - `PAPER_FEE_RATE` (default: 0.001)
    pub fn from_env() -> Result<Self, ConfigError> {
        let balances = match env::var("PAPER_BALANCES") {
            Ok(raw) => parse_balances(&raw)?,
            Err(_) => Self::default().balances,
        };
        Ok(Self {
            balances,
            fee_rate: scalar_var("PAPER_FEE_RATE", 0.001)?,
        })
    }
}

fn parse_balances(raw: &str) -> Result<Vec<Balance>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (asset, amount) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidValue(format!("PAPER_BALANCES: expected ASSET:AMOUNT, got '{}'", entry)))?;
            let free = amount
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("PAPER_BALANCES: bad amount '{}'", amount)))?;
            Ok(Balance {
                asset: asset.trim().to_uppercase(),
                free,
            })
        })
        .collect()
}

/// Simulated exchange on top of a live market-data source
pub struct PaperExchange {
    market: Arc<dyn Exchange>,
    fee_rate: f64,
    balances: Mutex<HashMap<String, f64>>,
    /// Last close per symbol from the most recent ticker poll
    last_prices: RwLock<HashMap<String, f64>>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn Exchange>, config: PaperConfig) -> Self {
        let balances = config.balances.into_iter().map(|b| (b.asset, b.free)).collect();
        Self {
            market,
            fee_rate: config.fee_rate,
            balances: Mutex::new(balances),
            last_prices: RwLock::new(HashMap::new()),
        }
    }

    async fn remember_prices(&self, ticks: &[TickSnapshot]) {
        let mut prices = self.last_prices.write().await;
        for tick in ticks {
            prices.insert(tick.symbol.clone(), tick.close);
        }
    }

    async fn fill_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        if let Some(price) = self.last_prices.read().await.get(symbol).copied() {
            return Ok(price);
        }
        self.get_ticker().await?;
        self.last_prices
            .read()
            .await
            .get(symbol)
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ExchangeError::Rejected {
                kind: RejectionKind::Other,
                message: format!("Invalid symbol: {}", symbol),
            })
    }
}

fn insufficient(asset: &str, needed: f64, available: f64) -> ExchangeError {
    ExchangeError::Rejected {
        kind: RejectionKind::InsufficientBalance,
        message: format!(
            "Account has insufficient balance for requested action ({} needed {}, free {})",
            asset, needed, available
        ),
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_ticker(&self) -> Result<Vec<TickSnapshot>, ExchangeError> {
        let ticks = self.market.get_ticker().await?;
        self.remember_prices(&ticks).await;
        Ok(ticks)
    }

    async fn get_exchange_info(&self) -> Result<Vec<Pair>, ExchangeError> {
        self.market.get_exchange_info().await
    }

    async fn get_historical_bars(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        self.market.get_historical_bars(symbol, interval, lookback).await
    }

    async fn create_market_order(
        &self,
        pair: &Pair,
        side: OrderSide,
        quote_qty: &str,
    ) -> Result<Fill, ExchangeError> {
        let quote: f64 = quote_qty.parse().map_err(|_| ExchangeError::Rejected {
            kind: RejectionKind::Other,
            message: format!("Illegal quantity: '{}'", quote_qty),
        })?;
        if !(quote > 0.0) {
            return Err(ExchangeError::Rejected {
                kind: RejectionKind::Other,
                message: format!("Quantity must be positive: {}", quote_qty),
            });
        }
        let price = self.fill_price(&pair.symbol).await?;

        let mut balances = self.balances.lock().await;
        let fill = match side {
            OrderSide::Buy => {
                let available = balances.get(&pair.quote_asset).copied().unwrap_or(0.0);
                if quote > available {
                    return Err(insufficient(&pair.quote_asset, quote, available));
                }
                let received = quote / price * (1.0 - self.fee_rate);
                *balances.entry(pair.quote_asset.clone()).or_insert(0.0) -= quote;
                *balances.entry(pair.base_asset.clone()).or_insert(0.0) += received;
                Fill {
                    symbol: pair.symbol.clone(),
                    side,
                    executed_qty: received,
                    cumulative_quote_qty: quote,
                    price,
                }
            }
            OrderSide::Sell => {
                let base_needed = quote / price;
                let available = balances.get(&pair.base_asset).copied().unwrap_or(0.0);
                if base_needed > available {
                    return Err(insufficient(&pair.base_asset, base_needed, available));
                }
                let received = quote * (1.0 - self.fee_rate);
                *balances.entry(pair.base_asset.clone()).or_insert(0.0) -= base_needed;
                *balances.entry(pair.quote_asset.clone()).or_insert(0.0) += received;
                Fill {
                    symbol: pair.symbol.clone(),
                    side,
                    executed_qty: base_needed,
                    cumulative_quote_qty: received,
                    price,
                }
            }
        };
        balances.retain(|_, free| *free > 0.0);

        log::info!(
            "📝 Paper {} {} @ {}: base {:.8}, quote {:.8}",
            fill.side.as_str(),
            fill.symbol,
            fill.price,
            fill.executed_qty,
            fill.cumulative_quote_qty
        );
        Ok(fill)
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let balances = self.balances.lock().await;
        let mut out: Vec<Balance> = balances
            .iter()
            .map(|(asset, free)| Balance {
                asset: asset.clone(),
                free: *free,
            })
            .collect();
        out.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::conversion::graph::tests::{pair, ticker};

    /// Fixed market data for unit tests
    pub(crate) struct StaticMarket {
        tickers: std::sync::Mutex<Vec<TickSnapshot>>,
        pairs: Vec<Pair>,
    }

    impl StaticMarket {
        pub(crate) fn new(tickers: Vec<TickSnapshot>, pairs: Vec<Pair>) -> Self {
            Self {
                tickers: std::sync::Mutex::new(tickers),
                pairs,
            }
        }

        pub(crate) fn set_tickers(&self, tickers: Vec<TickSnapshot>) {
            *self.tickers.lock().unwrap() = tickers;
        }
    }

    #[async_trait]
    impl Exchange for StaticMarket {
        async fn get_ticker(&self) -> Result<Vec<TickSnapshot>, ExchangeError> {
            Ok(self.tickers.lock().unwrap().clone())
        }

        async fn get_exchange_info(&self) -> Result<Vec<Pair>, ExchangeError> {
            Ok(self.pairs.clone())
        }

        async fn get_historical_bars(&self, _: &str, _: Interval, _: usize) -> Result<Vec<Bar>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn create_market_order(&self, _: &Pair, _: OrderSide, _: &str) -> Result<Fill, ExchangeError> {
            Err(ExchangeError::Unsupported("create_market_order"))
        }

        async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
            Ok(Vec::new())
        }
    }

    fn paper(balances: &[(&str, f64)]) -> PaperExchange {
        let market = StaticMarket::new(vec![ticker("ETHUSDT", 2_000.0)], vec![pair("ETH", "USDT")]);
        PaperExchange::new(
            Arc::new(market),
            PaperConfig {
                balances: balances
                    .iter()
                    .map(|(a, f)| Balance { asset: a.to_string(), free: *f })
                    .collect(),
                fee_rate: 0.0,
            },
        )
    }

    #[tokio::test]
    async fn test_buy_then_sell_moves_balances() {
        let exchange = paper(&[("USDT", 1_000.0)]);
        let eth_usdt = pair("ETH", "USDT");

        let buy = exchange.create_market_order(&eth_usdt, OrderSide::Buy, "500").await.unwrap();
        assert_eq!(buy.executed_qty, 0.25);

        let sell = exchange.create_market_order(&eth_usdt, OrderSide::Sell, "200").await.unwrap();
        assert_eq!(sell.cumulative_quote_qty, 200.0);

        let balances = exchange.get_balances().await.unwrap();
        assert_eq!(balances[0].asset, "ETH");
        assert!((balances[0].free - 0.15).abs() < 1e-12);
        assert_eq!(balances[1].free, 700.0);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_rejected() {
        let exchange = paper(&[("USDT", 10.0)]);

        let err = exchange
            .create_market_order(&pair("ETH", "USDT"), OrderSide::Buy, "10.5")
            .await
            .unwrap_err();

        assert!(err.is_insufficient_balance());
        assert_eq!(exchange.get_balances().await.unwrap()[0].free, 10.0);
    }

    #[test]
    fn test_parse_balances() {
        let parsed = parse_balances("usdt:100, BTC:0.5").unwrap();
        assert_eq!(parsed[0], Balance { asset: "USDT".to_string(), free: 100.0 });
        assert_eq!(parsed[1].free, 0.5);
        assert!(parse_balances("USDT").is_err());
    }
}
