//! Exchange collaborator interface
//!
//! The cascade and the trader only talk to the exchange through the
//! `Exchange` trait. Shipped implementations:
//!
//! - `rest::BinanceRestClient` - public market data over HTTPS (no orders)
//! - `paper::PaperExchange` - simulated fills and balances on top of any market data source
//! - `timeout::TimeoutExchange` - per-call deadline decorator
//!
//! `pairs_cache` keeps the exchange-info pair list on disk between sessions.

pub mod pairs_cache;
pub mod paper;
pub mod rest;
pub mod timeout;

use crate::pipeline::interval::Interval;
use crate::pipeline::types::{Bar, TickSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Static trading rules for one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Price granularity
    pub tick_size: f64,
    /// Quantity granularity
    pub step_size: f64,
    /// Decimal places accepted for quote quantities
    pub quote_precision: u32,
}

/// Free balance of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Executed market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: OrderSide,
    /// Base quantity bought or sold
    pub executed_qty: f64,
    /// Quote quantity spent or received
    pub cumulative_quote_qty: f64,
    /// Average fill price
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    InsufficientBalance,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// Network or HTTP failure
    Transport(String),
    /// Call exceeded its deadline
    Timeout { operation: &'static str, millis: u64 },
    /// Response could not be decoded
    Decode(String),
    /// Exchange refused an order
    Rejected { kind: RejectionKind, message: String },
    /// Operation not offered by this implementation
    Unsupported(&'static str),
}

impl ExchangeError {
    /// Failures worth retrying on the next scheduled tick
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transport(_) | ExchangeError::Timeout { .. })
    }

    pub fn is_insufficient_balance(&self) -> bool {
        matches!(
            self,
            ExchangeError::Rejected {
                kind: RejectionKind::InsufficientBalance,
                ..
            }
        )
    }
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Transport(e) => write!(f, "Transport error: {}", e),
            ExchangeError::Timeout { operation, millis } => {
                write!(f, "{} timed out after {}ms", operation, millis)
            }
            ExchangeError::Decode(e) => write!(f, "Decode error: {}", e),
            ExchangeError::Rejected { kind, message } => {
                write!(f, "Order rejected ({:?}): {}", kind, message)
            }
            ExchangeError::Unsupported(op) => write!(f, "Unsupported operation: {}", op),
        }
    }
}

impl std::error::Error for ExchangeError {}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

/// Exchange operations used by the cascade and the trader
///
/// Reads are safe to retry. `create_market_order` is never retried blindly;
/// only the trader's tick-adjustment loop re-submits an order.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// 24h ticker statistics for every pair
    async fn get_ticker(&self) -> Result<Vec<TickSnapshot>, ExchangeError>;

    /// Tradable pairs with their price/quantity filters
    async fn get_exchange_info(&self) -> Result<Vec<Pair>, ExchangeError>;

    /// Most recent `lookback` closed bars for one symbol
    async fn get_historical_bars(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: usize,
    ) -> Result<Vec<Bar>, ExchangeError>;

    /// Market order sized in quote currency
    async fn create_market_order(
        &self,
        pair: &Pair,
        side: OrderSide,
        quote_qty: &str,
    ) -> Result<Fill, ExchangeError>;

    /// Free balances of every asset held
    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError>;
}
