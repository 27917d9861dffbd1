//! Core data structures flowing through the aggregation cascade
//!
//! - `TickSnapshot` - one exchange ticker row per pair per poll
//! - `Bar` - one OHLCV row per (symbol, timestamp) at a fixed interval
//! - `ScreenedEntry` / `ScreenedSet` - symbols that passed a stage trigger

use serde::{Deserialize, Serialize};

/// 24h ticker statistics for a single pair, as returned by a ticker poll
///
/// Immutable once fetched. `rolling_*_volume` are the exchange's trailing
/// 24h cumulative volumes, not per-bar volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub rolling_base_volume: f64,
    pub rolling_quote_volume: f64,
    pub bid_price: f64,
    pub bid_qty: f64,
    pub ask_price: f64,
    pub ask_qty: f64,
    pub price_change_percent: f64,
    /// Exchange trade counter; unchanged counter means unchanged ticker
    pub trade_count: u64,
    /// Close time in milliseconds since epoch
    pub close_time: i64,
}

impl TickSnapshot {
    /// Bid/ask spread as a percentage of the ask price
    pub fn spread_percent(&self) -> f64 {
        if self.ask_price <= 0.0 {
            return f64::INFINITY;
        }
        (self.ask_price - self.bid_price) / self.ask_price * 100.0
    }
}

/// One OHLCV record for a symbol at a given interval
///
/// `timestamp` is in seconds and marks the start of the bucket (raw ticks
/// keep their poll time until the first resample).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    pub rolling_base_volume: f64,
    pub rolling_quote_volume: f64,
    pub trade_count: u64,
}

impl Bar {
    /// Convert a ticker poll into a single-row raw bar
    ///
    /// A raw tick has no intra-bar range, so OHLC collapse to the close and
    /// the bar volume starts out as the rolling volume reported by the exchange.
    pub fn from_tick(tick: &TickSnapshot, timestamp: i64) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timestamp,
            open: tick.close,
            high: tick.close,
            low: tick.close,
            close: tick.close,
            base_volume: tick.rolling_base_volume,
            quote_volume: tick.rolling_quote_volume,
            rolling_base_volume: tick.rolling_base_volume,
            rolling_quote_volume: tick.rolling_quote_volume,
            trade_count: tick.trade_count,
        }
    }

    /// Bit-exact row identity used for derived-series dedup
    pub(crate) fn identity(&self) -> RowKey {
        RowKey {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            values: [
                self.open.to_bits(),
                self.high.to_bits(),
                self.low.to_bits(),
                self.close.to_bits(),
                self.base_volume.to_bits(),
                self.quote_volume.to_bits(),
                self.rolling_base_volume.to_bits(),
                self.rolling_quote_volume.to_bits(),
            ],
            trade_count: self.trade_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RowKey {
    symbol: String,
    timestamp: i64,
    values: [u64; 8],
    trade_count: u64,
}

/// Summary of a symbol that passed a stage trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedEntry {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub close: f64,
    /// Absolute percent change of close across the last two bars
    pub last_price_move: f64,
    /// Percent change of rolling base volume across the last two bars
    pub last_volume_move: f64,
    /// Base-asset 24h volume expressed in the reference asset
    pub rolling_usdt_volume: f64,
    pub timestamp: i64,
}

/// Ordered set of screened symbols for one interval
///
/// Order is meaningful: downstream stages and the trader walk it front to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenedSet {
    pub entries: Vec<ScreenedEntry>,
}

impl ScreenedSet {
    pub fn new(entries: Vec<ScreenedEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.entries.iter().any(|e| e.symbol == symbol)
    }

    pub fn contains_base_asset(&self, asset: &str) -> bool {
        self.entries.iter().any(|e| e.base_asset == asset)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.symbol.clone()).collect()
    }
}
