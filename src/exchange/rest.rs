//! Binance public market-data client
//!
//! Endpoints (no API key required):
//! - `GET /api/v3/ticker/24hr` - rolling 24h statistics for every symbol
//! - `GET /api/v3/exchangeInfo` - symbols with PRICE_FILTER / LOT_SIZE filters
//! - `GET /api/v3/klines` - historical candles, at most 1000 per request
//!
//! Orders and balances need signed requests and are not offered here; wrap
//! this client in `PaperExchange` to trade against live prices.

use super::{Balance, Exchange, ExchangeError, Fill, OrderSide, Pair};
use crate::pipeline::interval::Interval;
use crate::pipeline::types::{Bar, TickSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

const KLINES_PAGE_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
struct RawTicker {
    symbol: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    #[serde(rename = "openPrice")]
    open_price: String,
    #[serde(rename = "highPrice")]
    high_price: String,
    #[serde(rename = "lowPrice")]
    low_price: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    volume: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "bidQty")]
    bid_qty: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
    #[serde(rename = "askQty")]
    ask_qty: String,
    #[serde(rename = "closeTime")]
    close_time: i64,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
struct RawSymbol {
    symbol: String,
    status: String,
    #[serde(rename = "baseAsset")]
    base_asset: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    #[serde(rename = "quotePrecision")]
    quote_precision: u32,
    #[serde(rename = "isSpotTradingAllowed", default)]
    is_spot_trading_allowed: bool,
    #[serde(rename = "quoteOrderQtyMarketAllowed", default)]
    quote_order_qty_market_allowed: bool,
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
}

/// [open time, open, high, low, close, volume, close time, quote volume, trades, ...]
type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
);

/// Unauthenticated REST client for market data
pub struct BinanceRestClient {
    client: reqwest::Client,
    base_url: String,
    /// symbol -> (base asset, quote asset), filled by `get_exchange_info`
    assets: RwLock<HashMap<String, (String, String)>>,
}

impl BinanceRestClient {
    pub fn new(base_url: &str) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            assets: RwLock::new(HashMap::new()),
        })
    }

    /// Seed the symbol → asset map from cached pairs
    pub async fn register_pairs(&self, pairs: &[Pair]) {
        let mut assets = self.assets.write().await;
        for pair in pairs {
            assets.insert(pair.symbol.clone(), (pair.base_asset.clone(), pair.quote_asset.clone()));
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Transport(format!("{} returned {}: {}", path, status, body)));
        }

        Ok(response.json().await?)
    }
}

fn num(field: &str, raw: &str) -> Result<f64, ExchangeError> {
    raw.parse()
        .map_err(|_| ExchangeError::Decode(format!("{}: not a number: '{}'", field, raw)))
}

fn parse_ticker(raw: RawTicker, base: &str, quote: &str) -> Result<TickSnapshot, ExchangeError> {
    Ok(TickSnapshot {
        base_asset: base.to_string(),
        quote_asset: quote.to_string(),
        open: num("openPrice", &raw.open_price)?,
        high: num("highPrice", &raw.high_price)?,
        low: num("lowPrice", &raw.low_price)?,
        close: num("lastPrice", &raw.last_price)?,
        rolling_base_volume: num("volume", &raw.volume)?,
        rolling_quote_volume: num("quoteVolume", &raw.quote_volume)?,
        bid_price: num("bidPrice", &raw.bid_price)?,
        bid_qty: num("bidQty", &raw.bid_qty)?,
        ask_price: num("askPrice", &raw.ask_price)?,
        ask_qty: num("askQty", &raw.ask_qty)?,
        price_change_percent: num("priceChangePercent", &raw.price_change_percent)?,
        trade_count: raw.count,
        close_time: raw.close_time,
        symbol: raw.symbol,
    })
}

fn parse_pair(raw: RawSymbol) -> Option<Pair> {
    if raw.status != "TRADING" || !raw.is_spot_trading_allowed || !raw.quote_order_qty_market_allowed {
        return None;
    }
    let filter = |kind: &str| raw.filters.iter().find(|f| f.filter_type == kind);
    let tick_size = filter("PRICE_FILTER")?.tick_size.as_deref()?.parse().ok()?;
    let step_size = filter("LOT_SIZE")?.step_size.as_deref()?.parse().ok()?;

    Some(Pair {
        symbol: raw.symbol,
        base_asset: raw.base_asset,
        quote_asset: raw.quote_asset,
        tick_size,
        step_size,
        quote_precision: raw.quote_precision,
    })
}

fn parse_kline(symbol: &str, raw: RawKline) -> Result<Bar, ExchangeError> {
    Ok(Bar {
        symbol: symbol.to_string(),
        timestamp: raw.0 / 1_000,
        open: num("open", &raw.1)?,
        high: num("high", &raw.2)?,
        low: num("low", &raw.3)?,
        close: num("close", &raw.4)?,
        base_volume: num("volume", &raw.5)?,
        quote_volume: num("quoteVolume", &raw.7)?,
        rolling_base_volume: f64::NAN,
        rolling_quote_volume: f64::NAN,
        trade_count: raw.8,
    })
}

#[async_trait]
impl Exchange for BinanceRestClient {
    async fn get_ticker(&self) -> Result<Vec<TickSnapshot>, ExchangeError> {
        if self.assets.read().await.is_empty() {
            self.get_exchange_info().await?;
        }

        let raw: Vec<RawTicker> = self.get_json("/api/v3/ticker/24hr", &[]).await?;
        let assets = self.assets.read().await;

        let mut ticks = Vec::with_capacity(assets.len());
        for ticker in raw {
            // Tickers for delisted or non-spot symbols are not in the pair map
            let Some((base, quote)) = assets.get(&ticker.symbol) else {
                continue;
            };
            ticks.push(parse_ticker(ticker, base, quote)?);
        }
        ticks.sort_by_key(|t| t.close_time);

        log::debug!("📡 Ticker poll: {} symbols", ticks.len());
        Ok(ticks)
    }

    async fn get_exchange_info(&self) -> Result<Vec<Pair>, ExchangeError> {
        let raw: RawExchangeInfo = self.get_json("/api/v3/exchangeInfo", &[]).await?;
        let pairs: Vec<Pair> = raw.symbols.into_iter().filter_map(parse_pair).collect();

        self.register_pairs(&pairs).await;
        log::info!("✅ Exchange info: {} tradable pairs", pairs.len());
        Ok(pairs)
    }

    async fn get_historical_bars(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let mut bars: Vec<Bar> = Vec::with_capacity(lookback);
        let mut end_time: Option<i64> = None;

        while bars.len() < lookback {
            let limit = (lookback - bars.len()).min(KLINES_PAGE_LIMIT);
            let mut query = vec![
                ("symbol", symbol.to_string()),
                ("interval", interval.kline_label().to_string()),
                ("limit", limit.to_string()),
            ];
            if let Some(end) = end_time {
                query.push(("endTime", end.to_string()));
            }

            let page: Vec<RawKline> = self.get_json("/api/v3/klines", &query).await?;
            let Some(first_open) = page.first().map(|k| k.0) else {
                break;
            };
            let fetched = page.len();
            let mut parsed = page
                .into_iter()
                .map(|k| parse_kline(symbol, k))
                .collect::<Result<Vec<_>, _>>()?;
            parsed.append(&mut bars);
            bars = parsed;

            if fetched < limit {
                break;
            }
            end_time = Some(first_open - 1);
        }

        Ok(bars)
    }

    async fn create_market_order(
        &self,
        _pair: &Pair,
        _side: OrderSide,
        _quote_qty: &str,
    ) -> Result<Fill, ExchangeError> {
        Err(ExchangeError::Unsupported("create_market_order requires an authenticated client"))
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        Err(ExchangeError::Unsupported("get_balances requires an authenticated client"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair_filters() {
        let raw: RawExchangeInfo = serde_json::from_str(
            r#"{"symbols": [
                {"symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "BTC",
                 "quotePrecision": 8, "isSpotTradingAllowed": true, "quoteOrderQtyMarketAllowed": true,
                 "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.00001", "tickSize": "0.00001"},
                    {"filterType": "LOT_SIZE", "minQty": "0.0001", "stepSize": "0.0001"}
                 ]},
                {"symbol": "OLDBTC", "status": "BREAK", "baseAsset": "OLD", "quoteAsset": "BTC",
                 "quotePrecision": 8, "isSpotTradingAllowed": true, "quoteOrderQtyMarketAllowed": true,
                 "filters": []}
            ]}"#,
        )
        .unwrap();

        let pairs: Vec<Pair> = raw.symbols.into_iter().filter_map(parse_pair).collect();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].symbol, "ETHBTC");
        assert_eq!(pairs[0].tick_size, 0.00001);
        assert_eq!(pairs[0].step_size, 0.0001);
    }

    #[test]
    fn test_parse_ticker_and_kline() {
        let raw: RawTicker = serde_json::from_str(
            r#"{"symbol": "ETHBTC", "priceChange": "0.1", "priceChangePercent": "1.5",
                "weightedAvgPrice": "0.05", "prevClosePrice": "0.05", "lastPrice": "0.051",
                "lastQty": "1", "bidPrice": "0.0509", "bidQty": "3", "askPrice": "0.051",
                "askQty": "4", "openPrice": "0.05", "highPrice": "0.052", "lowPrice": "0.049",
                "volume": "1000", "quoteVolume": "50", "openTime": 0, "closeTime": 86400000,
                "firstId": 1, "lastId": 500, "count": 500}"#,
        )
        .unwrap();
        let tick = parse_ticker(raw, "ETH", "BTC").unwrap();
        assert_eq!(tick.close, 0.051);
        assert_eq!(tick.trade_count, 500);
        assert_eq!(tick.base_asset, "ETH");

        let kline: RawKline = serde_json::from_str(
            r#"[1700000040000, "1.0", "2.0", "0.5", "1.5", "10", 1700000099999, "15", 7, "5", "7.5", "0"]"#,
        )
        .unwrap();
        let bar = parse_kline("ETHBTC", kline).unwrap();
        assert_eq!(bar.timestamp, 1_700_000_040);
        assert_eq!(bar.quote_volume, 15.0);
        assert!(bar.rolling_base_volume.is_nan());
    }
}
