//! End-to-end cascade tests against an in-memory market
//!
//! Two stages (15s raw, 1min cascaded) run as real tasks with millisecond
//! delays; the tests wait for the final stage's screened set, shut the
//! cascade down and check what reached SQLite.

use async_trait::async_trait;
use coinflow::conversion::{PriorityList, RoutingProfile};
use coinflow::exchange::{Balance, Exchange, ExchangeError, Fill, OrderSide, Pair};
use coinflow::pipeline::screen::LiquidityFilter;
use coinflow::pipeline::triggers::FnTrigger;
use coinflow::pipeline::{
    Bar, Interval, PipelineConfig, PipelineOrchestrator, SeriesStore, StageConfig, TickSnapshot, TriggerKind,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct MockMarket {
    tickers: Vec<TickSnapshot>,
    pairs: Vec<Pair>,
}

fn pair(base: &str, quote: &str) -> Pair {
    Pair {
        symbol: format!("{}{}", base, quote),
        base_asset: base.to_string(),
        quote_asset: quote.to_string(),
        tick_size: 0.01,
        step_size: 0.0001,
        quote_precision: 8,
    }
}

fn ticker(base: &str, quote: &str, close: f64, spread: f64) -> TickSnapshot {
    TickSnapshot {
        symbol: format!("{}{}", base, quote),
        base_asset: base.to_string(),
        quote_asset: quote.to_string(),
        open: close,
        high: close,
        low: close,
        close,
        rolling_base_volume: 1_000.0,
        rolling_quote_volume: 1_000.0 * close,
        bid_price: close - spread,
        bid_qty: 1.0,
        ask_price: close,
        ask_qty: 1.0,
        price_change_percent: 0.0,
        trade_count: 42,
        close_time: 1_700_000_000_000,
    }
}

impl MockMarket {
    fn new() -> Self {
        Self {
            tickers: vec![
                ticker("ETH", "USDT", 2_000.0, 0.1),
                ticker("BTC", "USDT", 30_000.0, 1.0),
                // 1% spread, never tradable
                ticker("DOGE", "USDT", 1.0, 0.01),
                // 1000 SHIB of volume is worth far less than 1M USDT
                ticker("SHIB", "USDT", 0.00001, 0.0),
            ],
            pairs: vec![pair("ETH", "USDT"), pair("BTC", "USDT"), pair("DOGE", "USDT"), pair("SHIB", "USDT")],
        }
    }
}

#[async_trait]
impl Exchange for MockMarket {
    async fn get_ticker(&self) -> Result<Vec<TickSnapshot>, ExchangeError> {
        Ok(self.tickers.clone())
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

fn stage(interval: Interval) -> StageConfig {
    StageConfig {
        interval,
        buffer_size: 60,
        delay_ms: 10,
        trigger: TriggerKind::Always,
        append_screened: false,
        screened_roll: 0,
        recover_volumes: false,
        persist_interval_ms: 0,
    }
}

fn config(db_path: &str) -> PipelineConfig {
    PipelineConfig {
        db_path: db_path.to_string(),
        stages: vec![stage(Interval::Sec15), stage(Interval::Min1)],
        call_timeout_ms: 1_000,
        min_usdt_volume: 1_000_000.0,
        max_spread_percent: 0.1,
        pairs_cache_path: String::new(),
        bootstrap_symbols: Vec::new(),
        bootstrap_lookback: 0,
        enabled: true,
    }
}

fn liquidity() -> LiquidityFilter {
    LiquidityFilter {
        min_reference_volume: 1_000_000.0,
        max_spread_percent: 0.1,
        reference_asset: "USDT".to_string(),
        priority: PriorityList::from_profile(RoutingProfile::Accuracy),
    }
}

#[tokio::test]
async fn test_cascade_screens_liquid_symbols_and_persists() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("coinflow.db");
    let config = config(db_path.to_str().unwrap());
    let market = Arc::new(MockMarket::new());
    let pairs = Arc::new(market.pairs.clone());
    let store = SeriesStore::open(&config.db_path).unwrap();

    let handle = PipelineOrchestrator::new(&config, market, pairs, store.clone(), liquidity()).start();
    assert_eq!(handle.stage_count(), 2);

    let mut final_output = handle.final_output();
    let screened = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(output) = final_output.peek() {
                if !output.screened.is_empty() {
                    return output.screened.clone();
                }
            }
            if !final_output.changed().await {
                panic!("final stage closed before screening");
            }
        }
    })
    .await
    .expect("final stage never screened");

    let mut symbols = screened.symbols();
    symbols.sort();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

    handle.shutdown().await.unwrap();

    let minute_bars = store.load_bars(Interval::Min1).unwrap();
    assert!(minute_bars.iter().any(|b| b.symbol == "ETHUSDT"));
    assert!(minute_bars.iter().all(|b| b.timestamp % 60 == 0));
    // Unchanged trade counter on every poll: one raw row per symbol
    let raw = store.load_bars(Interval::Sec15).unwrap();
    assert_eq!(raw.iter().filter(|b| b.symbol == "ETHUSDT").count(), 1);

    let persisted = store.load_screened(Interval::Min1).unwrap();
    assert!(persisted.contains_symbol("ETHUSDT"));
}

#[tokio::test]
async fn test_custom_trigger_narrows_downstream_set() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("coinflow.db");
    let config = config(db_path.to_str().unwrap());
    let market = Arc::new(MockMarket::new());
    let pairs = Arc::new(market.pairs.clone());
    let store = SeriesStore::open(&config.db_path).unwrap();

    let not_btc = FnTrigger::new("not_btc", |series: &[Bar]| {
        series.last().map_or(false, |b| b.symbol != "BTCUSDT")
    });
    let handle = PipelineOrchestrator::new(&config, market, pairs, store.clone(), liquidity())
        .with_trigger(Interval::Min1, Arc::new(not_btc))
        .start();

    let mut final_output = handle.final_output();
    let screened = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(output) = final_output.peek() {
                if !output.screened.is_empty() {
                    return output.screened.clone();
                }
            }
            if !final_output.changed().await {
                panic!("final stage closed before screening");
            }
        }
    })
    .await
    .expect("final stage never screened");

    assert_eq!(screened.symbols(), vec!["ETHUSDT"]);
    handle.shutdown().await.unwrap();
}
