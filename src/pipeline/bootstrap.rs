//! History bootstrap for empty stores
//!
//! A fresh database leaves every cascaded stage without history, so slow
//! intervals (1h, 1d) would need days of polling before screening means
//! anything. When enabled, stages whose store is empty are seeded from
//! one-minute klines: rolling 24h volumes are rebuilt as a trailing
//! 1440-bar sum, then the minute series is resampled and trimmed per stage.

use super::config::StageConfig;
use super::interval::Interval;
use super::series::{resample, trim};
use super::stage::StageError;
use super::store::SeriesStore;
use super::types::Bar;
use crate::exchange::Exchange;
use std::collections::BTreeMap;

/// Seed every empty stage of one minute or longer
///
/// # Arguments
/// * `symbols` - symbols to download (empty disables the bootstrap)
/// * `lookback` - one-minute bars fetched per symbol
///
/// # Returns
/// * `Ok(n)` - number of stages seeded
pub async fn bootstrap_history(
    exchange: &dyn Exchange,
    store: &SeriesStore,
    stages: &[StageConfig],
    symbols: &[String],
    lookback: usize,
) -> Result<usize, StageError> {
    if symbols.is_empty() {
        return Ok(0);
    }

    let mut targets = Vec::new();
    for stage in stages.iter().filter(|s| s.interval.sums_volume()) {
        store.ensure_tables(stage.interval)?;
        if store.load_bars(stage.interval)?.is_empty() {
            targets.push(stage);
        }
    }
    if targets.is_empty() {
        log::info!("📊 Bootstrap skipped: every stage already has history");
        return Ok(0);
    }

    log::info!(
        "🔧 Bootstrapping {} stages from {} symbols ({} one-minute bars each)",
        targets.len(),
        symbols.len(),
        lookback
    );

    let mut minute_bars = Vec::new();
    for symbol in symbols {
        match exchange.get_historical_bars(symbol, Interval::Min1, lookback).await {
            Ok(bars) => {
                log::info!("   ├─ {}: {} bars", symbol, bars.len());
                minute_bars.extend(bars);
            }
            Err(e) => log::warn!("   ├─ ⚠️  {}: history unavailable: {}", symbol, e),
        }
    }
    let minute_bars = with_rolling_volumes(minute_bars, Interval::Min1.bars_per_day());

    for stage in &targets {
        let seeded = trim(resample(minute_bars.clone(), stage.interval), stage.buffer_size);
        store.replace_bars(stage.interval, &seeded)?;
        log::info!("   └─ ✅ {} seeded with {} rows", stage.interval, seeded.len());
    }

    Ok(targets.len())
}

/// Fill rolling volumes with a trailing `window`-bar sum per symbol
///
/// Bars before the first full window get NaN, which resampling back-fills.
pub fn with_rolling_volumes(bars: Vec<Bar>, window: usize) -> Vec<Bar> {
    let mut by_symbol: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        by_symbol.entry(bar.symbol.clone()).or_default().push(bar);
    }

    let mut out = Vec::new();
    for (_, mut rows) in by_symbol {
        rows.sort_by_key(|b| b.timestamp);
        let mut base_sum = 0.0;
        let mut quote_sum = 0.0;
        for i in 0..rows.len() {
            base_sum += rows[i].base_volume;
            quote_sum += rows[i].quote_volume;
            if i >= window {
                base_sum -= rows[i - window].base_volume;
                quote_sum -= rows[i - window].quote_volume;
            }
            let full = window > 0 && i + 1 >= window;
            rows[i].rolling_base_volume = if full { base_sum } else { f64::NAN };
            rows[i].rolling_quote_volume = if full { quote_sum } else { f64::NAN };
        }
        out.extend(rows);
    }
    out
}
