//! Screening: tradable universe, trigger filtering and screened-set rolling

use super::series::group_by_symbol;
use super::triggers::{last_moves, Trigger};
use super::types::{Bar, ScreenedEntry, ScreenedSet, TickSnapshot};
use crate::conversion::{ConversionGraph, PriorityList};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Liquidity requirements for the raw stage's universe
#[derive(Debug, Clone)]
pub struct LiquidityFilter {
    /// Minimum 24h base volume across all pairs of the asset, in the reference asset
    pub min_reference_volume: f64,
    /// Maximum bid/ask spread in percent of the ask
    pub max_spread_percent: f64,
    pub reference_asset: String,
    pub priority: PriorityList,
}

/// Symbols from the latest ticker snapshot that are liquid enough to trade
///
/// Each entry carries the last price/volume moves computed from `bars`;
/// entries are ordered by (volume move, price move) descending.
pub fn tradable_universe(
    ticks: &[TickSnapshot],
    bars: &[Bar],
    graph: &ConversionGraph,
    filter: &LiquidityFilter,
) -> ScreenedSet {
    let series = group_by_symbol(bars);
    let mut volume_by_asset: HashMap<&str, f64> = HashMap::new();
    let mut entries = Vec::new();

    for tick in ticks {
        if tick.spread_percent() >= filter.max_spread_percent {
            continue;
        }
        let volume = *volume_by_asset
            .entry(tick.base_asset.as_str())
            .or_insert_with(|| {
                graph.rolling_reference_volume(&tick.base_asset, &filter.reference_asset, &filter.priority)
            });
        if volume <= filter.min_reference_volume {
            continue;
        }

        let (last_price_move, last_volume_move) = series
            .get(tick.symbol.as_str())
            .and_then(|rows| {
                let owned: Vec<Bar> = rows.iter().map(|b| (*b).clone()).collect();
                last_moves(&owned)
            })
            .unwrap_or((0.0, 0.0));

        entries.push(ScreenedEntry {
            symbol: tick.symbol.clone(),
            base_asset: tick.base_asset.clone(),
            quote_asset: tick.quote_asset.clone(),
            close: tick.close,
            last_price_move,
            last_volume_move,
            rolling_usdt_volume: volume,
            timestamp: tick.close_time / 1_000,
        });
    }

    sort_by_moves(&mut entries);
    ScreenedSet::new(entries)
}

/// Keep universe entries whose series fires the trigger
///
/// Upstream order is preserved. Close and timestamp are refreshed from this
/// stage's newest bar.
pub fn screen(bars: &[Bar], universe: &ScreenedSet, trigger: &dyn Trigger) -> ScreenedSet {
    let series = group_by_symbol(bars);

    let entries = universe
        .entries
        .iter()
        .filter_map(|entry| {
            let rows: Vec<Bar> = series.get(entry.symbol.as_str())?.iter().map(|b| (*b).clone()).collect();
            if !trigger.fire(&rows) {
                return None;
            }
            let last = rows.last()?;
            let mut screened = entry.clone();
            screened.close = last.close;
            screened.timestamp = last.timestamp;
            Some(screened)
        })
        .collect();

    ScreenedSet::new(entries)
}

/// Append a new screened set to the previous one
///
/// Duplicate symbols keep their newest entry, the newest `roll` entries are
/// kept (0 keeps everything), and the result is re-ordered by moves.
pub fn append_screened(old: &ScreenedSet, new: ScreenedSet, roll: usize) -> ScreenedSet {
    let mut seen = HashSet::new();
    let mut entries: Vec<ScreenedEntry> = old
        .entries
        .iter()
        .cloned()
        .chain(new.entries)
        .rev()
        .filter(|e| seen.insert(e.symbol.clone()))
        .collect();
    entries.reverse();

    if roll > 0 && entries.len() > roll {
        entries.drain(..entries.len() - roll);
    }

    sort_by_moves(&mut entries);
    ScreenedSet::new(entries)
}

fn sort_by_moves(entries: &mut [ScreenedEntry]) {
    entries.sort_by(|a, b| {
        match b.last_volume_move.total_cmp(&a.last_volume_move) {
            Ordering::Equal => b.last_price_move.total_cmp(&a.last_price_move),
            other => other,
        }
    });
}
