//! Per-bar volume recovery from the exchange's rolling 24h volume
//!
//! The ticker endpoint only reports trailing 24h totals. For consecutive
//! one-minute bars `rolling(t) - rolling(t-1) = volume(t) - volume(t - 1 day)`,
//! so the bar volume can be rebuilt once the bar from a day earlier is known.

use super::types::Bar;
use std::collections::{BTreeMap, HashMap};

const ONE_DAY_SECS: i64 = 86_400;

/// Number of newest bars per symbol that get their volume recomputed
const RECOVERED_BARS: usize = 2;

/// Recompute base/quote volume for the newest two bars of every symbol
///
/// `volume(t) = rolling(t) - rolling(t-1) + volume(t - 1 day)`, with a missing
/// day-old bar counted as zero volume. A symbol's first bar has no predecessor
/// and gets zero volume while it is still in the recomputed window; afterwards
/// the value sticks. Older bars are left untouched.
pub fn recover_volumes(bars: Vec<Bar>) -> Vec<Bar> {
    let mut by_symbol: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        by_symbol.entry(bar.symbol.clone()).or_default().push(bar);
    }

    let mut out = Vec::new();
    for (_, mut rows) in by_symbol {
        rows.sort_by_key(|bar| bar.timestamp);
        recover_symbol(&mut rows);
        out.extend(rows);
    }
    out
}

fn recover_symbol(rows: &mut [Bar]) {
    let day_old: HashMap<i64, (f64, f64)> = rows
        .iter()
        .map(|bar| (bar.timestamp, (bar.base_volume, bar.quote_volume)))
        .collect();

    let start = rows.len().saturating_sub(RECOVERED_BARS);
    if start == 0 {
        if let Some(first) = rows.first_mut() {
            // Summed rolling totals, not a per-bar volume
            first.base_volume = 0.0;
            first.quote_volume = 0.0;
        }
    }
    for i in start.max(1)..rows.len() {
        let (prev_base, prev_quote) = (rows[i - 1].rolling_base_volume, rows[i - 1].rolling_quote_volume);
        let bar = &mut rows[i];
        let (old_base, old_quote) = day_old
            .get(&(bar.timestamp - ONE_DAY_SECS))
            .copied()
            .unwrap_or((0.0, 0.0));

        let base = bar.rolling_base_volume - prev_base + old_base;
        let quote = bar.rolling_quote_volume - prev_quote + old_quote;
        if base.is_finite() {
            bar.base_volume = base;
        }
        if quote.is_finite() {
            bar.quote_volume = quote;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::series::tests::bar;

    #[test]
    fn test_recovers_volume_from_rolling_diff() {
        let day_ago = bar("ETHUSDT", 0, 1.0, 20.0, 80.0);
        let prev = bar("ETHUSDT", ONE_DAY_SECS - 60, 1.0, 0.0, 100.0);
        let newest = bar("ETHUSDT", ONE_DAY_SECS, 1.0, 0.0, 130.0);

        let out = recover_volumes(vec![day_ago, prev, newest]);

        let newest = out.iter().find(|b| b.timestamp == ONE_DAY_SECS).unwrap();
        assert_eq!(newest.base_volume, 50.0);
    }

    #[test]
    fn test_missing_day_old_bar_counts_as_zero() {
        let prev = bar("ETHUSDT", 0, 1.0, 0.0, 100.0);
        let newest = bar("ETHUSDT", 60, 1.0, 0.0, 130.0);

        let out = recover_volumes(vec![prev, newest]);

        assert_eq!(out[1].base_volume, 30.0);
    }

    #[test]
    fn test_first_bar_drops_summed_rolling_volume() {
        // Four raw polls summed into one minute: 4x the rolling total
        let first = bar("ETHUSDT", 0, 1.0, 4_006.0, 1_003.0);
        let second = bar("ETHUSDT", 60, 1.0, 4_030.0, 1_007.0);

        let out = recover_volumes(vec![first.clone()]);
        assert_eq!(out[0].base_volume, 0.0);
        assert_eq!(out[0].quote_volume, 0.0);

        let out = recover_volumes(vec![first, second]);
        assert_eq!(out[0].base_volume, 0.0);
        assert_eq!(out[1].base_volume, 4.0);
    }

    #[test]
    fn test_older_bars_untouched() {
        let rows: Vec<Bar> = (0..5).map(|i| bar("ETHUSDT", i * 60, 1.0, 7.0, 100.0 + i as f64)).collect();

        let out = recover_volumes(rows);

        assert_eq!(out[0].base_volume, 7.0);
        assert_eq!(out[1].base_volume, 7.0);
        assert_eq!(out[2].base_volume, 7.0);
        assert_eq!(out[3].base_volume, 1.0);
        assert_eq!(out[4].base_volume, 1.0);
    }
}
