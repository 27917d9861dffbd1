//! Pure series transforms: merge, collapse, resample, trim
//!
//! Every function takes the series by value or reference and returns a new
//! series. No function here touches I/O or shared state, so a stage iteration
//! is just a composition of these.

use super::interval::Interval;
use super::types::Bar;
use std::collections::{BTreeMap, HashSet};

/// Upper bound on synthetic buckets inserted into a single gap
///
/// A stage that was offline for days would otherwise materialise every
/// missing bucket before trim throws them away.
const MAX_GAP_BUCKETS: i64 = 1_440;

/// Merge freshly polled raw rows into the existing raw series
///
/// Rows are keyed by (symbol, trade_count): the exchange counter only moves
/// when the ticker changed, so a repeated key is a repeated poll. The first
/// occurrence wins, which keeps already-resampled rows in place.
pub fn merge_raw(old: Vec<Bar>, new: Vec<Bar>) -> Vec<Bar> {
    let mut seen: HashSet<(String, u64)> = HashSet::with_capacity(old.len() + new.len());
    let mut merged = Vec::with_capacity(old.len() + new.len());

    for bar in old.into_iter().chain(new) {
        if seen.insert((bar.symbol.clone(), bar.trade_count)) {
            merged.push(bar);
        }
    }

    merged
}

/// Merge rows coming from an upstream stage into a derived series
///
/// Exact duplicate rows are dropped keeping the last occurrence. Merging the
/// same batch twice yields the same series.
pub fn merge_derived(old: Vec<Bar>, new: Vec<Bar>) -> Vec<Bar> {
    let mut seen = HashSet::with_capacity(old.len() + new.len());
    let mut merged: Vec<Bar> = old
        .into_iter()
        .chain(new)
        .rev()
        .filter(|bar| seen.insert(bar.identity()))
        .collect();
    merged.reverse();
    merged
}

/// Keep only the newest row for every (symbol, timestamp)
///
/// An upstream stage republishes its open bucket every iteration; later rows
/// are recomputations that supersede the earlier ones.
pub fn collapse_recomputed(bars: Vec<Bar>) -> Vec<Bar> {
    let mut seen: HashSet<(String, i64)> = HashSet::with_capacity(bars.len());
    let mut collapsed: Vec<Bar> = bars
        .into_iter()
        .rev()
        .filter(|bar| seen.insert((bar.symbol.clone(), bar.timestamp)))
        .collect();
    collapsed.reverse();
    collapsed
}

/// Resample a series into `interval` buckets
///
/// Per symbol and bucket (timestamp floored to the interval):
/// - open = first, high = max, low = min, close = last
/// - base/quote volume = sum from one minute upwards, max below
/// - rolling volumes = last known value, forward- then backward-filled
///
/// Buckets missing between a symbol's first and last bucket are filled with
/// the previous close and zero volume. Output is grouped by symbol with
/// strictly increasing timestamps.
pub fn resample(bars: Vec<Bar>, interval: Interval) -> Vec<Bar> {
    let mut out = Vec::with_capacity(bars.len());

    for (_, mut rows) in group_owned(bars) {
        rows.sort_by_key(|bar| bar.timestamp);
        let buckets = aggregate_buckets(rows, interval);
        let mut filled = fill_gaps(buckets, interval);
        fill_rolling(&mut filled);
        out.extend(filled);
    }

    out
}

fn aggregate_buckets(rows: Vec<Bar>, interval: Interval) -> Vec<Bar> {
    let sums = interval.sums_volume();
    let mut buckets: Vec<Bar> = Vec::new();

    for row in rows {
        let bucket = interval.floor(row.timestamp);
        match buckets.last_mut() {
            Some(current) if current.timestamp == bucket => {
                current.high = current.high.max(row.high);
                current.low = current.low.min(row.low);
                current.close = row.close;
                if sums {
                    current.base_volume += row.base_volume;
                    current.quote_volume += row.quote_volume;
                } else {
                    current.base_volume = current.base_volume.max(row.base_volume);
                    current.quote_volume = current.quote_volume.max(row.quote_volume);
                }
                if row.rolling_base_volume.is_finite() {
                    current.rolling_base_volume = row.rolling_base_volume;
                }
                if row.rolling_quote_volume.is_finite() {
                    current.rolling_quote_volume = row.rolling_quote_volume;
                }
                current.trade_count = row.trade_count;
            }
            _ => buckets.push(Bar {
                timestamp: bucket,
                ..row
            }),
        }
    }

    buckets
}

fn fill_gaps(buckets: Vec<Bar>, interval: Interval) -> Vec<Bar> {
    let step = interval.duration_secs();
    let mut filled: Vec<Bar> = Vec::with_capacity(buckets.len());

    for bar in buckets {
        if let Some(prev) = filled.last() {
            let missing = (bar.timestamp - prev.timestamp) / step - 1;
            if missing > 0 && missing <= MAX_GAP_BUCKETS {
                let template = prev.clone();
                for i in 1..=missing {
                    filled.push(Bar {
                        timestamp: template.timestamp + i * step,
                        open: template.close,
                        high: template.close,
                        low: template.close,
                        base_volume: 0.0,
                        quote_volume: 0.0,
                        ..template.clone()
                    });
                }
            }
        }
        filled.push(bar);
    }

    filled
}

fn fill_rolling(bars: &mut [Bar]) {
    let mut last_base = f64::NAN;
    let mut last_quote = f64::NAN;
    for bar in bars.iter_mut() {
        if bar.rolling_base_volume.is_finite() {
            last_base = bar.rolling_base_volume;
        } else {
            bar.rolling_base_volume = last_base;
        }
        if bar.rolling_quote_volume.is_finite() {
            last_quote = bar.rolling_quote_volume;
        } else {
            bar.rolling_quote_volume = last_quote;
        }
    }

    let mut next_base = f64::NAN;
    let mut next_quote = f64::NAN;
    for bar in bars.iter_mut().rev() {
        if bar.rolling_base_volume.is_finite() {
            next_base = bar.rolling_base_volume;
        } else {
            bar.rolling_base_volume = next_base;
        }
        if bar.rolling_quote_volume.is_finite() {
            next_quote = bar.rolling_quote_volume;
        } else {
            bar.rolling_quote_volume = next_quote;
        }
    }
}

/// Keep the `buffer_size` most recent rows per symbol
pub fn trim(bars: Vec<Bar>, buffer_size: usize) -> Vec<Bar> {
    let mut out = Vec::with_capacity(bars.len());

    for (_, mut rows) in group_owned(bars) {
        rows.sort_by_key(|bar| bar.timestamp);
        let skip = rows.len().saturating_sub(buffer_size);
        out.extend(rows.into_iter().skip(skip));
    }

    out
}

/// Oldest timestamp still present in the series
pub fn min_timestamp(bars: &[Bar]) -> Option<i64> {
    bars.iter().map(|bar| bar.timestamp).min()
}

/// Borrowing view of a series grouped by symbol, each group in timestamp order
pub fn group_by_symbol(bars: &[Bar]) -> BTreeMap<&str, Vec<&Bar>> {
    let mut groups: BTreeMap<&str, Vec<&Bar>> = BTreeMap::new();
    for bar in bars {
        groups.entry(bar.symbol.as_str()).or_default().push(bar);
    }
    for rows in groups.values_mut() {
        rows.sort_by_key(|bar| bar.timestamp);
    }
    groups
}

fn group_owned(bars: Vec<Bar>) -> BTreeMap<String, Vec<Bar>> {
    let mut groups: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        groups.entry(bar.symbol.clone()).or_default().push(bar);
    }
    groups
}
