//! Screening triggers
//!
//! A trigger is a predicate over one symbol's bar series (oldest first).
//! Stages hold a `Arc<dyn Trigger>` chosen by configuration, so adding a new
//! indicator means adding a type here and a name in `TriggerKind`.

use super::types::Bar;
use std::collections::HashSet;
use std::sync::Arc;

/// Predicate deciding whether a symbol passes a stage's screen
pub trait Trigger: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Return true when the series qualifies
    fn fire(&self, series: &[Bar]) -> bool;
}

/// Trigger backed by a closure
pub struct FnTrigger<F>
where
    F: Fn(&[Bar]) -> bool + Send + Sync,
{
    name: &'static str,
    predicate: F,
}

impl<F> FnTrigger<F>
where
    F: Fn(&[Bar]) -> bool + Send + Sync,
{
    pub fn new(name: &'static str, predicate: F) -> Self {
        Self { name, predicate }
    }
}

impl<F> Trigger for FnTrigger<F>
where
    F: Fn(&[Bar]) -> bool + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn fire(&self, series: &[Bar]) -> bool {
        (self.predicate)(series)
    }
}

/// Passes every non-empty series
pub struct AlwaysTrigger;

impl Trigger for AlwaysTrigger {
    fn name(&self) -> &'static str {
        "always"
    }

    fn fire(&self, series: &[Bar]) -> bool {
        !series.is_empty()
    }
}

/// Rejects flat or two-level ("square wave") closes over the last bars
///
/// Illiquid pairs alternate between bid and ask and look like movement to
/// price-change screens; requiring a minimum number of distinct closes
/// filters them out.
pub struct NotSquareWaveTrigger {
    pub lookback: usize,
    pub min_unique: usize,
}

impl Default for NotSquareWaveTrigger {
    fn default() -> Self {
        Self {
            lookback: 4,
            min_unique: 2,
        }
    }
}

impl Trigger for NotSquareWaveTrigger {
    fn name(&self) -> &'static str {
        "not_square_wave"
    }

    fn fire(&self, series: &[Bar]) -> bool {
        let start = series.len().saturating_sub(self.lookback);
        let unique: HashSet<u64> = series[start..].iter().map(|b| b.close.to_bits()).collect();
        unique.len() >= self.min_unique
    }
}

/// Smoothed relative volume above a threshold
///
/// relative = volume / SMA(volume, `average`), smoothed by SMA(`smoothing`).
pub struct RelativeVolumeTrigger {
    pub average: usize,
    pub smoothing: usize,
    pub threshold: f64,
}

impl Default for RelativeVolumeTrigger {
    fn default() -> Self {
        Self {
            average: 26,
            smoothing: 14,
            threshold: 0.1,
        }
    }
}

impl Trigger for RelativeVolumeTrigger {
    fn name(&self) -> &'static str {
        "relative_volume"
    }

    fn fire(&self, series: &[Bar]) -> bool {
        if self.average == 0 || self.smoothing == 0 {
            return false;
        }
        let needed = self.average + self.smoothing - 1;
        if series.len() < needed {
            return false;
        }

        let volumes: Vec<f64> = series.iter().map(|b| b.base_volume).collect();
        let relative: Vec<f64> = (self.average - 1..volumes.len())
            .map(|i| {
                let window = &volumes[i + 1 - self.average..=i];
                let mean = window.iter().sum::<f64>() / self.average as f64;
                if mean > 0.0 {
                    volumes[i] / mean
                } else {
                    0.0
                }
            })
            .collect();

        let tail = &relative[relative.len() - self.smoothing..];
        let smoothed = tail.iter().sum::<f64>() / self.smoothing as f64;
        smoothed > self.threshold
    }
}

/// Price and volume movement over the last two bars
///
/// Fires when the absolute close change exceeds `price_percent` and the
/// rolling volume change exceeds `volume_percent` (both in percent).
pub struct MoversTrigger {
    pub price_percent: f64,
    pub volume_percent: f64,
}

impl Trigger for MoversTrigger {
    fn name(&self) -> &'static str {
        "movers"
    }

    fn fire(&self, series: &[Bar]) -> bool {
        match last_moves(series) {
            Some((price_move, volume_move)) => {
                price_move > self.price_percent && volume_move > self.volume_percent
            }
            None => false,
        }
    }
}

/// (absolute close change %, rolling base volume change %) across the last two bars
pub fn last_moves(series: &[Bar]) -> Option<(f64, f64)> {
    let [prev, last] = series.get(series.len().checked_sub(2)?..)? else {
        return None;
    };
    let price_move = percent_change(prev.close, last.close)?.abs();
    let volume_move = percent_change(prev.rolling_base_volume, last.rolling_base_volume)?;
    Some((price_move, volume_move))
}

fn percent_change(from: f64, to: f64) -> Option<f64> {
    if from == 0.0 || !from.is_finite() || !to.is_finite() {
        return None;
    }
    Some((to - from) / from * 100.0)
}

/// Trigger selection as it appears in configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    Always,
    NotSquareWave,
    RelativeVolume,
    Movers { price_percent: f64, volume_percent: f64 },
}

impl TriggerKind {
    /// Parse a trigger name (`always`, `not_square_wave`, `relative_volume`, `movers`)
    pub fn from_str(s: &str, price_percent: f64, volume_percent: f64) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" => Some(TriggerKind::Always),
            "not_square_wave" => Some(TriggerKind::NotSquareWave),
            "relative_volume" => Some(TriggerKind::RelativeVolume),
            "movers" => Some(TriggerKind::Movers {
                price_percent,
                volume_percent,
            }),
            _ => None,
        }
    }

    pub fn build(&self) -> Arc<dyn Trigger> {
        match self {
            TriggerKind::Always => Arc::new(AlwaysTrigger),
            TriggerKind::NotSquareWave => Arc::new(NotSquareWaveTrigger::default()),
            TriggerKind::RelativeVolume => Arc::new(RelativeVolumeTrigger::default()),
            TriggerKind::Movers {
                price_percent,
                volume_percent,
            } => Arc::new(MoversTrigger {
                price_percent: *price_percent,
                volume_percent: *volume_percent,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::series::tests::bar;

    fn closes(values: &[f64]) -> Vec<Bar> {
        values
            .iter()
            .enumerate()
            .map(|(i, c)| bar("ETHUSDT", i as i64 * 60, *c, 1.0, 100.0))
            .collect()
    }

    #[test]
    fn test_not_square_wave() {
        let trigger = NotSquareWaveTrigger::default();
        assert!(!trigger.fire(&closes(&[5.0, 1.0, 1.0, 1.0, 1.0])));
        assert!(trigger.fire(&closes(&[1.0, 1.0, 1.0, 2.0])));
        assert!(!trigger.fire(&[]));
    }

    #[test]
    fn test_movers() {
        let mut series = closes(&[100.0, 103.0]);
        series[1].rolling_base_volume = 110.0;

        let strict = MoversTrigger { price_percent: 5.0, volume_percent: 0.0 };
        let loose = MoversTrigger { price_percent: 1.0, volume_percent: 0.0 };

        assert!(!strict.fire(&series));
        assert!(loose.fire(&series));
        assert!(!loose.fire(&series[..1]));
    }

    #[test]
    fn test_relative_volume_needs_history() {
        let trigger = RelativeVolumeTrigger { average: 3, smoothing: 2, threshold: 1.5 };
        let mut series = closes(&[1.0; 6]);
        assert!(!trigger.fire(&series[..3]));
        assert!(!trigger.fire(&series));

        series[4].base_volume = 10.0;
        series[5].base_volume = 10.0;
        assert!(trigger.fire(&series));
    }

    #[test]
    fn test_fn_trigger_and_kind_parsing() {
        let trigger = FnTrigger::new("long_enough", |s: &[Bar]| s.len() > 2);
        assert!(trigger.fire(&closes(&[1.0, 2.0, 3.0])));
        assert_eq!(trigger.name(), "long_enough");

        assert_eq!(TriggerKind::from_str("always", 0.0, 0.0), Some(TriggerKind::Always));
        assert_eq!(TriggerKind::from_str("movers", 1.0, 0.0).unwrap().build().name(), "movers");
        assert!(TriggerKind::from_str("rsi", 0.0, 0.0).is_none());
    }
}
