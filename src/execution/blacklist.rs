//! Time-windowed risk blacklist
//!
//! One entry per base asset, created when the trader buys the asset and
//! updated every time a take-profit or stop-loss level is hit. An asset
//! whose counters reach their thresholds is not bought again until the
//! entry ages out of the retention window.
//!
//! Every write re-stamps `created_at`, so retention counts from the last
//! purchase or hit rather than the first.

use std::collections::BTreeMap;

/// Why an entry is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryReason {
    /// Asset was just bought; counters untouched
    Purchase,
    TakeProfit,
    StopLoss,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::Purchase => "purchase",
            EntryReason::TakeProfit => "take_profit",
            EntryReason::StopLoss => "stop_loss",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistEntry {
    pub base_asset: String,
    /// Pair the reference price is read from
    pub symbol: String,
    pub reference_price: f64,
    pub take_profit_count: u32,
    pub stop_loss_count: u32,
    /// Unix seconds of the last write
    pub created_at: i64,
}

/// Outcome of a take-profit / stop-loss evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskHit {
    TakeProfit { gain_percent: f64 },
    StopLoss { gain_percent: f64 },
}

impl RiskHit {
    pub fn reason(&self) -> EntryReason {
        match self {
            RiskHit::TakeProfit { .. } => EntryReason::TakeProfit,
            RiskHit::StopLoss { .. } => EntryReason::StopLoss,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: BTreeMap<String, BlacklistEntry>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, base_asset: &str) -> Option<&BlacklistEntry> {
        self.entries.get(base_asset)
    }

    pub fn entries(&self) -> impl Iterator<Item = &BlacklistEntry> {
        self.entries.values()
    }

    /// Write an entry for `base_asset`
    ///
    /// A new entry starts with zero counters at `price` on `symbol`. An
    /// existing entry keeps its symbol and counters and moves its reference
    /// price to `price`. `TakeProfit` and `StopLoss` then increment their
    /// counter by exactly one.
    pub fn add_entry(&mut self, base_asset: &str, symbol: &str, price: f64, reason: EntryReason, now: i64) {
        let entry = self
            .entries
            .entry(base_asset.to_string())
            .or_insert_with(|| BlacklistEntry {
                base_asset: base_asset.to_string(),
                symbol: symbol.to_string(),
                reference_price: price,
                take_profit_count: 0,
                stop_loss_count: 0,
                created_at: now,
            });

        entry.reference_price = price;
        entry.created_at = now;
        match reason {
            EntryReason::Purchase => {}
            EntryReason::TakeProfit => entry.take_profit_count += 1,
            EntryReason::StopLoss => entry.stop_loss_count += 1,
        }

        log::info!(
            "🚫 Blacklist {} {} ({} @ {}): take_profit={} stop_loss={}",
            reason.as_str(),
            base_asset,
            entry.symbol,
            entry.reference_price,
            entry.take_profit_count,
            entry.stop_loss_count
        );
    }

    /// Record a fill: the entry's reference moves to the pair actually traded
    pub fn record_purchase(&mut self, base_asset: &str, symbol: &str, price: f64, now: i64) {
        self.add_entry(base_asset, symbol, price, EntryReason::Purchase, now);
        if let Some(entry) = self.entries.get_mut(base_asset) {
            entry.symbol = symbol.to_string();
        }
    }

    /// False once either counter has reached its threshold
    pub fn is_buyable(&self, base_asset: &str, take_profit_threshold: u32, stop_loss_threshold: u32) -> bool {
        match self.entries.get(base_asset) {
            Some(entry) => {
                entry.take_profit_count < take_profit_threshold && entry.stop_loss_count < stop_loss_threshold
            }
            None => true,
        }
    }

    /// Compare `price_now` against the entry's reference price
    ///
    /// # Returns
    /// * `Some(hit)` - gain is at or beyond a limit
    /// * `None` - no entry, no valid reference, or within limits
    pub fn evaluate(
        &self,
        base_asset: &str,
        price_now: f64,
        take_profit_percent: f64,
        stop_loss_percent: f64,
    ) -> Option<RiskHit> {
        let entry = self.entries.get(base_asset)?;
        if !(entry.reference_price > 0.0) {
            return None;
        }

        let gain_percent = (price_now - entry.reference_price) / entry.reference_price * 100.0;
        if gain_percent >= take_profit_percent {
            Some(RiskHit::TakeProfit { gain_percent })
        } else if gain_percent <= -stop_loss_percent {
            Some(RiskHit::StopLoss { gain_percent })
        } else {
            None
        }
    }

    /// Drop entries written `retention_secs` or more before `now`
    pub fn evict_older_than(&mut self, now: i64, retention_secs: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.created_at < retention_secs);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::info!("🧹 Evicted {} blacklist entries", evicted);
        }
        evicted
    }
}
