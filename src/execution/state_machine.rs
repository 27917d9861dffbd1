//! Rotation state machine
//!
//! The trader is either holding one asset or executing a conversion path
//! hop by hop. Every iteration:
//!
//! 1. picks a target from the final screened set (a forced target from a
//!    risk hit wins, then the held asset if still screened, then the first
//!    buyable screened asset, else the stable asset)
//! 2. rotates held → target along the BFS route, restarting from the
//!    actually held asset when a hop aborts
//! 3. checks take-profit / stop-loss on the held asset
//! 4. evicts expired blacklist entries
//!
//! The loop owns the blacklist and its state; nothing else mutates them.

use super::blacklist::Blacklist;
use super::config::RiskConfig;
use super::orders::execute_hop;
use super::TraderError;
use crate::bus::{MessageBus, ScreenedUpdate, SCREENED_TOPIC};
use crate::conversion::{ConversionGraph, Hop, RoutingConfig};
use crate::exchange::{Exchange, Fill, Pair};
use crate::pipeline::handoff::HandoffReceiver;
use crate::pipeline::types::{ScreenedEntry, ScreenedSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    Holding { asset: String },
    Executing { path: Vec<Hop>, hop_index: usize },
}

pub struct Trader {
    exchange: Arc<dyn Exchange>,
    pairs: Arc<Vec<Pair>>,
    screened: HandoffReceiver,
    bus: Arc<dyn MessageBus>,
    risk: RiskConfig,
    routing: RoutingConfig,
    blacklist: Blacklist,
    state: ExecutionState,
    /// Set by a risk hit, cleared once the trader actually holds it
    forced_target: Option<String>,
    last_announced: Option<String>,
}

impl Trader {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        pairs: Arc<Vec<Pair>>,
        screened: HandoffReceiver,
        bus: Arc<dyn MessageBus>,
        risk: RiskConfig,
        routing: RoutingConfig,
    ) -> Self {
        let state = ExecutionState::Holding {
            asset: risk.stable_asset.clone(),
        };
        Self {
            exchange,
            pairs,
            screened,
            bus,
            risk,
            routing,
            blacklist: Blacklist::new(),
            state,
            forced_target: None,
            last_announced: None,
        }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Asset held between rotations; `None` mid-path
    pub fn held_asset(&self) -> Option<&str> {
        match &self.state {
            ExecutionState::Holding { asset } => Some(asset.as_str()),
            ExecutionState::Executing { .. } => None,
        }
    }

    async fn refresh_graph(&self) -> Result<ConversionGraph, TraderError> {
        let tickers = self.exchange.get_ticker().await?;
        Ok(ConversionGraph::build(&self.pairs, &tickers))
    }

    /// Largest wallet (valued in the reference asset) as (asset, quantity)
    async fn biggest_wallet(&self, graph: &ConversionGraph) -> Result<(String, f64), TraderError> {
        let balances = self.exchange.get_balances().await?;
        graph
            .select_asset_with_biggest_wallet(&balances, &self.routing.reference_asset, &self.routing.priority)
            .map(|(asset, _, quantity)| (asset, quantity))
            .ok_or(TraderError::EmptyWallet)
    }

    /// Start out holding the largest wallet
    pub async fn init(&mut self) -> Result<(), TraderError> {
        let graph = self.refresh_graph().await?;
        let (asset, quantity) = self.biggest_wallet(&graph).await?;
        log::info!("💼 Holding {} {}", quantity, asset);
        self.state = ExecutionState::Holding { asset };
        Ok(())
    }

    /// Pick the asset the trader should hold next
    pub fn select_target(&mut self, screened: Option<&ScreenedSet>, graph: &ConversionGraph, now: i64) -> String {
        let stable = self.risk.stable_asset.clone();

        if let Some(forced) = &self.forced_target {
            log::info!("🎯 Target forced to {}", forced);
            return forced.clone();
        }

        let held = match self.held_asset() {
            Some(asset) => asset.to_string(),
            None => return stable,
        };
        let set = match screened {
            Some(set) if !set.is_empty() => set,
            _ => return stable,
        };

        if set.contains_base_asset(&held) {
            return held;
        }

        for entry in &set.entries {
            let pair = graph.most_liquid_pair(&entry.base_asset, &self.routing.reference_asset, &self.routing.priority);
            if pair.is_none() {
                log::debug!("   ├─ {} not tradable in current snapshot", entry.base_asset);
                continue;
            }
            if !self
                .blacklist
                .is_buyable(&entry.base_asset, self.risk.take_profit_count, self.risk.stop_loss_count)
            {
                log::debug!("   ├─ {} blacklisted, skipping", entry.base_asset);
                continue;
            }
            self.announce(entry, now);
            return entry.base_asset.clone();
        }

        stable
    }

    fn announce(&mut self, entry: &ScreenedEntry, now: i64) {
        if self.last_announced.as_deref() == Some(entry.symbol.as_str()) {
            return;
        }
        let receivers = self.bus.publish(
            SCREENED_TOPIC,
            ScreenedUpdate {
                symbol: entry.symbol.clone(),
                base_asset: entry.base_asset.clone(),
                close: entry.close,
                last_price_move: entry.last_price_move,
                last_volume_move: entry.last_volume_move,
                timestamp: now,
            },
        );
        log::info!("📣 New target {} ({} subscribers)", entry.symbol, receivers);
        self.last_announced = Some(entry.symbol.clone());
    }

    /// Move the wallet into `target`
    ///
    /// Each attempt re-reads balances, so an aborted path resumes from
    /// wherever the completed hops left the funds.
    pub async fn rotate(&mut self, target: &str, now: i64) -> Result<(), TraderError> {
        let attempts = self.risk.max_rotation_attempts;

        for attempt in 1..=attempts {
            let graph = self.refresh_graph().await?;
            let (held, quantity) = self.biggest_wallet(&graph).await?;
            self.state = ExecutionState::Holding { asset: held.clone() };
            if held == target {
                return Ok(());
            }

            let path = graph.route(&held, target, &self.routing.priority)?;
            log::info!(
                "🔄 Rotation {}/{}: {} {} → {} via [{}]",
                attempt,
                attempts,
                quantity,
                held,
                target,
                path.iter().map(|h| h.symbol.as_str()).collect::<Vec<_>>().join(" → ")
            );

            match self.execute_path(&graph, path, &held, quantity).await {
                Ok(last_fill) => {
                    self.state = ExecutionState::Holding {
                        asset: target.to_string(),
                    };
                    if target != self.risk.stable_asset {
                        self.record_purchase(&graph, target, last_fill.as_ref(), now);
                    }
                    log::info!("✅ Now holding {}", target);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("⚠️  Rotation attempt {}/{} aborted: {}", attempt, attempts, e);
                }
            }
        }

        Err(TraderError::RotationAttemptsExhausted {
            target: target.to_string(),
            attempts,
        })
    }

    async fn execute_path(
        &mut self,
        graph: &ConversionGraph,
        path: Vec<Hop>,
        from: &str,
        quantity: f64,
    ) -> Result<Option<Fill>, TraderError> {
        let mut current = from.to_string();
        let mut amount = quantity;
        let mut last_fill = None;

        for hop_index in 0..path.len() {
            let hop = path[hop_index].clone();
            self.state = ExecutionState::Executing {
                path: path.clone(),
                hop_index,
            };

            match execute_hop(
                self.exchange.as_ref(),
                graph,
                &hop,
                &current,
                amount,
                self.risk.max_tick_adjustment,
            )
            .await
            {
                Ok(outcome) => {
                    current = outcome.received_asset;
                    amount = outcome.received_qty;
                    last_fill = Some(outcome.fill);
                }
                Err(e) => {
                    self.state = ExecutionState::Holding { asset: current };
                    return Err(e);
                }
            }
        }

        Ok(last_fill)
    }

    /// Purchase price comes from the last fill when it traded `target` as base,
    /// otherwise from the close of `target`'s most liquid pair.
    fn record_purchase(&mut self, graph: &ConversionGraph, target: &str, last_fill: Option<&Fill>, now: i64) {
        let traded_as_base = last_fill.filter(|f| graph.pair(&f.symbol).map_or(false, |p| p.base_asset == target));
        let reference = match traded_as_base {
            Some(fill) => Some((fill.symbol.clone(), fill.price)),
            None => graph
                .most_liquid_pair(target, &self.routing.reference_asset, &self.routing.priority)
                .and_then(|pair| graph.close(&pair.symbol).map(|close| (pair.symbol.clone(), close))),
        };

        match reference {
            Some((symbol, price)) => self.blacklist.record_purchase(target, &symbol, price, now),
            None => log::warn!("⚠️  No reference price for {}, purchase not recorded", target),
        }
    }

    /// Take-profit / stop-loss check on the held asset
    ///
    /// A hit bumps the blacklist counter and forces the next target to the
    /// stable asset.
    pub fn evaluate_risk(&mut self, target: &str, graph: &ConversionGraph, now: i64) {
        let held = match self.held_asset() {
            Some(asset) if asset == target && asset != self.risk.stable_asset => asset.to_string(),
            _ => return,
        };
        let symbol = match self.blacklist.get(&held) {
            Some(entry) => entry.symbol.clone(),
            None => return,
        };
        let price = match graph.close(&symbol) {
            Some(price) => price,
            None => {
                log::warn!("⚠️  No fresh close for {}, skipping risk check", symbol);
                return;
            }
        };

        if let Some(hit) = self
            .blacklist
            .evaluate(&held, price, self.risk.take_profit_percent, self.risk.stop_loss_percent)
        {
            log::info!("📊 {} {:?} at {}", held, hit, price);
            self.blacklist.add_entry(&held, &symbol, price, hit.reason(), now);
            self.forced_target = Some(self.risk.stable_asset.clone());
        }
    }

    /// One full iteration: select, rotate, evaluate, evict
    pub async fn step(&mut self, now: i64) -> Result<(), TraderError> {
        let graph = self.refresh_graph().await?;
        let latest = self.screened.peek();
        let target = self.select_target(latest.as_ref().map(|o| &o.screened), &graph, now);

        let rotation = if self.held_asset() == Some(target.as_str()) {
            Ok(())
        } else {
            self.rotate(&target, now).await
        };
        if rotation.is_ok() {
            if self.forced_target.as_deref() == Some(target.as_str()) {
                self.forced_target = None;
            }
            self.evaluate_risk(&target, &graph, now);
        }

        self.blacklist.evict_older_than(now, self.risk.blacklist_retention_secs);
        rotation
    }

    /// Run until the shutdown signal flips; an in-flight iteration always completes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let delay = Duration::from_millis(self.risk.poll_delay_ms);
        log::info!(
            "🚀 Trader running (stable {}, take profit {}%, stop loss {}%)",
            self.risk.stable_asset,
            self.risk.take_profit_percent,
            self.risk.stop_loss_percent
        );

        if let Err(e) = self.init().await {
            log::warn!("⚠️  Trader init failed, holding {}: {}", self.risk.stable_asset, e);
        }

        while !*shutdown.borrow() {
            let now = chrono::Utc::now().timestamp();
            match self.step(now).await {
                Ok(()) => {}
                Err(TraderError::Exchange(e)) if e.is_transient() => {
                    log::warn!("⚠️  Trader iteration skipped: {}", e);
                }
                Err(e) => log::error!("❌ Trader iteration failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("✅ Trader stopped ({:?})", self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;
    use crate::conversion::graph::tests::{pair, ticker};
    use crate::exchange::paper::tests::StaticMarket;
    use crate::exchange::paper::{PaperConfig, PaperExchange};
    use crate::exchange::Balance;
    use crate::execution::EntryReason;
    use crate::pipeline::handoff::{channel, HandoffSender, StageOutput};
    use crate::pipeline::interval::Interval;
    use crate::pipeline::types::TickSnapshot;

    fn pairs() -> Vec<Pair> {
        vec![pair("ETH", "BTC"), pair("BTC", "USDT"), pair("SOL", "USDT")]
    }

    fn tickers(eth_btc: f64) -> Vec<TickSnapshot> {
        vec![
            ticker("ETHBTC", eth_btc),
            ticker("BTCUSDT", 30_000.0),
            ticker("SOLUSDT", 20.0),
        ]
    }

    fn entry(base: &str, quote: &str) -> ScreenedEntry {
        ScreenedEntry {
            symbol: format!("{}{}", base, quote),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            close: 1.0,
            last_price_move: 1.0,
            last_volume_move: 1.0,
            rolling_usdt_volume: 2_000_000.0,
            timestamp: 0,
        }
    }

    fn publish(tx: &HandoffSender, entries: Vec<ScreenedEntry>) {
        tx.publish(StageOutput::new(Interval::Day1, &[], ScreenedSet::new(entries), 0));
    }

    struct Fixture {
        market: Arc<StaticMarket>,
        screened_tx: HandoffSender,
        bus: Arc<BroadcastBus>,
        trader: Trader,
    }

    fn fixture() -> Fixture {
        let market = Arc::new(StaticMarket::new(tickers(0.05), pairs()));
        let paper = PaperExchange::new(
            market.clone(),
            PaperConfig {
                balances: vec![Balance {
                    asset: "USDT".to_string(),
                    free: 1_000.0,
                }],
                fee_rate: 0.0,
            },
        );
        let (screened_tx, screened_rx) = channel();
        let bus = Arc::new(BroadcastBus::default());
        let trader = Trader::new(
            Arc::new(paper),
            Arc::new(pairs()),
            screened_rx,
            bus.clone(),
            RiskConfig::default(),
            RoutingConfig::default(),
        );
        Fixture {
            market,
            screened_tx,
            bus,
            trader,
        }
    }

    fn holding(asset: &str) -> ExecutionState {
        ExecutionState::Holding {
            asset: asset.to_string(),
        }
    }

    #[tokio::test]
    async fn test_select_target_prefers_held_then_first_buyable() {
        let mut f = fixture();
        let graph = ConversionGraph::build(&pairs(), &tickers(0.05));
        let mut updates = f.bus.subscribe(SCREENED_TOPIC);
        let set = ScreenedSet::new(vec![entry("SOL", "USDT"), entry("ETH", "BTC")]);

        assert_eq!(f.trader.select_target(None, &graph, 0), "USDT");
        assert_eq!(f.trader.select_target(Some(&set), &graph, 0), "SOL");
        assert_eq!(updates.recv().await.unwrap().symbol, "SOLUSDT");

        f.trader.blacklist.add_entry("SOL", "SOLUSDT", 20.0, EntryReason::StopLoss, 0);
        assert_eq!(f.trader.select_target(Some(&set), &graph, 0), "ETH");

        f.trader.state = holding("ETH");
        assert_eq!(f.trader.select_target(Some(&set), &graph, 0), "ETH");
    }

    #[tokio::test]
    async fn test_rotation_through_intermediate_asset() {
        let mut f = fixture();
        f.trader.init().await.unwrap();
        assert_eq!(f.trader.state(), &holding("USDT"));

        f.trader.rotate("ETH", 100).await.unwrap();

        assert_eq!(f.trader.state(), &holding("ETH"));
        let entry = f.trader.blacklist().get("ETH").unwrap();
        assert_eq!(entry.symbol, "ETHBTC");
        assert_eq!(entry.reference_price, 0.05);
        assert_eq!(entry.created_at, 100);
        assert_eq!(entry.take_profit_count, 0);
    }

    #[tokio::test]
    async fn test_take_profit_forces_stable_then_exits() {
        let mut f = fixture();
        publish(&f.screened_tx, vec![entry("ETH", "BTC")]);
        f.trader.init().await.unwrap();

        f.trader.step(0).await.unwrap();
        assert_eq!(f.trader.state(), &holding("ETH"));

        // +6% on the purchase pair
        f.market.set_tickers(tickers(0.053));
        f.trader.step(10).await.unwrap();
        assert_eq!(f.trader.state(), &holding("ETH"));
        assert_eq!(f.trader.blacklist().get("ETH").unwrap().take_profit_count, 1);

        f.trader.step(20).await.unwrap();
        assert_eq!(f.trader.state(), &holding("USDT"));
    }

    #[tokio::test]
    async fn test_stop_loss_blacklists_until_retention_expires() {
        let mut f = fixture();
        publish(&f.screened_tx, vec![entry("ETH", "BTC")]);
        f.trader.init().await.unwrap();
        f.trader.step(0).await.unwrap();

        // -4% trips the stop loss; threshold 1 makes ETH unbuyable
        f.market.set_tickers(tickers(0.048));
        f.trader.step(10).await.unwrap();
        f.trader.step(20).await.unwrap();
        assert_eq!(f.trader.state(), &holding("USDT"));
        assert!(!f.trader.blacklist().is_buyable("ETH", 2, 1));

        f.trader.step(30).await.unwrap();
        assert_eq!(f.trader.state(), &holding("USDT"));

        // Retention counts from the stop-loss write at t=10
        f.trader.step(10 + 900).await.unwrap();
        assert!(f.trader.blacklist().get("ETH").is_none());
        f.trader.step(1_000).await.unwrap();
        assert_eq!(f.trader.state(), &holding("ETH"));
    }
}
