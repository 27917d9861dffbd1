//! Asset graph built from the live ticker snapshot
//!
//! Nodes are assets, edges are pairs. An edge is traversable both ways:
//! base → quote multiplies by the pair's close, quote → base divides.
//! The graph is immutable once built and is rebuilt from every new snapshot,
//! so it can be shared behind an `Arc` without locking.

use super::priority::PriorityList;
use super::ConversionError;
use crate::exchange::{Balance, Pair};
use crate::pipeline::types::TickSnapshot;
use std::collections::{HashMap, HashSet, VecDeque};

/// One pair traversal in a conversion path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl Hop {
    /// Asset received when entering this hop holding `from`
    pub fn other_side(&self, from: &str) -> Option<&str> {
        if from == self.base_asset {
            Some(&self.quote_asset)
        } else if from == self.quote_asset {
            Some(&self.base_asset)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct Market {
    pair: Pair,
    ticker: TickSnapshot,
}

/// Pair graph for one ticker snapshot
#[derive(Debug, Clone, Default)]
pub struct ConversionGraph {
    markets: HashMap<String, Market>,
    /// asset -> [(neighbor asset, pair symbol)]
    adjacency: HashMap<String, Vec<(String, String)>>,
}

impl ConversionGraph {
    /// Build the graph from exchange pairs and the latest tickers
    ///
    /// Pairs without a ticker in the snapshot, or with a non-positive close,
    /// are not edges.
    pub fn build(pairs: &[Pair], tickers: &[TickSnapshot]) -> Self {
        let by_symbol: HashMap<&str, &TickSnapshot> =
            tickers.iter().map(|t| (t.symbol.as_str(), t)).collect();

        let mut graph = Self::default();
        let mut sorted: Vec<&Pair> = pairs.iter().collect();
        sorted.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        for pair in sorted {
            let Some(ticker) = by_symbol.get(pair.symbol.as_str()) else {
                continue;
            };
            if !(ticker.close > 0.0) || graph.markets.contains_key(&pair.symbol) {
                continue;
            }

            graph
                .adjacency
                .entry(pair.base_asset.clone())
                .or_default()
                .push((pair.quote_asset.clone(), pair.symbol.clone()));
            graph
                .adjacency
                .entry(pair.quote_asset.clone())
                .or_default()
                .push((pair.base_asset.clone(), pair.symbol.clone()));
            graph.markets.insert(
                pair.symbol.clone(),
                Market {
                    pair: pair.clone(),
                    ticker: (*ticker).clone(),
                },
            );
        }

        graph
    }

    pub fn pair(&self, symbol: &str) -> Option<&Pair> {
        self.markets.get(symbol).map(|m| &m.pair)
    }

    pub fn ticker(&self, symbol: &str) -> Option<&TickSnapshot> {
        self.markets.get(symbol).map(|m| &m.ticker)
    }

    pub fn close(&self, symbol: &str) -> Option<f64> {
        self.ticker(symbol).map(|t| t.close)
    }

    pub fn contains_asset(&self, asset: &str) -> bool {
        self.adjacency.contains_key(asset)
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    /// Shortest hop path between two assets
    ///
    /// Breadth-first: neighbors are expanded in priority order, then
    /// alphabetically, and the search stops at the first discovery of `to`.
    /// Same asset yields an empty path.
    pub fn route(&self, from: &str, to: &str, priority: &PriorityList) -> Result<Vec<Hop>, ConversionError> {
        if from == to {
            return Ok(Vec::new());
        }
        let no_path = || ConversionError::NoConversionPath {
            from: from.to_string(),
            to: to.to_string(),
        };
        if !self.contains_asset(from) || !self.contains_asset(to) {
            return Err(no_path());
        }

        // asset -> (previous asset, pair symbol used to reach it)
        let mut parents: HashMap<String, (String, String)> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::from([from.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::from([from.to_string()]);

        while let Some(current) = queue.pop_front() {
            for (neighbor, symbol) in self.ordered_neighbors(&current, priority) {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                parents.insert(neighbor.clone(), (current.clone(), symbol.clone()));
                if neighbor == to {
                    return self.unwind(from, to, &parents);
                }
                queue.push_back(neighbor);
            }
        }

        Err(no_path())
    }

    fn ordered_neighbors(&self, asset: &str, priority: &PriorityList) -> Vec<(String, String)> {
        let mut neighbors = self.adjacency.get(asset).cloned().unwrap_or_default();
        neighbors.sort_by_key(|(neighbor, _)| priority.rank(neighbor));
        neighbors
    }

    fn unwind(
        &self,
        from: &str,
        to: &str,
        parents: &HashMap<String, (String, String)>,
    ) -> Result<Vec<Hop>, ConversionError> {
        let mut hops = Vec::new();
        let mut current = to.to_string();
        while current != from {
            let (previous, symbol) = parents
                .get(&current)
                .ok_or_else(|| ConversionError::MissingPair(current.clone()))?;
            let pair = self
                .pair(symbol)
                .ok_or_else(|| ConversionError::MissingPair(symbol.clone()))?;
            hops.push(Hop {
                symbol: pair.symbol.clone(),
                base_asset: pair.base_asset.clone(),
                quote_asset: pair.quote_asset.clone(),
            });
            current = previous.clone();
        }
        hops.reverse();
        Ok(hops)
    }

    /// Convert `size` units of `from` into `to` along `path`
    ///
    /// Multiplies by close when traversing base → quote and divides when
    /// traversing quote → base.
    pub fn convert_price(&self, size: f64, from: &str, to: &str, path: &[Hop]) -> Result<f64, ConversionError> {
        let mut value = size;
        let mut current = from.to_string();

        for hop in path {
            let price = self
                .close(&hop.symbol)
                .filter(|p| *p > 0.0)
                .ok_or_else(|| ConversionError::MissingPair(hop.symbol.clone()))?;

            if current == hop.base_asset {
                value *= price;
                current = hop.quote_asset.clone();
            } else if current == hop.quote_asset {
                value /= price;
                current = hop.base_asset.clone();
            } else {
                return Err(ConversionError::MissingPair(hop.symbol.clone()));
            }
        }

        if current != to {
            return Err(ConversionError::NoConversionPath {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(value)
    }

    /// Route then convert in one call
    pub fn route_and_convert(
        &self,
        size: f64,
        from: &str,
        to: &str,
        priority: &PriorityList,
    ) -> Result<f64, ConversionError> {
        let path = self.route(from, to, priority)?;
        self.convert_price(size, from, to, &path)
    }

    /// Pair quoting `base_asset` with the largest 24h quote volume, valued in `reference`
    pub fn most_liquid_pair(&self, base_asset: &str, reference: &str, priority: &PriorityList) -> Option<&Pair> {
        let mut best: Option<(&Pair, f64)> = None;
        let mut candidates: Vec<&Market> = self
            .markets
            .values()
            .filter(|m| m.pair.base_asset == base_asset)
            .collect();
        candidates.sort_by(|a, b| a.pair.symbol.cmp(&b.pair.symbol));

        for market in candidates {
            let volume = self
                .route_and_convert(
                    market.ticker.rolling_quote_volume,
                    &market.pair.quote_asset,
                    reference,
                    priority,
                )
                .unwrap_or(0.0);
            if best.map_or(true, |(_, v)| volume > v) {
                best = Some((&market.pair, volume));
            }
        }

        best.map(|(pair, _)| pair)
    }

    /// 24h base volume of an asset across all its pairs, valued in `reference`
    pub fn rolling_reference_volume(&self, base_asset: &str, reference: &str, priority: &PriorityList) -> f64 {
        let base_volume: f64 = self
            .markets
            .values()
            .filter(|m| m.pair.base_asset == base_asset)
            .map(|m| m.ticker.rolling_base_volume)
            .sum();
        self.route_and_convert(base_volume, base_asset, reference, priority)
            .unwrap_or(0.0)
    }

    /// Held asset with the largest value in `reference`
    ///
    /// Returns (asset, value in reference, quantity held). Zero balances and
    /// assets with no route to `reference` are skipped.
    pub fn select_asset_with_biggest_wallet(
        &self,
        balances: &[Balance],
        reference: &str,
        priority: &PriorityList,
    ) -> Option<(String, f64, f64)> {
        balances
            .iter()
            .filter(|b| b.free > 0.0)
            .filter_map(|b| {
                self.route_and_convert(b.free, &b.asset, reference, priority)
                    .ok()
                    .map(|value| (b.asset.clone(), value, b.free))
            })
            .fold(None, |best: Option<(String, f64, f64)>, candidate| match best {
                Some(ref current) if current.1 >= candidate.1 => best,
                _ => Some(candidate),
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::conversion::priority::RoutingProfile;

    pub(crate) fn pair(base: &str, quote: &str) -> Pair {
        Pair {
            symbol: format!("{}{}", base, quote),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            tick_size: 0.01,
            step_size: 0.001,
            quote_precision: 8,
        }
    }

    pub(crate) fn ticker(symbol: &str, close: f64) -> TickSnapshot {
        TickSnapshot {
            symbol: symbol.to_string(),
            base_asset: String::new(),
            quote_asset: String::new(),
            open: close,
            high: close,
            low: close,
            close,
            rolling_base_volume: 1_000.0,
            rolling_quote_volume: 1_000.0 * close,
            bid_price: close * 0.9999,
            bid_qty: 1.0,
            ask_price: close,
            ask_qty: 1.0,
            price_change_percent: 0.0,
            trade_count: 1,
            close_time: 0,
        }
    }

    /// ETH-BTC-USDT triangle without a direct ETHUSDT market
    pub(crate) fn sample_graph() -> ConversionGraph {
        let pairs = vec![
            pair("ETH", "BTC"),
            pair("BTC", "USDT"),
            pair("BNB", "USDT"),
            pair("BNB", "BTC"),
            pair("ADA", "BNB"),
            pair("SOL", "BTC"),
            pair("SOL", "BNB"),
            pair("XRP", "ETH"),
        ];
        let tickers = vec![
            ticker("ETHBTC", 0.05),
            ticker("BTCUSDT", 30_000.0),
            ticker("BNBUSDT", 300.0),
            ticker("BNBBTC", 0.01),
            ticker("ADABNB", 0.001),
            ticker("SOLBTC", 0.001),
            ticker("SOLBNB", 0.1),
            ticker("XRPETH", 0.0),
        ];
        ConversionGraph::build(&pairs, &tickers)
    }

    fn accuracy() -> PriorityList {
        PriorityList::from_profile(RoutingProfile::Accuracy)
    }

    #[test]
    fn test_route_same_asset_is_empty() {
        let graph = sample_graph();
        assert_eq!(graph.route("BTC", "BTC", &accuracy()).unwrap(), Vec::<Hop>::new());
        assert_eq!(graph.convert_price(3.5, "BTC", "BTC", &[]).unwrap(), 3.5);
    }

    #[test]
    fn test_route_eth_to_usdt_via_btc() {
        let graph = sample_graph();

        let path = graph.route("ETH", "USDT", &accuracy()).unwrap();

        let symbols: Vec<&str> = path.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETHBTC", "BTCUSDT"]);
        let value = graph.convert_price(2.0, "ETH", "USDT", &path).unwrap();
        assert!((value - 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_route_priority_breaks_ties() {
        let graph = sample_graph();

        // SOL reaches USDT in two hops through either BTC or BNB
        let path = graph.route("SOL", "USDT", &accuracy()).unwrap();
        assert_eq!(path[0].symbol, "SOLBTC");

        let fees = PriorityList::from_profile(RoutingProfile::Fees);
        let path = graph.route("SOL", "USDT", &fees).unwrap();
        assert_eq!(path[0].symbol, "SOLBNB");
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_route_hops_are_connected() {
        let graph = sample_graph();

        let path = graph.route("ADA", "ETH", &accuracy()).unwrap();

        let mut current = "ADA".to_string();
        for hop in &path {
            current = hop.other_side(&current).unwrap().to_string();
        }
        assert_eq!(current, "ETH");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_route_excludes_dead_markets() {
        let graph = sample_graph();
        assert!(graph.pair("XRPETH").is_none());
        assert!(matches!(
            graph.route("XRP", "USDT", &accuracy()),
            Err(ConversionError::NoConversionPath { .. })
        ));
    }

    #[test]
    fn test_most_liquid_pair() {
        let pairs = vec![pair("BNB", "USDT"), pair("BNB", "BTC"), pair("BTC", "USDT")];
        let mut busy = ticker("BNBBTC", 0.01);
        busy.rolling_quote_volume = 50.0;
        let tickers = vec![ticker("BNBUSDT", 300.0), busy, ticker("BTCUSDT", 30_000.0)];
        let graph = ConversionGraph::build(&pairs, &tickers);

        // 50 BTC = 1.5M USDT beats 300k USDT
        assert_eq!(graph.most_liquid_pair("BNB", "USDT", &accuracy()).unwrap().symbol, "BNBBTC");
        assert!(graph.most_liquid_pair("DOGE", "USDT", &accuracy()).is_none());
    }

    #[test]
    fn test_convert_round_trip() {
        let graph = sample_graph();
        let forward = graph.route("ADA", "USDT", &accuracy()).unwrap();
        let mut backward = forward.clone();
        backward.reverse();

        let usdt = graph.convert_price(1_000.0, "ADA", "USDT", &forward).unwrap();
        let ada = graph.convert_price(usdt, "USDT", "ADA", &backward).unwrap();

        assert!((ada - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_convert_missing_pair() {
        let graph = sample_graph();
        let hop = Hop {
            symbol: "DOGEUSDT".to_string(),
            base_asset: "DOGE".to_string(),
            quote_asset: "USDT".to_string(),
        };
        assert_eq!(
            graph.convert_price(1.0, "DOGE", "USDT", &[hop]),
            Err(ConversionError::MissingPair("DOGEUSDT".to_string()))
        );
    }

    #[test]
    fn test_biggest_wallet_and_liquidity() {
        let graph = sample_graph();
        let balances = vec![
            Balance { asset: "USDT".to_string(), free: 100.0 },
            Balance { asset: "BTC".to_string(), free: 0.01 },
            Balance { asset: "DOGE".to_string(), free: 1e9 },
        ];

        let (asset, value, qty) = graph
            .select_asset_with_biggest_wallet(&balances, "USDT", &accuracy())
            .unwrap();
        assert_eq!(asset, "BTC");
        assert!((value - 300.0).abs() < 1e-9);
        assert_eq!(qty, 0.01);

        assert!((graph.rolling_reference_volume("BNB", "USDT", &accuracy()) - 600_000.0).abs() < 1e-6);
    }
}
