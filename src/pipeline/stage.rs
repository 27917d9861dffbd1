//! Aggregation stage: one interval of the cascade
//!
//! A stage owns its series and screened set. Each iteration takes the
//! previous `StageState` plus one input (a ticker poll or an upstream batch)
//! and returns the next `StageState`; the run loop only sequences fetch,
//! process, publish and persist around that pure step.
//!
//! Raw stage (first in the cascade):
//! ```text
//! ticks -> merge_raw -> resample -> trim -> tradable universe -> screen
//! ```
//!
//! Cascaded stage:
//! ```text
//! upstream batch -> pending (open buckets) -> resample -> merge_derived
//!     -> collapse -> resample -> [recover volumes] -> trim -> screen
//! ```

use super::config::StageConfig;
use super::handoff::{HandoffReceiver, HandoffSender, StageOutput};
use super::interval::Interval;
use super::screen::{append_screened, screen, tradable_universe, LiquidityFilter};
use super::series::{collapse_recomputed, merge_derived, merge_raw, min_timestamp, resample, trim};
use super::store::{SeriesStore, StoreError};
use super::triggers::Trigger;
use super::types::{Bar, ScreenedSet, TickSnapshot};
use super::volume::recover_volumes;
use crate::conversion::ConversionGraph;
use crate::exchange::{Exchange, ExchangeError, Pair};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Buckets per symbol still recomputed from upstream rows
const OPEN_BUCKETS: usize = 2;

#[derive(Debug)]
pub enum StageError {
    Store(StoreError),
    Exchange(ExchangeError),
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        StageError::Store(err)
    }
}

impl From<ExchangeError> for StageError {
    fn from(err: ExchangeError) -> Self {
        StageError::Exchange(err)
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Store(e) => write!(f, "Stage store error: {}", e),
            StageError::Exchange(e) => write!(f, "Stage exchange error: {}", e),
        }
    }
}

impl std::error::Error for StageError {}

/// Where a stage gets its rows from
pub enum StageSource {
    /// Poll the exchange ticker; only the first stage of a cascade
    Exchange {
        exchange: Arc<dyn Exchange>,
        pairs: Arc<Vec<Pair>>,
        liquidity: LiquidityFilter,
    },
    /// Consume the previous stage's published batches
    Upstream(HandoffReceiver),
}

/// Everything a stage carries from one iteration to the next
#[derive(Debug, Clone, Default)]
pub struct StageState {
    pub series: Vec<Bar>,
    /// Upstream rows belonging to this stage's open buckets
    pub pending: Vec<Bar>,
    pub screened: ScreenedSet,
    /// Symbols eligible for screening (tradable set or upstream screened set)
    pub universe: ScreenedSet,
    /// Oldest timestamp still retained
    pub cursor: Option<i64>,
}

/// One unit of work for `process`
#[derive(Debug, Clone)]
pub enum StageInput {
    Ticks { ticks: Vec<TickSnapshot>, polled_at: i64 },
    Upstream(Arc<StageOutput>),
}

pub struct AggregationStage {
    config: StageConfig,
    source: StageSource,
    store: SeriesStore,
    trigger: Arc<dyn Trigger>,
    output: HandoffSender,
    last_persist: Option<Instant>,
}

impl AggregationStage {
    pub fn new(config: StageConfig, source: StageSource, store: SeriesStore, output: HandoffSender) -> Self {
        let trigger = config.trigger.build();
        Self {
            config,
            source,
            store,
            trigger,
            output,
            last_persist: None,
        }
    }

    /// Replace the configured trigger with a custom one
    pub fn with_trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn interval(&self) -> Interval {
        self.config.interval
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.source, StageSource::Exchange { .. })
    }

    /// Build the starting state
    ///
    /// Cascaded stages reload their persisted series and screened set; the
    /// raw stage starts from one ticker poll. Either way the series is
    /// trimmed and the cursor set to its oldest timestamp.
    pub async fn init(&mut self) -> Result<StageState, StageError> {
        let interval = self.config.interval;
        self.store.ensure_tables(interval)?;

        let mut state = if self.is_raw() {
            match self.fetch().await {
                Ok(Some(input)) => self.process(StageState::default(), input),
                Ok(None) => StageState::default(),
                Err(e) => {
                    log::warn!("⚠️  [{}] Initial ticker poll failed: {}", interval, e);
                    StageState::default()
                }
            }
        } else {
            let screened = self.store.load_screened(interval)?;
            StageState {
                series: self.store.load_bars(interval)?,
                universe: screened.clone(),
                screened,
                ..StageState::default()
            }
        };

        state.series = trim(state.series, self.config.buffer_size);
        state.cursor = min_timestamp(&state.series);

        log::info!(
            "✅ [{}] Stage initialized: {} rows, {} screened, cursor {:?}",
            interval,
            state.series.len(),
            state.screened.len(),
            state.cursor
        );
        Ok(state)
    }

    /// Pull the next input
    ///
    /// Returns `Ok(None)` when a cascaded stage has no new upstream batch.
    pub async fn fetch(&mut self) -> Result<Option<StageInput>, StageError> {
        match &mut self.source {
            StageSource::Exchange { exchange, .. } => {
                let ticks = exchange.get_ticker().await?;
                Ok(Some(StageInput::Ticks {
                    ticks,
                    polled_at: chrono::Utc::now().timestamp(),
                }))
            }
            StageSource::Upstream(receiver) => Ok(receiver.take_latest().map(StageInput::Upstream)),
        }
    }

    /// One iteration: fold `input` into `state` and screen the result
    pub fn process(&self, state: StageState, input: StageInput) -> StageState {
        let interval = self.config.interval;
        let buffer = self.config.buffer_size;

        let (series, pending, universe) = match (input, &self.source) {
            (StageInput::Ticks { ticks, polled_at }, StageSource::Exchange { pairs, liquidity, .. }) => {
                let raw: Vec<Bar> = ticks.iter().map(|t| Bar::from_tick(t, polled_at)).collect();
                let series = trim(resample(merge_raw(state.series, raw), interval), buffer);
                let graph = ConversionGraph::build(pairs, &ticks);
                let universe = tradable_universe(&ticks, &series, &graph, liquidity);
                (series, Vec::new(), universe)
            }
            (StageInput::Upstream(batch), _) => {
                let pending = open_bucket_rows(
                    collapse_recomputed(merge_derived(state.pending, batch.bars.clone())),
                    interval,
                );
                let fresh = resample(pending.clone(), interval);
                let mut series = resample(collapse_recomputed(merge_derived(state.series, fresh)), interval);
                if self.config.recover_volumes {
                    series = recover_volumes(series);
                }
                (trim(series, buffer), pending, batch.screened.clone())
            }
            (StageInput::Ticks { .. }, StageSource::Upstream(_)) => {
                log::warn!("⚠️  [{}] Ticker input on a cascaded stage ignored", interval);
                (state.series, state.pending, state.universe)
            }
        };

        let screened_now = screen(&series, &universe, self.trigger.as_ref());
        let screened = if self.config.append_screened {
            append_screened(&state.screened, screened_now, self.config.screened_roll)
        } else {
            screened_now
        };

        log::debug!(
            "📊 [{}] {} rows, {} in universe, {} screened by {}",
            interval,
            series.len(),
            universe.len(),
            screened.len(),
            self.trigger.name()
        );

        StageState {
            cursor: min_timestamp(&series),
            series,
            pending,
            screened,
            universe,
        }
    }

    /// Publish the newest bars and screened set downstream
    pub fn publish(&self, state: &StageState) {
        self.output.publish(StageOutput::new(
            self.config.interval,
            &state.series,
            state.screened.clone(),
            chrono::Utc::now().timestamp(),
        ));
    }

    /// Write series and screened set, at most once per persist interval unless forced
    ///
    /// Returns true when a write happened.
    pub fn persist(&mut self, state: &StageState, force: bool) -> Result<bool, StageError> {
        let due = self
            .last_persist
            .map_or(true, |at| at.elapsed() >= Duration::from_millis(self.config.persist_interval_ms));
        if !force && !due {
            return Ok(false);
        }

        let interval = self.config.interval;
        self.store.replace_bars(interval, &state.series)?;
        self.store.replace_screened(interval, &state.screened)?;
        self.last_persist = Some(Instant::now());

        log::debug!(
            "💾 [{}] Persisted {} rows, {} screened (cursor {:?})",
            interval,
            state.series.len(),
            state.screened.len(),
            state.cursor
        );
        Ok(true)
    }

    /// Final flush: resample, trim, persist, screen, persist screened
    pub fn shutdown(&mut self, mut state: StageState) -> Result<StageState, StageError> {
        let interval = self.config.interval;
        state.series = trim(resample(state.series, interval), self.config.buffer_size);
        state.cursor = min_timestamp(&state.series);
        self.store.replace_bars(interval, &state.series)?;

        let screened_now = screen(&state.series, &state.universe, self.trigger.as_ref());
        state.screened = if self.config.append_screened {
            append_screened(&state.screened, screened_now, self.config.screened_roll)
        } else {
            screened_now
        };
        self.store.replace_screened(interval, &state.screened)?;
        self.publish(&state);

        log::info!(
            "💾 [{}] Final flush: {} rows, {} screened",
            interval,
            state.series.len(),
            state.screened.len()
        );
        Ok(state)
    }

    /// Run until `shutdown` flips to true, then flush once
    ///
    /// The delay is slept after each iteration completes. Fetch failures keep
    /// the previous state and retry on the next tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), StageError> {
        let interval = self.config.interval;
        let delay = Duration::from_millis(self.config.delay_ms);
        let mut state = self.init().await?;
        self.publish(&state);

        log::info!("🚀 [{}] Stage running (delay {}ms, trigger {})", interval, self.config.delay_ms, self.trigger.name());

        while !*shutdown.borrow() {
            state = self.step(state).await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        log::warn!("⚠️  [{}] Shutdown channel closed, stopping", interval);
                        break;
                    }
                }
            }
        }

        // Fold in whatever the upstream published during its own shutdown
        if !self.is_raw() {
            state = self.step(state).await;
        }
        self.shutdown(state)?;
        log::info!("✅ [{}] Stage stopped", interval);
        Ok(())
    }

    async fn step(&mut self, state: StageState) -> StageState {
        let interval = self.config.interval;
        match self.fetch().await {
            Ok(Some(input)) => {
                let next = self.process(state, input);
                self.publish(&next);
                if let Err(e) = self.persist(&next, false) {
                    log::error!("❌ [{}] Persist failed: {}", interval, e);
                }
                next
            }
            Ok(None) => {
                log::debug!("[{}] No new upstream batch", interval);
                state
            }
            Err(e) => {
                log::warn!("⚠️  [{}] Fetch failed, keeping previous state: {}", interval, e);
                state
            }
        }
    }
}

/// Rows whose bucket is among the symbol's newest `OPEN_BUCKETS` buckets
fn open_bucket_rows(rows: Vec<Bar>, interval: Interval) -> Vec<Bar> {
    let mut buckets: HashMap<String, BTreeSet<i64>> = HashMap::new();
    for row in &rows {
        buckets
            .entry(row.symbol.clone())
            .or_default()
            .insert(interval.floor(row.timestamp));
    }
    let cutoffs: HashMap<String, i64> = buckets
        .into_iter()
        .filter_map(|(symbol, set)| {
            let cutoff = set.iter().rev().take(OPEN_BUCKETS).last().copied()?;
            Some((symbol, cutoff))
        })
        .collect();

    rows.into_iter()
        .filter(|row| {
            cutoffs
                .get(&row.symbol)
                .map_or(false, |cutoff| interval.floor(row.timestamp) >= *cutoff)
        })
        .collect()
}
