//! Cascade wiring and lifecycle
//!
//! Builds one `AggregationStage` per configured interval, links each stage to
//! the next with a latest-wins hand-off channel and spawns every stage as its
//! own task. Shutdown walks the cascade front to back so each stage can fold
//! in its upstream's final flush before flushing itself.

use super::config::{PipelineConfig, StageConfig};
use super::handoff::{self, HandoffReceiver};
use super::interval::Interval;
use super::screen::LiquidityFilter;
use super::stage::{AggregationStage, StageError, StageSource};
use super::store::SeriesStore;
use super::triggers::Trigger;
use crate::exchange::{Exchange, Pair};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct RunningStage {
    interval: Interval,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), StageError>>,
}

/// Handle to a running cascade
pub struct PipelineHandle {
    stages: Vec<RunningStage>,
    final_output: HandoffReceiver,
}

/// Builder for the stage cascade
pub struct PipelineOrchestrator {
    stages: Vec<StageConfig>,
    exchange: Arc<dyn Exchange>,
    pairs: Arc<Vec<Pair>>,
    store: SeriesStore,
    liquidity: LiquidityFilter,
    trigger_overrides: HashMap<Interval, Arc<dyn Trigger>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: &PipelineConfig,
        exchange: Arc<dyn Exchange>,
        pairs: Arc<Vec<Pair>>,
        store: SeriesStore,
        liquidity: LiquidityFilter,
    ) -> Self {
        Self {
            stages: config.stages.clone(),
            exchange,
            pairs,
            store,
            liquidity,
            trigger_overrides: HashMap::new(),
        }
    }

    /// Use a custom trigger for one stage instead of the configured one
    pub fn with_trigger(mut self, interval: Interval, trigger: Arc<dyn Trigger>) -> Self {
        self.trigger_overrides.insert(interval, trigger);
        self
    }

    /// Spawn every stage; the first polls the exchange, the rest cascade
    pub fn start(mut self) -> PipelineHandle {
        let mut running = Vec::with_capacity(self.stages.len());
        let mut upstream: Option<HandoffReceiver> = None;
        let mut final_output: Option<HandoffReceiver> = None;

        for config in std::mem::take(&mut self.stages) {
            let interval = config.interval;
            let source = match upstream.take() {
                None => StageSource::Exchange {
                    exchange: self.exchange.clone(),
                    pairs: self.pairs.clone(),
                    liquidity: self.liquidity.clone(),
                },
                Some(receiver) => StageSource::Upstream(receiver),
            };

            let (tx, rx) = handoff::channel();
            let mut stage = AggregationStage::new(config, source, self.store.clone(), tx);
            if let Some(trigger) = self.trigger_overrides.remove(&interval) {
                stage = stage.with_trigger(trigger);
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(stage.run(shutdown_rx));
            log::info!("🔄 Stage {} spawned", interval);

            final_output = Some(rx.clone());
            upstream = Some(rx);
            running.push(RunningStage {
                interval,
                shutdown: shutdown_tx,
                handle,
            });
        }

        let final_output = final_output.unwrap_or_else(|| handoff::channel().1);
        log::info!("✅ Cascade started with {} stages", running.len());

        PipelineHandle {
            stages: running,
            final_output,
        }
    }
}

impl PipelineHandle {
    /// Receiver for the last stage's screened output
    pub fn final_output(&self) -> HandoffReceiver {
        self.final_output.clone()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stop stages in cascade order, waiting for each final flush
    ///
    /// Every stage is stopped even if an earlier one failed; the first
    /// error is returned.
    pub async fn shutdown(self) -> Result<(), StageError> {
        let mut first_error = None;

        for stage in self.stages {
            let _ = stage.shutdown.send(true);
            match stage.handle.await {
                Ok(Ok(())) => log::info!("✅ Stage {} shut down", stage.interval),
                Ok(Err(e)) => {
                    log::error!("❌ Stage {} failed: {}", stage.interval, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => log::error!("❌ Stage {} task panicked: {}", stage.interval, e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
