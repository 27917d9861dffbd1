//! Latest-wins hand-off between adjacent stages
//!
//! Each stage publishes its newest bars and screened set on a
//! `tokio::sync::watch` channel. The channel holds exactly one value: the
//! producer never blocks, and a consumer that falls behind skips straight to
//! the newest batch. A batch holds only the newest two bars per symbol, so
//! a consumer that skips batches also skips any upstream bars that were
//! published and replaced in between.

use super::interval::Interval;
use super::series::trim;
use super::types::{Bar, ScreenedSet};
use std::sync::Arc;
use tokio::sync::watch;

/// Bars kept per symbol in every published batch
pub const HANDOFF_BARS_PER_SYMBOL: usize = 2;

/// One published batch
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub interval: Interval,
    /// Newest bars per symbol (at most `HANDOFF_BARS_PER_SYMBOL`)
    pub bars: Vec<Bar>,
    pub screened: ScreenedSet,
    /// Unix seconds at publication
    pub produced_at: i64,
}

impl StageOutput {
    pub fn new(interval: Interval, series: &[Bar], screened: ScreenedSet, produced_at: i64) -> Self {
        Self {
            interval,
            bars: trim(series.to_vec(), HANDOFF_BARS_PER_SYMBOL),
            screened,
            produced_at,
        }
    }
}

type Slot = Option<Arc<StageOutput>>;

/// Producer side, owned by the publishing stage
pub struct HandoffSender {
    tx: watch::Sender<Slot>,
}

/// Consumer side; cloning gives an independent cursor
#[derive(Clone)]
pub struct HandoffReceiver {
    rx: watch::Receiver<Slot>,
}

pub fn channel() -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = watch::channel(None);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl HandoffSender {
    /// Replace the current batch. Never blocks, succeeds with no consumers.
    pub fn publish(&self, output: StageOutput) {
        self.tx.send_replace(Some(Arc::new(output)));
    }

    pub fn subscribe(&self) -> HandoffReceiver {
        HandoffReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl HandoffReceiver {
    /// Newest batch not yet seen by this receiver, if any
    pub fn take_latest(&mut self) -> Option<Arc<StageOutput>> {
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            _ => None,
        }
    }

    /// Newest batch regardless of whether it was seen before
    pub fn peek(&self) -> Option<Arc<StageOutput>> {
        self.rx.borrow().clone()
    }

    /// Wait until a new batch is published. Returns false once the sender is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::series::tests::bar;

    fn output(close: f64) -> StageOutput {
        let series: Vec<Bar> = (0..5).map(|i| bar("ETHUSDT", i * 60, close, 1.0, 1.0)).collect();
        StageOutput::new(Interval::Min1, &series, ScreenedSet::default(), 0)
    }

    #[test]
    fn test_batch_holds_two_newest_bars() {
        let out = output(1.0);
        assert_eq!(out.bars.iter().map(|b| b.timestamp).collect::<Vec<_>>(), vec![180, 240]);
    }

    #[test]
    fn test_latest_wins_and_is_seen_once() {
        let (tx, mut rx) = channel();
        assert!(rx.take_latest().is_none());

        tx.publish(output(1.0));
        tx.publish(output(2.0));
        tx.publish(output(3.0));

        let latest = rx.take_latest().unwrap();
        assert_eq!(latest.bars[0].close, 3.0);
        assert!(rx.take_latest().is_none());
        assert_eq!(rx.peek().unwrap().bars[0].close, 3.0);
    }

    #[test]
    fn test_publish_without_consumers() {
        let (tx, rx) = channel();
        drop(rx);
        tx.publish(output(1.0));

        let mut late = tx.subscribe();
        assert!(late.peek().is_some());
        assert!(late.take_latest().is_none());
    }

    #[tokio::test]
    async fn test_changed_wakes_consumer() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move {
            let woke = rx.changed().await;
            (woke, rx.take_latest().map(|o| o.bars.len()))
        });

        tx.publish(output(1.0));
        let (woke, len) = waiter.await.unwrap();

        assert!(woke);
        // changed() marks the value seen
        assert_eq!(len, None);
    }
}
