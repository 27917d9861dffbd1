//! In-process message bus
//!
//! Topics are created on first use. Publishing never blocks: a topic with
//! no subscribers drops the update, and a lagging subscriber loses its
//! oldest updates (`RecvError::Lagged`) instead of slowing the publisher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Topic carrying newly selected rotation targets
pub const SCREENED_TOPIC: &str = "screened";

/// A symbol that newly qualified as the rotation target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedUpdate {
    pub symbol: String,
    pub base_asset: String,
    pub close: f64,
    pub last_price_move: f64,
    pub last_volume_move: f64,
    /// Unix seconds
    pub timestamp: i64,
}

pub trait MessageBus: Send + Sync {
    /// Returns how many subscribers received the update
    fn publish(&self, topic: &str, update: ScreenedUpdate) -> usize;

    /// Independent receiver seeing every update published after this call
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<ScreenedUpdate>;
}

/// `tokio::sync::broadcast` channel per topic
pub struct BroadcastBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<ScreenedUpdate>>>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, broadcast::Sender<ScreenedUpdate>>> {
        self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, broadcast::Sender<ScreenedUpdate>>> {
        self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MessageBus for BroadcastBus {
    fn publish(&self, topic: &str, update: ScreenedUpdate) -> usize {
        match self.read().get(topic) {
            Some(tx) => tx.send(update).unwrap_or(0),
            None => 0,
        }
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<ScreenedUpdate> {
        if let Some(tx) = self.read().get(topic) {
            return tx.subscribe();
        }
        let capacity = self.capacity;
        self.write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(symbol: &str) -> ScreenedUpdate {
        ScreenedUpdate {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            close: 1.0,
            last_price_move: 2.0,
            last_volume_move: 3.0,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_independently() {
        let bus = BroadcastBus::default();
        let mut first = bus.subscribe(SCREENED_TOPIC);
        let mut second = bus.subscribe(SCREENED_TOPIC);

        assert_eq!(bus.publish(SCREENED_TOPIC, update("ETHUSDT")), 2);

        assert_eq!(first.recv().await.unwrap().symbol, "ETHUSDT");
        assert_eq!(second.recv().await.unwrap().symbol, "ETHUSDT");
    }

    #[test]
    fn test_publish_without_subscribers_does_not_block() {
        let bus = BroadcastBus::new(1);
        assert_eq!(bus.publish(SCREENED_TOPIC, update("ETHUSDT")), 0);
        assert_eq!(bus.publish("other", update("BTCUSDT")), 0);
    }
}
