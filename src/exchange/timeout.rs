//! Per-call deadline for every exchange operation
//!
//! An expired read is reported as a transient `Timeout`, so stages keep their
//! previous state and retry on the next tick. An expired order is also
//! reported as `Timeout`; the trader treats it as an aborted hop and
//! re-reads balances before trying again, since the order may or may not
//! have executed.

use super::{Balance, Exchange, ExchangeError, Fill, OrderSide, Pair};
use crate::pipeline::interval::Interval;
use crate::pipeline::types::{Bar, TickSnapshot};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct TimeoutExchange {
    inner: Arc<dyn Exchange>,
    timeout: Duration,
}

impl TimeoutExchange {
    pub fn new(inner: Arc<dyn Exchange>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ExchangeError>
    where
        F: Future<Output = Result<T, ExchangeError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("⏳ {} exceeded {}ms", operation, self.timeout.as_millis());
                Err(ExchangeError::Timeout {
                    operation,
                    millis: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl Exchange for TimeoutExchange {
    async fn get_ticker(&self) -> Result<Vec<TickSnapshot>, ExchangeError> {
        self.guarded("get_ticker", self.inner.get_ticker()).await
    }

    async fn get_exchange_info(&self) -> Result<Vec<Pair>, ExchangeError> {
        self.guarded("get_exchange_info", self.inner.get_exchange_info()).await
    }

    async fn get_historical_bars(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        self.guarded(
            "get_historical_bars",
            self.inner.get_historical_bars(symbol, interval, lookback),
        )
        .await
    }

    async fn create_market_order(
        &self,
        pair: &Pair,
        side: OrderSide,
        quote_qty: &str,
    ) -> Result<Fill, ExchangeError> {
        self.guarded(
            "create_market_order",
            self.inner.create_market_order(pair, side, quote_qty),
        )
        .await
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        self.guarded("get_balances", self.inner.get_balances()).await
    }
}
