//! Asset rotation driven by the final screened set
//!
//! - `blacklist` - per-asset purchase record with take-profit / stop-loss counters
//! - `orders` - one market order per hop with the tick-adjustment retry
//! - `state_machine` - target selection, rotation, risk evaluation
//! - `config` - risk and rotation settings

pub mod blacklist;
pub mod config;
pub mod orders;
pub mod state_machine;

pub use blacklist::{Blacklist, BlacklistEntry, EntryReason, RiskHit};
pub use config::RiskConfig;
pub use state_machine::{ExecutionState, Trader};

use crate::conversion::ConversionError;
use crate::exchange::ExchangeError;

#[derive(Debug)]
pub enum TraderError {
    Exchange(ExchangeError),
    Conversion(ConversionError),
    /// Every tick adjustment up to the bound was rejected
    TickAdjustmentExhausted { symbol: String, ticks: u32 },
    /// Rotation restarted the maximum number of times without reaching the target
    RotationAttemptsExhausted { target: String, attempts: u32 },
    /// No held asset could be valued in the reference asset
    EmptyWallet,
}

impl std::fmt::Display for TraderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraderError::Exchange(e) => write!(f, "Exchange error: {}", e),
            TraderError::Conversion(e) => write!(f, "Conversion error: {}", e),
            TraderError::TickAdjustmentExhausted { symbol, ticks } => {
                write!(f, "Order on {} still rejected at tick adjustment {}", symbol, ticks)
            }
            TraderError::RotationAttemptsExhausted { target, attempts } => {
                write!(f, "Rotation into {} failed after {} attempts", target, attempts)
            }
            TraderError::EmptyWallet => write!(f, "No valued balance in wallet"),
        }
    }
}

impl std::error::Error for TraderError {}

impl From<ExchangeError> for TraderError {
    fn from(err: ExchangeError) -> Self {
        TraderError::Exchange(err)
    }
}

impl From<ConversionError> for TraderError {
    fn from(err: ConversionError) -> Self {
        TraderError::Conversion(err)
    }
}
