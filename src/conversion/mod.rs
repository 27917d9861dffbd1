//! Currency conversion over the live pair graph
//!
//! - `graph` - asset graph built from exchange pairs and the latest tickers, BFS routing
//! - `pricing` - exchange-acceptable quantity formatting
//! - `priority` - routing profiles deciding neighbor order during BFS

pub mod graph;
pub mod pricing;
pub mod priority;

pub use graph::{ConversionGraph, Hop};
pub use pricing::make_tradable_quantity;
pub use priority::{PriorityList, RoutingConfig, RoutingProfile};

/// Errors raised while routing or converting between assets
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// BFS exhausted the graph without reaching the target
    NoConversionPath { from: String, to: String },
    /// A hop references a pair that is not in the current snapshot
    MissingPair(String),
    /// Quantity rounded down to zero or below
    NonPositiveQuantity { symbol: String, quantity: f64 },
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionError::NoConversionPath { from, to } => {
                write!(f, "No conversion path from {} to {}", from, to)
            }
            ConversionError::MissingPair(symbol) => write!(f, "Missing pair in snapshot: {}", symbol),
            ConversionError::NonPositiveQuantity { symbol, quantity } => {
                write!(f, "Non-positive tradable quantity for {}: {}", symbol, quantity)
            }
        }
    }
}

impl std::error::Error for ConversionError {}
