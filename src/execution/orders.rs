//! One market order per conversion hop
//!
//! Orders are sized in the quote asset (`quoteOrderQty`): a BUY spends the
//! held quote amount, a SELL first converts the held base amount to quote at
//! the hop's close. When the exchange answers with insufficient balance the
//! quantity is shaved by a tick adjustment that doubles (1, 2, 4, ...) up to
//! a fixed bound; a quantity that rounds to zero takes the same path.

use super::TraderError;
use crate::conversion::{make_tradable_quantity, ConversionError, ConversionGraph, Hop};
use crate::exchange::{Exchange, Fill, OrderSide};

/// Result of one executed hop
#[derive(Debug, Clone, PartialEq)]
pub struct HopOutcome {
    pub fill: Fill,
    /// Asset now held
    pub received_asset: String,
    /// Quantity of `received_asset` credited by the fill
    pub received_qty: f64,
    /// Tick adjustment the accepted order used
    pub ticks: u32,
}

/// 0 → 1, then doubling
pub fn next_tick_adjustment(ticks: u32) -> u32 {
    if ticks == 0 {
        1
    } else {
        ticks.saturating_mul(2)
    }
}

/// Trade `quantity` of `from` across `hop`
///
/// # Returns
/// * `Ok(outcome)` - order filled
/// * `Err(TickAdjustmentExhausted)` - every adjustment up to `max_tick_adjustment` was rejected
/// * `Err(Exchange)` - any other rejection or failure; the caller aborts the rotation
pub async fn execute_hop(
    exchange: &dyn Exchange,
    graph: &ConversionGraph,
    hop: &Hop,
    from: &str,
    quantity: f64,
    max_tick_adjustment: u32,
) -> Result<HopOutcome, TraderError> {
    let pair = graph
        .pair(&hop.symbol)
        .ok_or_else(|| ConversionError::MissingPair(hop.symbol.clone()))?;
    let received_asset = hop
        .other_side(from)
        .ok_or_else(|| ConversionError::MissingPair(hop.symbol.clone()))?
        .to_string();

    let side = if from == pair.base_asset {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    };
    let quote_quantity = match side {
        OrderSide::Sell => graph.convert_price(quantity, from, &received_asset, std::slice::from_ref(hop))?,
        OrderSide::Buy => quantity,
    };

    let mut ticks = 0u32;
    while ticks <= max_tick_adjustment {
        let order_qty = match make_tradable_quantity(pair, quote_quantity, ticks) {
            Ok(qty) => qty,
            Err(e) => {
                log::debug!("   ├─ {} (ticks={})", e, ticks);
                ticks = next_tick_adjustment(ticks);
                continue;
            }
        };

        log::info!(
            "🔄 {} {} quote_qty={} (ticks={})",
            side.as_str(),
            pair.symbol,
            order_qty,
            ticks
        );

        match exchange.create_market_order(pair, side, &order_qty).await {
            Ok(fill) => {
                let received_qty = match side {
                    OrderSide::Buy => fill.executed_qty,
                    OrderSide::Sell => fill.cumulative_quote_qty,
                };
                return Ok(HopOutcome {
                    fill,
                    received_asset,
                    received_qty,
                    ticks,
                });
            }
            Err(e) if e.is_insufficient_balance() => {
                log::warn!("⚠️  {} rejected at ticks={}: {}", pair.symbol, ticks, e);
                ticks = next_tick_adjustment(ticks);
            }
            Err(e) => {
                log::error!("❌ {} {} failed: {}", side.as_str(), pair.symbol, e);
                return Err(e.into());
            }
        }
    }

    Err(TraderError::TickAdjustmentExhausted {
        symbol: pair.symbol.clone(),
        ticks,
    })
}
