//! Exchange-acceptable order quantities

use super::ConversionError;
use crate::exchange::Pair;

/// Guards `floor` against representation error (0.3 / 0.1 = 2.999...)
const STEP_EPSILON: f64 = 1e-9;

/// Round a quantity down to the pair's step and format it for an order
///
/// `floor((qty - tick_adjustment * tick_size) / step_size) * step_size`,
/// printed with the pair's quote precision and trailing zeros trimmed.
/// Each tick of adjustment shaves one `tick_size` off the quantity, which is
/// how an order rejected for insufficient balance is shrunk on retry.
///
/// # Returns
/// * `Ok(String)` - quantity string ready to send
/// * `Err(NonPositiveQuantity)` - the adjusted quantity rounds to zero or below
pub fn make_tradable_quantity(pair: &Pair, quantity: f64, tick_adjustment: u32) -> Result<String, ConversionError> {
    let adjusted = quantity - f64::from(tick_adjustment) * pair.tick_size;

    let rounded = if pair.step_size > 0.0 {
        ((adjusted / pair.step_size) + STEP_EPSILON).floor() * pair.step_size
    } else {
        adjusted
    };

    if !(rounded > 0.0) || !rounded.is_finite() {
        return Err(ConversionError::NonPositiveQuantity {
            symbol: pair.symbol.clone(),
            quantity: rounded,
        });
    }

    Ok(compact_float_string(rounded, pair.quote_precision))
}

/// Fixed-precision formatting with trailing zeros and dot removed
pub fn compact_float_string(value: f64, precision: u32) -> String {
    let formatted = format!("{:.*}", precision as usize, value);
    if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        formatted
    }
}
