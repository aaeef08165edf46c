//! Trailing stop: a stop-loss that only ever moves up.

use rust_decimal::Decimal;

use crate::models::Position;

/// Suggested stop for `position` after observing `last_price`.
///
/// Never below the current stop. A non-positive trailing percent leaves the
/// stop unchanged.
pub fn next_stop(position: &Position, last_price: Decimal) -> Decimal {
    if position.trailing_pct <= Decimal::ZERO {
        return position.stop_loss;
    }
    let candidate = last_price * (Decimal::ONE - position.trailing_pct);
    candidate.max(position.stop_loss)
}
