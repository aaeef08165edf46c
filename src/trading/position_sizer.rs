//! Fixed-fractional risk sizing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Smallest per-unit risk used as a divisor.
const RISK_EPSILON: Decimal = dec!(0.00000001);

/// Per-unit risk proxy when no usable stop is given (1% of price).
const FALLBACK_RISK_FRACTION: Decimal = dec!(0.01);

/// Converts a risk budget into a position quantity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSizer;

impl PositionSizer {
    pub fn new() -> Self {
        Self
    }

    /// Quantity such that hitting `stop_loss` loses `budget * risk_fraction`.
    ///
    /// quantity = (budget * risk_fraction) / max(price - stop_loss, epsilon)
    ///
    /// Returns 0 when `price <= 0`. A missing stop, or one at or above the
    /// price, is replaced by a 1% risk proxy. The result is floored at 0;
    /// no upper bound is applied here.
    pub fn size(
        &self,
        budget: Decimal,
        price: Decimal,
        risk_fraction: Decimal,
        stop_loss: Option<Decimal>,
    ) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let per_unit_risk = match stop_loss {
            Some(sl) if sl < price => price - sl,
            _ => price * FALLBACK_RISK_FRACTION,
        };

        let quantity = (budget * risk_fraction) / per_unit_risk.max(RISK_EPSILON);
        quantity.max(Decimal::ZERO)
    }
}
