//! Position model: the single long position the bot may hold per symbol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Long position in one symbol.
///
/// `quantity == 0` is the flat state. An open position is created with
/// `stop_loss < average_entry_price < take_profit`; afterwards only the
/// trailing ratchet may move the stop (upward) until the whole quantity
/// is sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Units held (0 when flat)
    pub quantity: Decimal,

    /// Average entry price per unit
    pub average_entry_price: Decimal,

    /// Stop-loss price
    pub stop_loss: Decimal,

    /// Take-profit price
    pub take_profit: Decimal,

    /// Trailing distance as a fraction of price (0 disables trailing)
    #[serde(default)]
    pub trailing_pct: Decimal,

    /// When the position was opened
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}

impl Position {
    /// A flat (empty) position.
    pub fn flat() -> Self {
        Self {
            quantity: Decimal::ZERO,
            average_entry_price: Decimal::ZERO,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            trailing_pct: Decimal::ZERO,
            opened_at: None,
        }
    }

    /// Open a new long position.
    ///
    /// A non-positive trailing percentage is stored as 0 (trailing disabled).
    pub fn open(
        quantity: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        trailing_pct: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            quantity,
            average_entry_price: entry_price,
            stop_loss,
            take_profit,
            trailing_pct: trailing_pct.max(Decimal::ZERO),
            opened_at: Some(opened_at),
        }
    }

    /// Check if the position holds anything.
    pub fn is_open(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Fractional return if the position were closed at `price`.
    pub fn return_pct(&self, price: Decimal) -> Decimal {
        if self.average_entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.average_entry_price) / self.average_entry_price
    }

    /// Absolute P&L if the whole position were closed at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.quantity * (price - self.average_entry_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_pnl() {
        let pos = Position::open(dec!(2.5), dec!(100), dec!(94), dec!(106), dec!(0), Utc::now());

        assert!(pos.is_open());
        assert_eq!(pos.return_pct(dec!(107)), dec!(0.07));
        assert_eq!(pos.pnl_at(dec!(107)), dec!(17.5));
        assert_eq!(pos.pnl_at(dec!(94)), dec!(-15));
    }

    #[test]
    fn test_negative_trailing_is_disabled() {
        let pos = Position::open(dec!(1), dec!(100), dec!(98), dec!(103), dec!(-0.02), Utc::now());
        assert_eq!(pos.trailing_pct, Decimal::ZERO);
    }

    #[test]
    fn test_flat_position() {
        let pos = Position::flat();
        assert!(!pos.is_open());
        assert_eq!(pos.return_pct(dec!(10)), Decimal::ZERO);
        assert!(pos.opened_at.is_none());
    }
}
