//! Account state: the singleton ledger record persisted between runs.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Position;

/// A deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlow {
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    #[serde(default)]
    pub note: String,
}

/// Whole-account ledger state.
///
/// Invariants:
/// - `realized_pnl_absolute` is the sum of every booked exit P&L.
/// - `day_pnl_absolute[d]` is the sum of exit P&L booked on UTC day `d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,

    #[serde(default)]
    pub deposits: Vec<CashFlow>,

    #[serde(default)]
    pub withdrawals: Vec<CashFlow>,

    #[serde(default)]
    pub positions: BTreeMap<String, Position>,

    /// Lifetime sum of per-trade fractional returns
    #[serde(default)]
    pub realized_pnl_fractional: Decimal,

    /// Lifetime realized P&L in quote currency
    #[serde(default)]
    pub realized_pnl_absolute: Decimal,

    #[serde(default)]
    pub day_pnl_fractional: BTreeMap<NaiveDate, Decimal>,

    #[serde(default)]
    pub day_pnl_absolute: BTreeMap<NaiveDate, Decimal>,

    /// Lowest running total of `day_pnl_absolute[d]` seen during day `d`
    #[serde(default)]
    pub day_pnl_low: BTreeMap<NaiveDate, Decimal>,

    /// Consecutive losing exits (reset by a win or a new day)
    #[serde(default)]
    pub loss_streak: u32,

    #[serde(default)]
    pub last_processed_day: Option<NaiveDate>,
}

fn default_base_currency() -> String {
    "USDT".to_string()
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            deposits: Vec::new(),
            withdrawals: Vec::new(),
            positions: BTreeMap::new(),
            realized_pnl_fractional: Decimal::ZERO,
            realized_pnl_absolute: Decimal::ZERO,
            day_pnl_fractional: BTreeMap::new(),
            day_pnl_absolute: BTreeMap::new(),
            day_pnl_low: BTreeMap::new(),
            loss_streak: 0,
            last_processed_day: None,
        }
    }
}

impl AccountState {
    /// Reset per-day counters when the calendar day changed.
    ///
    /// Returns true if a rollover happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if self.last_processed_day == Some(today) {
            return false;
        }
        self.loss_streak = 0;
        self.last_processed_day = Some(today);
        true
    }

    /// Realized P&L booked on `day` (0 if nothing was booked).
    pub fn day_pnl(&self, day: NaiveDate) -> Decimal {
        self.day_pnl_absolute.get(&day).copied().unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of the position for `symbol` (flat if unknown).
    pub fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).cloned().unwrap_or_default()
    }

    /// Book a closed trade into the cumulative and per-day ledgers.
    pub fn book_realized(&mut self, day: NaiveDate, pnl_fractional: Decimal, pnl_absolute: Decimal) {
        self.realized_pnl_fractional += pnl_fractional;
        self.realized_pnl_absolute += pnl_absolute;
        *self.day_pnl_fractional.entry(day).or_insert(Decimal::ZERO) += pnl_fractional;
        let total = self.day_pnl_absolute.entry(day).or_insert(Decimal::ZERO);
        *total += pnl_absolute;
        let total = *total;

        let low = self.day_pnl_low.entry(day).or_insert(Decimal::ZERO);
        *low = (*low).min(total);
    }

    /// Worst realized P&L reached at any point during `day` (never above 0).
    pub fn day_low(&self, day: NaiveDate) -> Decimal {
        self.day_pnl_low.get(&day).copied().unwrap_or(Decimal::ZERO)
    }

    /// Deposits minus withdrawals.
    pub fn net_deposits(&self) -> Decimal {
        let deposited: Decimal = self.deposits.iter().map(|d| d.amount).sum();
        let withdrawn: Decimal = self.withdrawals.iter().map(|w| w.amount).sum();
        deposited - withdrawn
    }

    /// Realized-only equity proxy: net deposits plus lifetime realized P&L.
    ///
    /// Open positions are not marked to market.
    pub fn equity_estimate(&self) -> Decimal {
        self.net_deposits() + self.realized_pnl_absolute
    }

    /// Number of open positions.
    pub fn open_positions(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    pub fn record_deposit(&mut self, amount: Decimal, note: &str, at: DateTime<Utc>) -> Result<()> {
        ensure!(amount > Decimal::ZERO, "Deposit amount must be positive, got {}", amount);
        self.deposits.push(CashFlow {
            timestamp: at,
            amount,
            note: note.to_string(),
        });
        Ok(())
    }

    pub fn record_withdrawal(&mut self, amount: Decimal, note: &str, at: DateTime<Utc>) -> Result<()> {
        ensure!(amount > Decimal::ZERO, "Withdrawal amount must be positive, got {}", amount);
        self.withdrawals.push(CashFlow {
            timestamp: at,
            amount,
            note: note.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_roll_day_resets_loss_streak() {
        let mut state = AccountState::default();
        state.loss_streak = 3;
        state.last_processed_day = Some(day("2024-03-01"));

        assert!(!state.roll_day(day("2024-03-01")));
        assert_eq!(state.loss_streak, 3);

        assert!(state.roll_day(day("2024-03-02")));
        assert_eq!(state.loss_streak, 0);
        assert_eq!(state.last_processed_day, Some(day("2024-03-02")));
    }

    #[test]
    fn test_book_realized_keeps_day_buckets() {
        let mut state = AccountState::default();
        state.book_realized(day("2024-03-01"), dec!(0.07), dec!(17.5));
        state.book_realized(day("2024-03-01"), dec!(-0.02), dec!(-4));
        state.book_realized(day("2024-03-02"), dec!(0.01), dec!(2));

        assert_eq!(state.realized_pnl_absolute, dec!(15.5));
        assert_eq!(state.realized_pnl_fractional, dec!(0.06));
        assert_eq!(state.day_pnl(day("2024-03-01")), dec!(13.5));
        assert_eq!(state.day_pnl(day("2024-03-02")), dec!(2));
        assert_eq!(state.day_pnl(day("2024-03-03")), Decimal::ZERO);
    }

    #[test]
    fn test_day_low_remembers_worst_point() {
        let mut state = AccountState::default();
        state.book_realized(day("2024-03-01"), dec!(0.01), dec!(5));
        assert_eq!(state.day_low(day("2024-03-01")), Decimal::ZERO);

        state.book_realized(day("2024-03-01"), dec!(-0.1), dec!(-60));
        state.book_realized(day("2024-03-01"), dec!(0.1), dec!(40));
        assert_eq!(state.day_pnl(day("2024-03-01")), dec!(-15));
        assert_eq!(state.day_low(day("2024-03-01")), dec!(-55));
        assert_eq!(state.day_low(day("2024-03-02")), Decimal::ZERO);
    }

    #[test]
    fn test_equity_estimate_excludes_open_positions() {
        let mut state = AccountState::default();
        let now = Utc::now();
        state.record_deposit(dec!(1000), "seed", now).unwrap();
        state.record_withdrawal(dec!(100), "", now).unwrap();
        state.book_realized(now.date_naive(), dec!(0.05), dec!(25));
        state.positions.insert(
            "ETH/USDT".to_string(),
            Position::open(dec!(1), dec!(2000), dec!(1900), dec!(2300), Decimal::ZERO, now),
        );

        assert_eq!(state.net_deposits(), dec!(900));
        assert_eq!(state.equity_estimate(), dec!(925));
        // Idempotent: no hidden state consumed by the computation
        assert_eq!(state.equity_estimate(), state.equity_estimate());
    }

    #[test]
    fn test_cash_flows_must_be_positive() {
        let mut state = AccountState::default();
        assert!(state.record_deposit(dec!(0), "", Utc::now()).is_err());
        assert!(state.record_withdrawal(dec!(-5), "", Utc::now()).is_err());
        assert!(state.deposits.is_empty());
        assert!(state.withdrawals.is_empty());
    }

    #[test]
    fn test_json_round_trip_uses_day_keys() {
        let mut state = AccountState::default();
        state.book_realized(day("2024-03-01"), dec!(0.01), dec!(3));

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"2024-03-01\""));

        let back: AccountState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_missing_fields_default() {
        let state: AccountState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, AccountState::default());
    }
}
