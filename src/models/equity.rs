//! Equity journal records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AccountState;

/// One row of the append-only equity journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity_estimate: Decimal,
    pub net_deposits: Decimal,
    pub realized_pnl_fractional: Decimal,
    pub note: String,
}

impl EquitySnapshot {
    /// Realized-only snapshot derived from the ledger.
    pub fn from_state(state: &AccountState, note: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            equity_estimate: state.equity_estimate(),
            net_deposits: state.net_deposits(),
            realized_pnl_fractional: state.realized_pnl_fractional,
            note: note.into(),
        }
    }

    /// Snapshot with an externally observed equity value.
    pub fn manual(
        state: &AccountState,
        equity: Decimal,
        note: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            equity_estimate: equity,
            ..Self::from_state(state, note, at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut state = AccountState::default();
        let now = Utc::now();
        state.record_deposit(dec!(500), "seed", now).unwrap();
        state.book_realized(now.date_naive(), dec!(0.02), dec!(10));

        let a = EquitySnapshot::from_state(&state, "auto", now);
        let b = EquitySnapshot::from_state(&state, "auto", now);
        assert_eq!(a, b);
        assert_eq!(a.equity_estimate, dec!(510));
        assert_eq!(a.net_deposits, dec!(500));
    }

    #[test]
    fn test_manual_snapshot_overrides_equity_only() {
        let mut state = AccountState::default();
        let now = Utc::now();
        state.record_deposit(dec!(500), "seed", now).unwrap();

        let snap = EquitySnapshot::manual(&state, dec!(480), "manual snapshot", now);
        assert_eq!(snap.equity_estimate, dec!(480));
        assert_eq!(snap.net_deposits, dec!(500));
        assert_eq!(snap.note, "manual snapshot");
    }
}
