//! Daily risk gate. Governs new entries only; exits always run.
//!
//! The loss limit latches: once the day's running P&L has touched
//! `-max_daily_loss`, later winning exits the same day do not reopen entries.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::RiskConfig;
use crate::models::AccountState;

/// Whether new entries are allowed today, with the reason when they are not.
pub fn allow_new_entries(state: &AccountState, risk: &RiskConfig, today: NaiveDate) -> (bool, String) {
    let day_pnl = state.day_pnl(today);
    let day_low = state.day_low(today).min(day_pnl);

    if risk.max_daily_loss > Decimal::ZERO && day_low <= -risk.max_daily_loss {
        return (
            false,
            format!(
                "Max daily loss hit (low {} <= -{}, now {})",
                day_low.round_dp(2),
                risk.max_daily_loss,
                day_pnl.round_dp(2)
            ),
        );
    }

    if risk.target_daily_profit > Decimal::ZERO && day_pnl >= risk.target_daily_profit {
        return (
            false,
            format!(
                "Daily profit target reached ({} >= {})",
                day_pnl.round_dp(2),
                risk.target_daily_profit
            ),
        );
    }

    (true, String::new())
}
