//! Data models for bars, signals, positions, the account ledger and journals.

mod account;
mod equity;
mod market;
mod position;
mod signal;
mod trade;

pub use account::AccountState;
pub use equity::EquitySnapshot;
pub use market::Bar;
pub use position::Position;
pub use signal::{AiVerdict, GradeSource, PatternHit, TrendSignal};
pub use trade::{ExitReason, TradeRecord, TradeSide};
