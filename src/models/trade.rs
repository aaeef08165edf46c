//! Trade journal records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TP",
            ExitReason::StopLoss => "SL",
        }
    }
}

/// One row of the append-only trade journal.
///
/// BUY rows never carry P&L; SELL rows always do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub pnl_fractional: Option<Decimal>,
    pub pnl_absolute: Option<Decimal>,
    pub note: String,
    pub exit_reason: Option<ExitReason>,
}

impl TradeRecord {
    /// Entry record (no P&L).
    pub fn buy(
        timestamp: DateTime<Utc>,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        note: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            side: TradeSide::Buy,
            symbol: symbol.to_string(),
            quantity,
            price,
            pnl_fractional: None,
            pnl_absolute: None,
            note: note.into(),
            exit_reason: None,
        }
    }

    /// Exit record; the note is the exit reason code.
    pub fn sell(
        timestamp: DateTime<Utc>,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        pnl_fractional: Decimal,
        pnl_absolute: Decimal,
        reason: ExitReason,
    ) -> Self {
        Self {
            timestamp,
            side: TradeSide::Sell,
            symbol: symbol.to_string(),
            quantity,
            price,
            pnl_fractional: Some(pnl_fractional),
            pnl_absolute: Some(pnl_absolute),
            note: reason.as_str().to_string(),
            exit_reason: Some(reason),
        }
    }
}
