//! Per-symbol entry/exit state machine.
//!
//! Every cycle, for one symbol:
//! 1. Exit track (only when a position is open, regardless of the daily gate):
//!    ratchet the trailing stop, then close on TP, else on SL, else hold.
//!    TP is checked first, so a gapped bar that satisfies both exits as TP.
//! 2. Entry track (only when the symbol was flat at the start of the cycle and
//!    the daily gate allows it): trend buy, AI pass, optional pattern
//!    confirmation, valid levels, non-zero size, then a market buy.
//!
//! Business outcomes are returned as values. The ledger is only mutated after
//! the broker confirmed the order it records.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::api::Broker;
use crate::config::RiskConfig;
use crate::models::{AccountState, AiVerdict, ExitReason, PatternHit, Position, TradeRecord, TrendSignal};

use super::risk_gate::allow_new_entries;
use super::trailing::next_stop;
use super::PositionSizer;

/// Fixed settings for one run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub risk: RiskConfig,
    /// Capital the risk fraction applies to
    pub budget: Decimal,
    /// Trailing distance for new positions (0 disables)
    pub trailing_pct: Decimal,
    /// Require a bullish candlestick before entering
    pub require_pattern: bool,
    /// Testing only: treat the trend buy flag as always true
    pub allow_ai_only: bool,
}

/// What the advisory collaborators said about one symbol this cycle.
#[derive(Debug, Clone)]
pub struct SymbolInputs<'a> {
    pub symbol: &'a str,
    pub signal: &'a TrendSignal,
    pub verdict: &'a AiVerdict,
    pub pattern: &'a PatternHit,
}

/// Result of the exit track.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    /// No open position
    Flat,
    /// Position kept (its stop may have been raised)
    Hold,
    /// Whole position sold
    Closed {
        reason: ExitReason,
        quantity: Decimal,
        price: Decimal,
        pnl_fractional: Decimal,
        pnl_absolute: Decimal,
    },
    /// Exit triggered but the sell failed; quantity and P&L are untouched
    Failed { reason: ExitReason, error: String },
}

/// Why the entry track did nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Symbol held a position at the start of the cycle
    PositionOpen,
    /// A failed exit this cycle blocks entry
    ExitPending,
    GateBlocked(String),
    NoBuySignal,
    AiRejected { score: f64, confidence: f64 },
    NoPattern,
    InvalidLevels,
    ZeroSize,
    BrokerFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PositionOpen => write!(f, "position already open"),
            SkipReason::ExitPending => write!(f, "exit order failed this cycle"),
            SkipReason::GateBlocked(reason) => write!(f, "entries blocked: {}", reason),
            SkipReason::NoBuySignal => write!(f, "no trend buy signal"),
            SkipReason::AiRejected { score, confidence } => {
                write!(f, "AI gate failed ({:.1}/{:.0}%)", score, confidence)
            }
            SkipReason::NoPattern => write!(f, "no bullish pattern"),
            SkipReason::InvalidLevels => write!(f, "signal levels not sl < price < tp"),
            SkipReason::ZeroSize => write!(f, "position size is zero"),
            SkipReason::BrokerFailed(e) => write!(f, "buy failed: {}", e),
        }
    }
}

/// Result of the entry track.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Opened {
        quantity: Decimal,
        price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    Skipped(SkipReason),
}

/// One-word summary of what happened to a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    CloseTakeProfit,
    CloseStopLoss,
    Hold,
    Skip,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Open => "OPEN",
            Action::CloseTakeProfit => "CLOSE_TP",
            Action::CloseStopLoss => "CLOSE_SL",
            Action::Hold => "HOLD",
            Action::Skip => "SKIP",
        };
        write!(f, "{}", s)
    }
}

/// Everything the engine did for one symbol in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub exit: ExitDecision,
    pub entry: EntryDecision,
    /// New stop when the trailing ratchet moved it
    pub stop_raised: Option<Decimal>,
    /// Journal rows to append, in order
    pub trades: Vec<TradeRecord>,
}

impl SymbolOutcome {
    pub fn action(&self) -> Action {
        match (&self.exit, &self.entry) {
            (ExitDecision::Closed { reason: ExitReason::TakeProfit, .. }, _) => Action::CloseTakeProfit,
            (ExitDecision::Closed { reason: ExitReason::StopLoss, .. }, _) => Action::CloseStopLoss,
            (_, EntryDecision::Opened { .. }) => Action::Open,
            (ExitDecision::Hold, _) => Action::Hold,
            _ => Action::Skip,
        }
    }
}

/// Entry/exit decision engine.
pub struct DecisionEngine {
    settings: EngineSettings,
    sizer: PositionSizer,
}

impl DecisionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            sizer: PositionSizer::new(),
        }
    }

    /// Run both tracks for one symbol, mutating `state` in place.
    pub async fn process_symbol(
        &self,
        state: &mut AccountState,
        inputs: &SymbolInputs<'_>,
        broker: &dyn Broker,
        now: DateTime<Utc>,
    ) -> SymbolOutcome {
        let mut trades = Vec::new();
        let was_open = state.position(inputs.symbol).is_open();

        let (exit, stop_raised) = self
            .evaluate_exit(state, inputs.symbol, inputs.signal.price, broker, now, &mut trades)
            .await;

        let entry = if matches!(exit, ExitDecision::Failed { .. }) {
            EntryDecision::Skipped(SkipReason::ExitPending)
        } else if was_open {
            EntryDecision::Skipped(SkipReason::PositionOpen)
        } else {
            self.evaluate_entry(state, inputs, broker, now, &mut trades).await
        };

        if let EntryDecision::Skipped(reason) = &entry {
            if !matches!(reason, SkipReason::PositionOpen) {
                info!(symbol = %inputs.symbol, reason = %reason, "Entry skipped");
            }
        }

        SymbolOutcome {
            symbol: inputs.symbol.to_string(),
            exit,
            entry,
            stop_raised,
            trades,
        }
    }

    async fn evaluate_exit(
        &self,
        state: &mut AccountState,
        symbol: &str,
        price: Decimal,
        broker: &dyn Broker,
        now: DateTime<Utc>,
        trades: &mut Vec<TradeRecord>,
    ) -> (ExitDecision, Option<Decimal>) {
        let mut position = state.position(symbol);
        if !position.is_open() {
            return (ExitDecision::Flat, None);
        }

        let mut stop_raised = None;
        let suggested = next_stop(&position, price);
        if suggested > position.stop_loss {
            info!(symbol = %symbol, from = %position.stop_loss, to = %suggested, "Trailing stop raised");
            position.stop_loss = suggested;
            state.positions.insert(symbol.to_string(), position.clone());
            stop_raised = Some(suggested);
        }

        let reason = if price >= position.take_profit {
            ExitReason::TakeProfit
        } else if price <= position.stop_loss {
            ExitReason::StopLoss
        } else {
            return (ExitDecision::Hold, stop_raised);
        };

        match broker.sell(symbol, position.quantity).await {
            Ok(fill) => debug!(symbol = %symbol, order_id = %fill.order_id, quantity = %fill.quantity, "Exit filled"),
            Err(e) => {
                warn!(symbol = %symbol, reason = reason.as_str(), error = %e, "Exit order failed, position kept");
                return (
                    ExitDecision::Failed {
                        reason,
                        error: e.to_string(),
                    },
                    stop_raised,
                );
            }
        }

        let quantity = position.quantity;
        let pnl_fractional = position.return_pct(price);
        let pnl_absolute = position.pnl_at(price);

        state.book_realized(now.date_naive(), pnl_fractional, pnl_absolute);
        match reason {
            ExitReason::TakeProfit => state.loss_streak = 0,
            ExitReason::StopLoss if pnl_absolute < Decimal::ZERO => state.loss_streak += 1,
            ExitReason::StopLoss => state.loss_streak = 0,
        }
        state.positions.insert(symbol.to_string(), Position::flat());

        trades.push(TradeRecord::sell(
            now,
            symbol,
            quantity,
            price,
            pnl_fractional,
            pnl_absolute,
            reason,
        ));

        info!(
            symbol = %symbol,
            reason = reason.as_str(),
            price = %price,
            pnl = %pnl_absolute.round_dp(4),
            pnl_pct = %(pnl_fractional * Decimal::ONE_HUNDRED).round_dp(2),
            "Position closed"
        );

        (
            ExitDecision::Closed {
                reason,
                quantity,
                price,
                pnl_fractional,
                pnl_absolute,
            },
            stop_raised,
        )
    }

    async fn evaluate_entry(
        &self,
        state: &mut AccountState,
        inputs: &SymbolInputs<'_>,
        broker: &dyn Broker,
        now: DateTime<Utc>,
        trades: &mut Vec<TradeRecord>,
    ) -> EntryDecision {
        let skip = EntryDecision::Skipped;
        let signal = inputs.signal;
        let verdict = inputs.verdict;

        let (allowed, gate_reason) = allow_new_entries(state, &self.settings.risk, now.date_naive());
        if !allowed {
            return skip(SkipReason::GateBlocked(gate_reason));
        }
        if !(signal.buy || self.settings.allow_ai_only) {
            return skip(SkipReason::NoBuySignal);
        }
        if !verdict.passed {
            return skip(SkipReason::AiRejected {
                score: verdict.score,
                confidence: verdict.confidence,
            });
        }
        if self.settings.require_pattern && !inputs.pattern.hit {
            return skip(SkipReason::NoPattern);
        }
        if !signal.levels_valid() {
            return skip(SkipReason::InvalidLevels);
        }

        let requested = self.sizer.size(
            self.settings.budget,
            signal.price,
            self.settings.risk.risk_pct,
            Some(signal.stop_loss),
        );
        if requested <= Decimal::ZERO {
            return skip(SkipReason::ZeroSize);
        }

        // The venue may round the order, the ledger holds what was filled
        let quantity = match broker.buy(inputs.symbol, requested).await {
            Ok(fill) => fill.quantity,
            Err(e) => {
                warn!(symbol = %inputs.symbol, error = %e, "Entry order failed");
                return skip(SkipReason::BrokerFailed(e.to_string()));
            }
        };
        if quantity <= Decimal::ZERO {
            warn!(symbol = %inputs.symbol, requested = %requested, "Entry order filled nothing");
            return skip(SkipReason::ZeroSize);
        }

        let position = Position::open(
            quantity,
            signal.price,
            signal.stop_loss,
            signal.take_profit,
            self.settings.trailing_pct,
            now,
        );
        state.positions.insert(inputs.symbol.to_string(), position);

        trades.push(TradeRecord::buy(
            now,
            inputs.symbol,
            quantity,
            signal.price,
            format!("AI {:.1}/{:.0}%", verdict.score, verdict.confidence),
        ));

        info!(
            symbol = %inputs.symbol,
            quantity = %quantity,
            price = %signal.price,
            sl = %signal.stop_loss,
            tp = %signal.take_profit,
            "Position opened"
        );

        EntryDecision::Opened {
            quantity,
            price: signal.price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
        }
    }
}
