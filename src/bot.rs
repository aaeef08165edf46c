//! Run orchestrator: one pass over the configured symbols.
//!
//! Per invocation:
//! - Load the account state once and roll the calendar day
//! - For each symbol, sequentially: fetch bars, evaluate trend / AI gate /
//!   pattern, run the decision engine, journal trades as they happen
//! - Append an equity snapshot and write the account state once
//!
//! A failing collaborator skips only the affected symbol. A failing ledger
//! read or write aborts the run. Concurrent runs must be excluded by the
//! caller (see [`crate::db::RunLock`]).

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::api::{Broker, MarketData, Notifier};
use crate::config::{AppConfig, EngineOptions, ResolvedRuntime, SignalConfig};
use crate::db::{AiDecisionRecord, LedgerStore};
use crate::models::{AccountState, AiVerdict, EquitySnapshot, ExitReason, PatternHit, TradeRecord, TradeSide, TrendSignal};
use crate::signals::{AiGate, Features, MomentumSignal, PatternDetector};
use crate::trading::{
    allow_new_entries, Action, DecisionEngine, EngineSettings, EntryDecision, ExitDecision, SymbolInputs,
    SymbolOutcome,
};

/// Rationale characters kept in the AI decision journal.
const RATIONALE_SNIPPET_CHARS: usize = 160;

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub runtime: ResolvedRuntime,
    pub signals: SignalConfig,
    pub engine: EngineOptions,
    pub settings: EngineSettings,
}

impl BotConfig {
    pub fn from_app(app: &AppConfig, runtime: ResolvedRuntime) -> Self {
        let settings = EngineSettings {
            risk: app.risk.clone(),
            budget: runtime.budget,
            trailing_pct: runtime.trailing_pct,
            require_pattern: app.signals.require_bullish_pattern,
            allow_ai_only: app.engine.allow_ai_only,
        };
        Self {
            runtime,
            signals: app.signals.clone(),
            engine: app.engine.clone(),
            settings,
        }
    }
}

/// External services used during a run.
pub struct Collaborators {
    pub market_data: Arc<dyn MarketData>,
    pub broker: Arc<dyn Broker>,
    pub notifier: Arc<dyn Notifier>,
    pub ai_gate: AiGate,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub day: NaiveDate,
    pub processed: usize,
    pub skipped: usize,
    pub entries: usize,
    pub exits: usize,
    pub stops_raised: usize,
    pub entries_gated: bool,
    pub day_pnl: Decimal,
    pub equity_estimate: Decimal,
    pub open_positions: usize,
    pub actions: Vec<(String, Action)>,
}

impl RunSummary {
    fn new(day: NaiveDate, entries_gated: bool) -> Self {
        Self {
            day,
            processed: 0,
            skipped: 0,
            entries: 0,
            exits: 0,
            stops_raised: 0,
            entries_gated,
            day_pnl: Decimal::ZERO,
            equity_estimate: Decimal::ZERO,
            open_positions: 0,
            actions: Vec::new(),
        }
    }

    fn record(&mut self, outcome: &SymbolOutcome) {
        self.processed += 1;
        if matches!(outcome.exit, ExitDecision::Closed { .. }) {
            self.exits += 1;
        }
        if matches!(outcome.entry, EntryDecision::Opened { .. }) {
            self.entries += 1;
        }
        if outcome.stop_raised.is_some() {
            self.stops_raised += 1;
        }
        self.actions.push((outcome.symbol.clone(), outcome.action()));
    }

    fn record_skip(&mut self, symbol: &str) {
        self.skipped += 1;
        self.actions.push((symbol.to_string(), Action::Skip));
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary {} ===", self.day)?;
        writeln!(f, "Symbols:          {} processed, {} skipped", self.processed, self.skipped)?;
        writeln!(f, "Entries:          {}", self.entries)?;
        writeln!(f, "Exits:            {}", self.exits)?;
        writeln!(f, "Stops Raised:     {}", self.stops_raised)?;
        writeln!(f, "Open Positions:   {}", self.open_positions)?;
        writeln!(f, "Today's P&L:      {}", self.day_pnl.round_dp(4))?;
        writeln!(f, "Equity Estimate:  {}", self.equity_estimate.round_dp(4))?;
        write!(
            f,
            "New Entries:      {}",
            if self.entries_gated { "blocked" } else { "allowed" }
        )?;
        if !self.actions.is_empty() {
            let actions = self
                .actions
                .iter()
                .map(|(s, a)| format!("{}={}", s, a))
                .collect::<Vec<_>>()
                .join(" ");
            write!(f, "\nActions:          {}", actions)?;
        }
        Ok(())
    }
}

/// Single-pass trading bot.
pub struct Bot {
    config: BotConfig,
    store: LedgerStore,
    market_data: Arc<dyn MarketData>,
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
    ai_gate: AiGate,
    trend: MomentumSignal,
    patterns: PatternDetector,
    engine: DecisionEngine,
}

impl Bot {
    pub fn new(config: BotConfig, store: LedgerStore, collaborators: Collaborators) -> Self {
        let trend = MomentumSignal::new(&config.signals);
        let engine = DecisionEngine::new(config.settings.clone());
        Self {
            config,
            store,
            market_data: collaborators.market_data,
            broker: collaborators.broker,
            notifier: collaborators.notifier,
            ai_gate: collaborators.ai_gate,
            trend,
            patterns: PatternDetector::new(),
            engine,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Process every configured symbol once.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let runtime = &self.config.runtime;
        info!(
            symbols = ?runtime.symbols,
            timeframe = %runtime.timeframe,
            exchange = %runtime.exchange,
            dry_run = self.config.engine.dry_run,
            "Starting run"
        );

        let mut state = self.store.load_state().await?;
        let today = now.date_naive();
        if state.roll_day(today) {
            info!(day = %today, "New trading day, loss streak reset");
        }

        let (allowed, gate_reason) = allow_new_entries(&state, &self.config.settings.risk, today);
        if !allowed {
            warn!(reason = %gate_reason, "New entries blocked for today");
            self.notifier
                .send(&format!("Entries blocked for {}: {}", today, gate_reason))
                .await;
        }

        let mut summary = RunSummary::new(today, !allowed);
        let mut journal_error = None;

        for symbol in &runtime.symbols {
            let outcome = match self.process_symbol(&mut state, symbol, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(symbol = %symbol, error = format!("{:#}", e), "Symbol skipped");
                    summary.record_skip(symbol);
                    continue;
                }
            };

            for trade in &outcome.trades {
                if let Err(e) = self.store.append_trade(trade).await {
                    error!(symbol = %symbol, error = %e, "Failed to journal trade");
                    if journal_error.is_none() {
                        journal_error = Some(e);
                    }
                }
                self.notifier.send(&trade_message(trade)).await;
            }
            summary.record(&outcome);
        }

        // State first: orders already went out, the journals can lag behind it
        self.store.save_state(&state).await?;

        let snapshot = EquitySnapshot::from_state(&state, "auto", now);
        if let Err(e) = self.store.append_equity(&snapshot).await {
            error!(error = %e, "Failed to journal equity snapshot");
            if journal_error.is_none() {
                journal_error = Some(e);
            }
        }

        if let Some(e) = journal_error {
            return Err(e.context("Journal incomplete; account state was saved"));
        }

        summary.day_pnl = state.day_pnl(today);
        summary.equity_estimate = snapshot.equity_estimate;
        summary.open_positions = state.open_positions();

        info!(
            entries = summary.entries,
            exits = summary.exits,
            skipped = summary.skipped,
            day_pnl = %summary.day_pnl,
            equity = %summary.equity_estimate,
            "Run complete"
        );

        if self.config.engine.heartbeat {
            self.notifier.send(&summary.to_string()).await;
        }

        Ok(summary)
    }

    /// Gather signals for one symbol and hand them to the engine.
    async fn process_symbol(
        &self,
        state: &mut AccountState,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<SymbolOutcome> {
        let runtime = &self.config.runtime;
        let bars = self
            .market_data
            .get_bars(symbol, &runtime.timeframe, runtime.bar_limit)
            .await
            .with_context(|| format!("No market data for {}", symbol))?;

        let signal = self.trend.evaluate(&bars).context("Trend signal unavailable")?;
        let verdict = self.ai_gate.grade(&bars).await.context("AI grade unavailable")?;
        let pattern = self.patterns.detect(&bars, &self.config.signals.allowed_patterns);

        self.log_symbol(state, symbol, &signal, &verdict, &pattern);

        let peek = if self.config.engine.ai_debug {
            Features::from_bars(&bars).ok().map(|f| f.summary())
        } else {
            None
        };
        let record = self.ai_decision(symbol, &signal, &verdict, &pattern, peek, now);
        if let Err(e) = self.store.append_ai_decision(&record).await {
            warn!(symbol = %symbol, error = %e, "Failed to journal AI decision");
        }

        let inputs = SymbolInputs {
            symbol,
            signal: &signal,
            verdict: &verdict,
            pattern: &pattern,
        };
        Ok(self
            .engine
            .process_symbol(state, &inputs, self.broker.as_ref(), now)
            .await)
    }

    fn log_symbol(
        &self,
        state: &AccountState,
        symbol: &str,
        signal: &TrendSignal,
        verdict: &AiVerdict,
        pattern: &PatternHit,
    ) {
        let pos = state.position(symbol);
        let levels = if pos.is_open() {
            format!("qty={} sl={} tp={}", pos.quantity, pos.stop_loss, pos.take_profit)
        } else {
            "flat".to_string()
        };
        info!(
            "{} price={} | TA buy={} sell={} | AI {:.1}/{:.0}% pass={} src={} | pattern={} | {}",
            symbol,
            signal.price,
            signal.buy,
            signal.sell,
            verdict.score,
            verdict.confidence,
            verdict.passed,
            verdict.source.as_str(),
            pattern.label(),
            levels
        );
    }

    fn ai_decision(
        &self,
        symbol: &str,
        signal: &TrendSignal,
        verdict: &AiVerdict,
        pattern: &PatternHit,
        feature_peek: Option<String>,
        now: DateTime<Utc>,
    ) -> AiDecisionRecord {
        let mut parts: Vec<String> = Vec::new();
        if !verdict.status.is_empty() {
            parts.push(verdict.status.clone());
        }
        if self.config.engine.ai_debug {
            parts.extend(feature_peek);
            if !verdict.rationale.is_empty() {
                parts.push(verdict.rationale.chars().take(RATIONALE_SNIPPET_CHARS).collect());
            }
        }

        AiDecisionRecord {
            timestamp: now.to_rfc3339(),
            symbol: symbol.to_string(),
            price: signal.price.to_f64().unwrap_or_default(),
            score: verdict.score,
            confidence: verdict.confidence,
            passed: verdict.passed,
            source: verdict.source.as_str().to_string(),
            pattern: pattern.label().to_string(),
            ta_buy: signal.buy,
            ta_sell: signal.sell,
            note: parts.join(" | "),
        }
    }
}

/// Human-readable notification for a journaled trade.
fn trade_message(trade: &TradeRecord) -> String {
    match trade.side {
        TradeSide::Buy => format!(
            "BUY {} qty {} @ {} ({})",
            trade.symbol, trade.quantity, trade.price, trade.note
        ),
        TradeSide::Sell => {
            let reason = match trade.exit_reason {
                Some(ExitReason::TakeProfit) => "take profit",
                Some(ExitReason::StopLoss) => "stop loss",
                None => "exit",
            };
            format!(
                "SELL {} qty {} @ {} ({}) P&L {} ({}%)",
                trade.symbol,
                trade.quantity,
                trade.price,
                reason,
                trade.pnl_absolute.unwrap_or_default().round_dp(4),
                (trade.pnl_fractional.unwrap_or_default() * Decimal::ONE_HUNDRED).round_dp(2)
            )
        }
    }
}
