//! Walk-forward backtest of the momentum trend signal.
//!
//! Long-only and flat/long: open on a trend buy while flat, close on a trend
//! sell while long, close whatever is still open at the last bar. No sizing,
//! fees, AI gate or daily limits; the report is per-trade fractional returns.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::api::MarketData;
use crate::config::SignalConfig;
use crate::models::Bar;
use crate::signals::MomentumSignal;

/// Bars skipped before the first signal is evaluated.
pub const WARMUP_BARS: usize = 60;

/// A completed round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestTrade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    /// (exit - entry) / entry
    pub return_pct: f64,
    /// Closed by the final bar rather than a sell signal
    pub forced_exit: bool,
}

/// Backtest results summary.
#[derive(Debug, Clone)]
pub struct BacktestResults {
    pub symbol: String,
    pub timeframe: String,
    pub bars: usize,
    pub trades: Vec<BacktestTrade>,
    pub avg_return: f64,
    pub total_return: f64,
    pub win_rate: f64,
    pub return_std_dev: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

impl BacktestResults {
    fn from_trades(symbol: &str, timeframe: &str, bars: usize, trades: Vec<BacktestTrade>) -> Self {
        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();

        let (avg_return, total_return, win_rate, return_std_dev, best_trade, worst_trade) =
            if returns.is_empty() {
                (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
            } else {
                let wins = returns.iter().filter(|&&r| r > 0.0).count();
                let std_dev = if returns.len() > 1 { returns.iter().std_dev() } else { 0.0 };
                (
                    returns.iter().mean(),
                    returns.iter().sum::<f64>(),
                    wins as f64 / returns.len() as f64,
                    std_dev,
                    Statistics::max(returns.iter()),
                    Statistics::min(returns.iter()),
                )
            };

        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            bars,
            trades,
            avg_return,
            total_return,
            win_rate,
            return_std_dev,
            best_trade,
            worst_trade,
        }
    }
}

impl fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^60}", " BACKTEST RESULTS ")?;
        writeln!(f)?;
        writeln!(f, "Symbol:      {} ({})", self.symbol, self.timeframe)?;
        writeln!(f, "Bars:        {} ({} warm-up)", self.bars, WARMUP_BARS)?;
        writeln!(f)?;
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Total:       {}", self.trades.len())?;
        writeln!(f, "Win Rate:    {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Avg Return:  {:.3}%", self.avg_return * 100.0)?;
        writeln!(f, "Sum Return:  {:.3}%", self.total_return * 100.0)?;
        writeln!(f, "Std Dev:     {:.3}%", self.return_std_dev * 100.0)?;
        writeln!(f, "Best:        {:.3}%", self.best_trade * 100.0)?;
        writeln!(f, "Worst:       {:.3}%", self.worst_trade * 100.0)?;
        write!(f, "{:=^60}", "")
    }
}

/// Backtesting engine.
pub struct Backtester {
    signal: MomentumSignal,
}

impl Backtester {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            signal: MomentumSignal::new(config),
        }
    }

    /// Fetch history for `symbol` and replay it.
    pub async fn run_symbol(
        &self,
        market_data: Arc<dyn MarketData>,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<BacktestResults> {
        info!(symbol = %symbol, timeframe = %timeframe, limit = limit, "Starting backtest");

        let bars = market_data
            .get_bars(symbol, timeframe, limit)
            .await
            .context("Failed to fetch historical bars")?;

        info!(count = bars.len(), "Fetched historical bars");

        Ok(self.run(symbol, timeframe, &bars))
    }

    /// Replay `bars` (oldest first). Each step sees only bars before it.
    pub fn run(&self, symbol: &str, timeframe: &str, bars: &[Bar]) -> BacktestResults {
        let mut trades = Vec::new();
        let mut open: Option<(DateTime<Utc>, f64)> = None;

        for i in WARMUP_BARS..bars.len() {
            let window = &bars[..i];
            let signal = match self.signal.evaluate(window) {
                Ok(signal) => signal,
                Err(e) => {
                    debug!(bar = i, error = %e, "No signal");
                    continue;
                }
            };
            let last = &window[i - 1];

            match open {
                None if signal.buy => open = Some((last.timestamp, last.close)),
                Some((entry_time, entry_price)) if signal.sell => {
                    trades.push(round_trip(entry_time, entry_price, last, false));
                    open = None;
                }
                _ => {}
            }
        }

        if let (Some((entry_time, entry_price)), Some(last)) = (open, bars.last()) {
            trades.push(round_trip(entry_time, entry_price, last, true));
        }

        BacktestResults::from_trades(symbol, timeframe, bars.len(), trades)
    }
}

fn round_trip(entry_time: DateTime<Utc>, entry_price: f64, exit: &Bar, forced_exit: bool) -> BacktestTrade {
    BacktestTrade {
        entry_time,
        exit_time: exit.timestamp,
        entry_price,
        exit_price: exit.close,
        return_pct: (exit.close - entry_price) / entry_price,
        forced_exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_flat_market_has_no_trades() {
        let bars = bars_from_closes(&[100.0; 120]);
        let results = Backtester::new(&SignalConfig::default()).run("BTC/USDT", "5m", &bars);

        assert!(results.trades.is_empty());
        assert_eq!(results.win_rate, 0.0);
        assert_eq!(results.total_return, 0.0);
    }

    #[test]
    fn test_open_trade_closed_at_last_bar() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes);
        let results = Backtester::new(&SignalConfig::default()).run("BTC/USDT", "5m", &bars);

        assert_eq!(results.trades.len(), 1);
        let trade = &results.trades[0];
        assert!(trade.forced_exit);
        // First evaluated window ends at bar 59
        assert_eq!(trade.entry_price, 159.0);
        assert_eq!(trade.exit_price, 199.0);
        assert!((results.avg_return - 40.0 / 159.0).abs() < 1e-12);
        assert_eq!(results.win_rate, 1.0);
    }

    #[test]
    fn test_rise_then_fall_closes_on_sell() {
        let mut closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        closes.extend((1..=80).map(|i| 179.0 - 2.0 * i as f64));
        let bars = bars_from_closes(&closes);
        let results = Backtester::new(&SignalConfig::default()).run("BTC/USDT", "5m", &bars);

        assert_eq!(results.trades.len(), 1);
        let trade = &results.trades[0];
        assert!(!trade.forced_exit);
        assert!(trade.exit_price < trade.entry_price);
        assert!(results.total_return < 0.0);
        assert_eq!(results.win_rate, 0.0);
        assert_eq!(results.best_trade, results.worst_trade);
    }

    struct StubData(Vec<Bar>);

    #[async_trait]
    impl MarketData for StubData {
        async fn get_bars(&self, _symbol: &str, _timeframe: &str, limit: u32) -> Result<Vec<Bar>> {
            Ok(self.0.iter().take(limit as usize).cloned().collect())
        }
    }

    #[test]
    fn test_run_symbol_respects_limit() {
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + i as f64).collect();
        let data: Arc<dyn MarketData> = Arc::new(StubData(bars_from_closes(&closes)));
        let backtester = Backtester::new(&SignalConfig::default());

        let results = tokio_test::block_on(backtester.run_symbol(data, "ETH/USDT", "1h", 90)).unwrap();
        assert_eq!(results.bars, 90);
        assert_eq!(results.symbol, "ETH/USDT");
        assert!(results.to_string().contains("ETH/USDT (1h)"));
    }
}
