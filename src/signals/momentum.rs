//! Momentum breakout trend signal.
//!
//! buy  = SMA(short) > SMA(long) and close breaks the previous bar's N-bar high
//! sell = SMA(short) < SMA(long) and close breaks the previous bar's N-bar low
//! stop = close - 2*ATR, target = close + 3*ATR

use rust_decimal::Decimal;

use crate::config::SignalConfig;
use crate::models::{Bar, TrendSignal};

use super::{mean, SignalError};

/// Trend signal generator.
#[derive(Debug, Clone)]
pub struct MomentumSignal {
    lookback_short: usize,
    lookback_long: usize,
    atr_len: usize,
    breakout_len: usize,
}

impl MomentumSignal {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            lookback_short: config.lookback_short,
            lookback_long: config.lookback_long,
            atr_len: config.atr_len,
            breakout_len: config.breakout_len,
        }
    }

    /// Bars needed before a signal can be computed.
    pub fn min_bars(&self) -> usize {
        self.lookback_short
            .max(self.lookback_long)
            .max(self.atr_len)
            .max(self.breakout_len + 1)
    }

    /// Evaluate the latest bar.
    pub fn evaluate(&self, bars: &[Bar]) -> Result<TrendSignal, SignalError> {
        let n = bars.len();
        if n < self.min_bars() {
            return Err(SignalError::InsufficientBars {
                needed: self.min_bars(),
                got: n,
            });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let short = mean(&closes[n - self.lookback_short..]);
        let long = mean(&closes[n - self.lookback_long..]);

        let ranges: Vec<f64> = bars[n - self.atr_len..].iter().map(|b| b.range()).collect();
        let atr = mean(&ranges);

        // Breakout band as of the previous bar
        let window = &bars[n - 1 - self.breakout_len..n - 1];
        let breakout_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let breakout_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let close = closes[n - 1];
        let momentum = short - long;

        let buy = momentum > 0.0 && close > breakout_high;
        let sell = momentum < 0.0 && close < breakout_low;

        Ok(TrendSignal {
            buy,
            sell,
            price: to_decimal(close, "price")?,
            stop_loss: to_decimal(close - 2.0 * atr, "stop_loss")?.round_dp(8),
            take_profit: to_decimal(close + 3.0 * atr, "take_profit")?.round_dp(8),
        })
    }
}

fn to_decimal(value: f64, field: &'static str) -> Result<Decimal, SignalError> {
    Decimal::try_from(value).map_err(|_| SignalError::NonFinite(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

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
    fn test_uptrend_breakout_buys() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let signal = MomentumSignal::new(&SignalConfig::default())
            .evaluate(&bars_from_closes(&closes))
            .unwrap();

        assert!(signal.buy);
        assert!(!signal.sell);
        assert_eq!(signal.price, dec!(159));
        assert_eq!(signal.stop_loss, dec!(157));
        assert_eq!(signal.take_profit, dec!(162));
        assert!(signal.levels_valid());
    }

    #[test]
    fn test_downtrend_breakdown_sells() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let signal = MomentumSignal::new(&SignalConfig::default())
            .evaluate(&bars_from_closes(&closes))
            .unwrap();

        assert!(!signal.buy);
        assert!(signal.sell);
    }

    #[test]
    fn test_flat_market_is_neutral() {
        let closes = vec![100.0; 60];
        let signal = MomentumSignal::new(&SignalConfig::default())
            .evaluate(&bars_from_closes(&closes))
            .unwrap();

        assert!(!signal.buy);
        assert!(!signal.sell);
    }

    #[test]
    fn test_insufficient_bars() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let err = MomentumSignal::new(&SignalConfig::default())
            .evaluate(&bars_from_closes(&closes))
            .unwrap_err();

        assert_eq!(err, SignalError::InsufficientBars { needed: 50, got: 30 });
    }
}
