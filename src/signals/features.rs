//! Feature engineering for the momentum-quality grade.

use serde::Serialize;

use crate::models::Bar;

use super::{mean, SignalError};

const EPS: f64 = 1e-12;

/// Latest-bar features describing trend structure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Features {
    /// (EMA20 - EMA50) as % of close
    pub ema_gap_pct: f64,
    /// Least-squares slope of the last 20 closes as % of close
    pub slope_20_pct: f64,
    /// Lightweight ADX(14)
    pub adx14: f64,
    /// Wilder RSI(14)
    pub rsi14: f64,
    /// Mean 14-bar range as % of close
    pub atr14_pct: f64,
    /// Percentile rank (0-100) of the latest 20-bar mean volume
    pub vol_rank_20: f64,
    pub price: f64,
}

impl Features {
    /// Bars needed before features can be computed.
    pub const MIN_BARS: usize = 30;

    pub fn from_bars(bars: &[Bar]) -> Result<Self, SignalError> {
        if bars.len() < Self::MIN_BARS {
            return Err(SignalError::InsufficientBars {
                needed: Self::MIN_BARS,
                got: bars.len(),
            });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let price = *closes.last().unwrap_or(&0.0);
        if !price.is_finite() || price <= 0.0 {
            return Err(SignalError::NonFinite("price"));
        }

        let ema_fast = ewm_adjusted(&closes, 20.0);
        let ema_slow = ewm_adjusted(&closes, 50.0);
        let ranges: Vec<f64> = bars[bars.len() - 14..].iter().map(|b| b.range()).collect();

        let features = Self {
            ema_gap_pct: (ema_fast - ema_slow) / price * 100.0,
            slope_20_pct: slope_pct(&closes[closes.len() - 20..]),
            adx14: adx(bars, 14),
            rsi14: rsi(&closes, 14),
            atr14_pct: mean(&ranges) / price * 100.0,
            vol_rank_20: volume_rank(bars, 20),
            price,
        };

        for (name, value) in features.named() {
            if !value.is_finite() {
                return Err(SignalError::NonFinite(name));
            }
        }
        Ok(features)
    }

    /// Core features with their names, for prompts and audit notes.
    pub fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("ema_gap_pct", self.ema_gap_pct),
            ("slope_20_pct", self.slope_20_pct),
            ("adx14", self.adx14),
            ("rsi14", self.rsi14),
            ("atr14_pct", self.atr14_pct),
            ("vol_rank_20", self.vol_rank_20),
        ]
    }

    /// Compact `name=value` listing.
    pub fn summary(&self) -> String {
        self.named()
            .iter()
            .map(|(k, v)| format!("{}={:.4}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Adjusted exponentially weighted mean (latest value).
fn ewm_adjusted(values: &[f64], span: f64) -> f64 {
    let decay = 1.0 - 2.0 / (span + 1.0);
    let (mut num, mut den) = (0.0, 0.0);
    for &x in values {
        num = x + decay * num;
        den = 1.0 + decay * den;
    }
    num / den
}

/// Least-squares slope scaled to % of the last value.
fn slope_pct(window: &[f64]) -> f64 {
    let n = window.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(window);

    let (mut cov, mut var) = (0.0, 0.0);
    for (i, &y) in window.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov += dx * (y - y_mean);
        var += dx * dx;
    }
    let slope = cov / var;
    slope / window[window.len() - 1] * 100.0
}

/// Wilder RSI with exponential smoothing (alpha = 1/period).
fn rsi(closes: &[f64], period: usize) -> f64 {
    let alpha = 1.0 / period as f64;
    let mut up: Option<f64> = None;
    let mut down: Option<f64> = None;

    for pair in closes.windows(2) {
        let delta = pair[1] - pair[0];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        up = Some(up.map_or(gain, |u| alpha * gain + (1.0 - alpha) * u));
        down = Some(down.map_or(loss, |d| alpha * loss + (1.0 - alpha) * d));
    }

    let rs = up.unwrap_or(0.0) / (down.unwrap_or(0.0) + EPS);
    100.0 - 100.0 / (1.0 + rs)
}

/// Directional movement index averaged over `period` (approximation).
fn adx(bars: &[Bar], period: usize) -> f64 {
    let n = bars.len();
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![f64::NAN; n];

    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
        let prev_close = bars[i - 1].close;
        tr[i] = bars[i]
            .range()
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
    }

    // dx is defined once a full true-range window exists
    let dx: Vec<f64> = (period..n)
        .map(|i| {
            let lo = i + 1 - period;
            let atr = mean(&tr[lo..=i]);
            let plus_di = 100.0 * plus_dm[lo..=i].iter().sum::<f64>() / (atr * period as f64 + EPS);
            let minus_di = 100.0 * minus_dm[lo..=i].iter().sum::<f64>() / (atr * period as f64 + EPS);
            (plus_di - minus_di).abs() / (plus_di + minus_di + EPS) * 100.0
        })
        .collect();

    if dx.len() < period {
        return 0.0;
    }
    mean(&dx[dx.len() - period..])
}

/// Percentile rank of the latest rolling-mean volume (average rank for ties).
fn volume_rank(bars: &[Bar], window: usize) -> f64 {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let rolling: Vec<f64> = volumes.windows(window).map(mean).collect();
    let Some(&latest) = rolling.last() else {
        return 50.0;
    };

    let below = rolling.iter().filter(|&&v| v < latest).count() as f64;
    let equal = rolling.iter().filter(|&&v| v == latest).count() as f64;
    (below + (equal + 1.0) / 2.0) / rolling.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trending_bars(n: usize, step: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let c = 100.0 + step * i as f64;
                Bar {
                    timestamp: start + Duration::hours(i as i64),
                    open: c - step / 2.0,
                    high: c + 1.0,
                    low: c - 1.0,
                    close: c,
                    volume: 100.0 + i as f64,
                }
            })
            .collect()
    }

    #[test]
    fn test_uptrend_features() {
        let f = Features::from_bars(&trending_bars(80, 0.5)).unwrap();

        assert!(f.ema_gap_pct > 0.0);
        assert!(f.slope_20_pct > 0.0);
        // Only gains: RSI pinned near 100
        assert!(f.rsi14 > 99.0);
        // Rising volume: latest rolling mean ranks highest
        assert_eq!(f.vol_rank_20, 100.0);
        assert!(f.adx14 > 0.0);
        assert!((f.atr14_pct - 2.0 / f.price * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_slope_of_line() {
        let window: Vec<f64> = (0..20).map(|i| 10.0 + 2.0 * i as f64).collect();
        // slope 2 relative to last value 48
        assert!((slope_pct(&window) - 2.0 / 48.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewm_of_constant() {
        assert!((ewm_adjusted(&[5.0; 40], 20.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_bars() {
        let err = Features::from_bars(&trending_bars(10, 1.0)).unwrap_err();
        assert_eq!(err, SignalError::InsufficientBars { needed: 30, got: 10 });
    }
}
