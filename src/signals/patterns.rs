//! Bullish candlestick confirmation.

use crate::models::{Bar, PatternHit};

/// Pattern names understood by [`PatternDetector`].
pub const KNOWN_PATTERNS: &[&str] = &["bullish_engulfing", "hammer", "morning_star"];

/// Detects bullish reversal candles on the most recent bars.
#[derive(Debug, Clone, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    /// First pattern in `allowed` (in order) that matches the latest bars.
    pub fn detect(&self, bars: &[Bar], allowed: &[String]) -> PatternHit {
        allowed
            .iter()
            .find(|name| Self::matches(name, bars))
            .map(|name| PatternHit::found(name))
            .unwrap_or_else(PatternHit::none)
    }

    fn matches(name: &str, bars: &[Bar]) -> bool {
        match name {
            "bullish_engulfing" => bullish_engulfing(bars),
            "hammer" => hammer(bars),
            "morning_star" => morning_star(bars),
            _ => false,
        }
    }
}

/// Red candle followed by a green one whose body covers it.
fn bullish_engulfing(bars: &[Bar]) -> bool {
    let [.., prev, last] = bars else {
        return false;
    };
    prev.is_bearish() && last.is_bullish() && last.close >= prev.open && last.open <= prev.close
}

/// Small body near the top, long lower shadow.
fn hammer(bars: &[Bar]) -> bool {
    let Some(last) = bars.last() else {
        return false;
    };
    let body = last.body();
    let range = if last.range() > 0.0 { last.range() } else { 1e-9 };

    last.close > last.open * 0.995
        && last.lower_shadow() >= 2.0 * body
        && last.upper_shadow() <= body
        && body / range <= 0.35
}

/// Big red body, an indecision candle, then a green close into the red body.
fn morning_star(bars: &[Bar]) -> bool {
    let [.., first, middle, last] = bars else {
        return false;
    };

    let strong_red = first.is_bearish() && first.body() > first.range() * 0.4;
    let indecision = middle.body() < middle.range() * 0.2;
    let recovery =
        last.is_bullish() && last.close > first.open - (first.open - first.close) * 0.5;

    strong_red && indecision && recovery
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn all() -> Vec<String> {
        KNOWN_PATTERNS.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_bullish_engulfing() {
        let bars = vec![bar(102.0, 102.5, 99.5, 100.0), bar(99.5, 103.0, 99.0, 102.5)];
        let hit = PatternDetector::new().detect(&bars, &all());
        assert_eq!(hit, PatternHit::found("bullish_engulfing"));
    }

    #[test]
    fn test_hammer() {
        let bars = vec![bar(100.0, 100.6, 98.0, 100.5)];
        let hit = PatternDetector::new().detect(&bars, &all());
        assert_eq!(hit, PatternHit::found("hammer"));
    }

    #[test]
    fn test_morning_star() {
        let bars = vec![
            bar(110.0, 111.0, 99.0, 100.0),
            bar(99.5, 101.0, 98.0, 99.7),
            bar(100.0, 107.5, 99.8, 107.0),
        ];
        let hit = PatternDetector::new().detect(&bars, &all());
        assert_eq!(hit, PatternHit::found("morning_star"));
    }

    #[test]
    fn test_allowed_set_filters() {
        let bars = vec![bar(100.0, 100.6, 98.0, 100.5)];
        let only_engulfing = vec!["bullish_engulfing".to_string()];
        let hit = PatternDetector::new().detect(&bars, &only_engulfing);
        assert!(!hit.hit);
        assert_eq!(hit.label(), "none");
    }

    #[test]
    fn test_empty_and_unknown() {
        let detector = PatternDetector::new();
        assert!(!detector.detect(&[], &all()).hit);

        let bars = vec![bar(100.0, 100.6, 98.0, 100.5)];
        assert!(!detector.detect(&bars, &["doji".to_string()]).hit);
    }
}
