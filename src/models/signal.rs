//! Typed outputs of the advisory collaborators: trend signal, AI verdict, pattern hit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Directional bias and proposed levels from the trend signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSignal {
    pub buy: bool,
    pub sell: bool,
    /// Last close
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl TrendSignal {
    /// True when `stop_loss < price < take_profit`.
    pub fn levels_valid(&self) -> bool {
        self.stop_loss < self.price && self.price < self.take_profit
    }
}

/// Which scorer produced an AI verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeSource {
    /// Rule-based scorer
    Deterministic,
    /// External advisory service (LLM)
    Llm,
}

impl GradeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeSource::Deterministic => "ML",
            GradeSource::Llm => "LLM",
        }
    }
}

/// Momentum-quality verdict of the AI gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
    /// 0..100
    pub score: f64,
    /// 0..100
    pub confidence: f64,
    pub passed: bool,
    pub source: GradeSource,
    #[serde(default)]
    pub rationale: String,
    /// Why the advisory source was not used (empty when it was, or was not asked)
    #[serde(default)]
    pub status: String,
}

/// Result of candlestick confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternHit {
    pub hit: bool,
    pub name: Option<String>,
}

impl PatternHit {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn found(name: &str) -> Self {
        Self {
            hit: true,
            name: Some(name.to_string()),
        }
    }

    /// Pattern name or "none".
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_levels_valid() {
        let mut sig = TrendSignal {
            buy: true,
            sell: false,
            price: dec!(100),
            stop_loss: dec!(98),
            take_profit: dec!(103),
        };
        assert!(sig.levels_valid());

        sig.stop_loss = dec!(100);
        assert!(!sig.levels_valid());

        sig.stop_loss = dec!(98);
        sig.take_profit = dec!(99);
        assert!(!sig.levels_valid());
    }

    #[test]
    fn test_pattern_label() {
        assert_eq!(PatternHit::none().label(), "none");
        assert_eq!(PatternHit::found("hammer").label(), "hammer");
    }
}
