//! Advisory signals computed from bars: trend, candlestick patterns, AI momentum gate.

mod ai_gate;
mod features;
mod momentum;
mod patterns;

use thiserror::Error;

pub use ai_gate::AiGate;
pub use features::Features;
pub use momentum::MomentumSignal;
pub use patterns::{PatternDetector, KNOWN_PATTERNS};

/// Bars could not be turned into a usable signal. The symbol is skipped.
#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    #[error("need at least {needed} bars, got {got}")]
    InsufficientBars { needed: usize, got: usize },

    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
}

/// Arithmetic mean of a non-empty slice.
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
