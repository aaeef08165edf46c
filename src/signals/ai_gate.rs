//! Momentum-quality gate.
//!
//! A rule-based score is always computed from the features. In the
//! uncertain band (or always, when forced) an advisory grader is asked
//! for a second opinion; any failure there falls back to the rule-based
//! grade and records why.

use tracing::debug;

use crate::api::{AdvisoryGrade, AdvisoryGrader};
use crate::config::AiConfig;
use crate::models::{AiVerdict, Bar, GradeSource};

use super::{Features, SignalError};

/// Lower and upper bound of the band where the advisory grader is consulted.
const UNCERTAIN_LOW: f64 = 45.0;
const UNCERTAIN_HIGH: f64 = 75.0;

/// How the final grade was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    /// Advisory grader not asked
    Deterministic,
    /// Advisory grader answered
    Advisory(AdvisoryGrade),
    /// Advisory grader was asked but could not answer
    Fallback { reason: String },
}

impl GradeOutcome {
    /// Status text recorded on the verdict.
    pub fn status(&self) -> &str {
        match self {
            GradeOutcome::Deterministic => "",
            GradeOutcome::Advisory(_) => "ok",
            GradeOutcome::Fallback { reason } => reason,
        }
    }
}

/// Scores momentum quality and decides pass/fail.
pub struct AiGate {
    config: AiConfig,
    advisory: Option<Box<dyn AdvisoryGrader>>,
}

impl AiGate {
    pub fn new(config: AiConfig, advisory: Option<Box<dyn AdvisoryGrader>>) -> Self {
        Self { config, advisory }
    }

    /// Grade the latest bars.
    pub async fn grade(&self, bars: &[Bar]) -> Result<AiVerdict, SignalError> {
        let features = Features::from_bars(bars)?;
        let base_score = deterministic_score(&features);

        let outcome = if self.should_consult(base_score) {
            self.consult(&features).await
        } else {
            GradeOutcome::Deterministic
        };

        let (score, confidence, source, rationale) = match &outcome {
            GradeOutcome::Advisory(grade) => {
                let score = grade.score.clamp(0.0, 100.0);
                let conf = (70.0 + 0.3 * (score - 50.0).abs()).min(100.0);
                (score, conf, GradeSource::Llm, grade.rationale.clone())
            }
            GradeOutcome::Deterministic | GradeOutcome::Fallback { .. } => {
                let conf = (60.0 + 0.4 * (base_score - 50.0).abs()).min(100.0);
                (base_score, conf, GradeSource::Deterministic, String::new())
            }
        };

        let score = (score * 10.0).round() / 10.0;
        let confidence = confidence.round();

        Ok(AiVerdict {
            score,
            confidence,
            passed: score >= self.config.score_pass && confidence >= self.config.conf_pass,
            source,
            rationale,
            status: outcome.status().to_string(),
        })
    }

    fn should_consult(&self, score: f64) -> bool {
        self.config.use_llm
            && (self.config.force_llm || (score > UNCERTAIN_LOW && score < UNCERTAIN_HIGH))
    }

    async fn consult(&self, features: &Features) -> GradeOutcome {
        let Some(advisory) = &self.advisory else {
            return GradeOutcome::Fallback {
                reason: "advisory grader not configured".to_string(),
            };
        };

        match advisory.grade(features).await {
            Ok(grade) if grade.score.is_finite() => GradeOutcome::Advisory(grade),
            Ok(_) => GradeOutcome::Fallback {
                reason: "advisory score not finite".to_string(),
            },
            Err(e) => {
                debug!(error = %e, "Advisory grader failed, using rule-based grade");
                GradeOutcome::Fallback {
                    reason: format!("advisory error: {}", e),
                }
            }
        }
    }
}

/// Weighted blend of the features, clamped to 0..100.
pub fn deterministic_score(f: &Features) -> f64 {
    let trend = (f.ema_gap_pct / 1.5).clamp(-1.0, 1.0);
    let slope = f.slope_20_pct.clamp(-1.0, 1.0);
    let strength = f.adx14.clamp(0.0, 50.0) / 50.0;
    let rsi_balance = 1.0 - (50.0 - f.rsi14).abs() / 50.0;
    let volume = f.vol_rank_20.clamp(0.0, 100.0) / 100.0;
    let calm = 1.0 - f.atr14_pct.clamp(0.0, 2.0) / 2.0;

    let score = 35.0 * trend
        + 25.0 * slope
        + 15.0 * strength
        + 5.0 * rsi_balance
        + 10.0 * volume
        + 10.0 * calm;
    score.clamp(0.0, 100.0)
}
