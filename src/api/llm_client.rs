//! Chat-completions grader used as the advisory second opinion.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::AiConfig;
use crate::signals::Features;

use super::types::{ChatMessage, ChatRequest, ChatResponse};
use super::{AdvisoryGrade, AdvisoryGrader};

const SYSTEM_PROMPT: &str = "You score crypto long entries 0..100 and explain briefly.";

/// OpenAI-compatible chat-completions grader.
pub struct OpenAiGrader {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiGrader {
    pub fn new(api_key: String, config: &AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: config.base_url.clone(),
        })
    }

    fn prompt(features: &Features) -> String {
        let core = features
            .named()
            .iter()
            .map(|(k, v)| format!("'{}': {:.4}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Features={{{}}}. Score a long entry 0..100 and explain in one sentence. Reply like '72 Reason: ...'.",
            core
        )
    }
}

/// First run of 1-3 ASCII digits in `text`, clamped to 0..100.
pub(crate) fn extract_score(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(3)
        .collect();
    digits.parse::<f64>().ok().map(|s| s.clamp(0.0, 100.0))
}

#[async_trait]
impl AdvisoryGrader for OpenAiGrader {
    async fn grade(&self, features: &Features) -> Result<AdvisoryGrade> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::prompt(features),
                },
            ],
            temperature: 0.2,
            max_tokens: 200,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to call advisory model")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Advisory request failed: {}", status);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse advisory response")?;
        let text = body
            .content()
            .map(str::trim)
            .ok_or_else(|| anyhow!("Advisory response has no choices"))?;
        debug!(reply = %text, "Advisory reply");

        let score = extract_score(text).ok_or_else(|| anyhow!("No score in advisory reply"))?;
        Ok(AdvisoryGrade {
            score,
            rationale: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_score() {
        assert_eq!(extract_score("72 Reason: clean trend"), Some(72.0));
        assert_eq!(extract_score("Score: 8"), Some(8.0));
        // Only the first three digits of a longer run
        assert_eq!(extract_score("score 1234"), Some(100.0));
        assert_eq!(extract_score("no number here"), None);
    }

    #[test]
    fn test_prompt_lists_core_features() {
        let f = Features {
            ema_gap_pct: 0.5,
            slope_20_pct: 0.1,
            adx14: 25.0,
            rsi14: 55.0,
            atr14_pct: 0.8,
            vol_rank_20: 70.0,
            price: 100.0,
        };
        let prompt = OpenAiGrader::prompt(&f);
        assert!(prompt.contains("'rsi14': 55.0000"));
        assert!(prompt.contains("Reply like '72 Reason"));
        assert!(!prompt.contains("price"));
    }
}
