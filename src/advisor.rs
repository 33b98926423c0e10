//! Optional LLM breakpoint advisor.
//!
//! Given a window of prose that must be cut, the advisor may suggest a
//! better split offset than the sentence/paragraph fallback. Strictly
//! best-effort: any error, timeout, or unparseable reply makes the
//! chunker fall back deterministically.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::AdvisorConfig;

#[async_trait]
pub trait BreakpointAdvisor: Send + Sync {
    /// Suggest a character offset in `window` to end the current chunk.
    /// `Ok(None)` means no opinion.
    async fn suggest_breakpoint(&self, window: &str) -> Result<Option<usize>>;
}

/// Advisor backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmAdvisor {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl LlmAdvisor {
    pub fn new(config: &AdvisorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("advisor.model required"))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            base_url,
            client,
        })
    }
}

#[async_trait]
impl BreakpointAdvisor for LlmAdvisor {
    async fn suggest_breakpoint(&self, window: &str) -> Result<Option<usize>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You split documents into retrieval chunks. Given a text window, \
                        reply with only the character offset of the best topic-transition point. \
                        Reply with a single integer and nothing else."
                },
                { "role": "user", "content": window }
            ],
            "temperature": 0,
            "max_tokens": 10,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("advisor API error {}: {}", status, text);
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("advisor reply missing content"))?;

        Ok(parse_offset(content, window.len()))
    }
}

/// Pull the first integer out of the model's reply and bounds-check it.
fn parse_offset(reply: &str, window_len: usize) -> Option<usize> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let pos: usize = digits.parse().ok()?;
    if pos == 0 || pos > window_len {
        return None;
    }
    Some(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_integer() {
        assert_eq!(parse_offset("423", 800), Some(423));
    }

    #[test]
    fn parses_integer_with_chatter() {
        assert_eq!(parse_offset("Offset: 423.", 800), Some(423));
    }

    #[test]
    fn rejects_out_of_bounds_and_garbage() {
        assert_eq!(parse_offset("1200", 800), None);
        assert_eq!(parse_offset("0", 800), None);
        assert_eq!(parse_offset("no idea", 800), None);
    }
}
