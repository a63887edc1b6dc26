//! OpenAI-compatible chat completion client.
//!
//! Blocking `ureq` requests with bounded exponential-backoff retries.
//! API keys come only from the environment (`OPENAI_API_KEY`, or
//! `AZURE_OPENAI_API_KEY` as a fallback); they never appear in config files.

use std::time::Duration;

use rand::Rng;
use serde_json::json;

use crate::config::LlmConfig;
use crate::core::traits::{ChatMessage, ChatResponse, LanguageModel};
use crate::core::{GraphQaError, Result};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Backoff schedule for transient failures: base 250 ms doubling per attempt,
/// capped at 4 s, plus up to 100 ms of jitter.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(250);
    let cap = Duration::from_millis(4_000);
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(cap);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
    capped + jitter
}

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatClient {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
    max_retry_attempts: u32,
}

impl OpenAiChatClient {
    /// Build a client from config. Talking to the public OpenAI endpoint
    /// without an API key in the environment is a configuration error;
    /// self-hosted endpoints may run keyless.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("AZURE_OPENAI_API_KEY"))
            .ok();
        if api_key.is_none() && base_url == OPENAI_DEFAULT_BASE_URL {
            return Err(GraphQaError::Config {
                message: "OPENAI_API_KEY is not set and no custom llm base_url was given"
                    .to_string(),
            });
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retry_attempts: config.max_retry_attempts,
        })
    }

    fn request_once(&self, body: &serde_json::Value) -> Result<ChatResponse> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .agent
            .post(&endpoint)
            .set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        let response = request.send_json(body)?;
        let parsed: serde_json::Value =
            response
                .into_json()
                .map_err(|e| GraphQaError::LanguageModel {
                    message: format!("failed to parse completion response: {e}"),
                })?;

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GraphQaError::LanguageModel {
                message: format!("completion response lacks message content: {parsed}"),
            })?
            .to_string();

        let mut metadata = indexmap::IndexMap::new();
        metadata.insert("model".to_string(), parsed["model"].clone());
        if !parsed["usage"].is_null() {
            metadata.insert("usage".to_string(), parsed["usage"].clone());
        }
        if let Some(reason) = parsed["choices"][0]["finish_reason"].as_str() {
            metadata.insert("finish_reason".to_string(), json!(reason));
        }
        Ok(ChatResponse {
            response: text,
            metadata,
        })
    }
}

impl LanguageModel for OpenAiChatClient {
    fn infer(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_error = None;
        for attempt in 0..self.max_retry_attempts {
            match self.request_once(&body) {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "chat completion request failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.max_retry_attempts {
                        std::thread::sleep(backoff_delay(attempt));
                    }
                },
            }
        }
        Err(GraphQaError::LanguageModel {
            message: format!(
                "chat completion failed after {} attempts: {}",
                self.max_retry_attempts,
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds() {
        // attempt 0: 250ms + jitter < 350ms
        let d0 = backoff_delay(0);
        assert!(d0 >= Duration::from_millis(250) && d0 < Duration::from_millis(350));
        // deep attempts cap at 4s + jitter
        let d9 = backoff_delay(9);
        assert!(d9 >= Duration::from_millis(4_000) && d9 < Duration::from_millis(4_100));
    }
}
