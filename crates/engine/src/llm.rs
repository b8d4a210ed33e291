//! HTTP decision maker against an OpenAI-compatible responses endpoint.
//!
//! Best-effort by contract: the adapter maps every failure here to HOLD, so
//! this client only needs to be honest about what went wrong.

use crate::decision::{AdapterError, DecisionMaker};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use spot_bot_core::config::LlmConfig;
use std::time::Duration;

pub struct OpenAiDecisionMaker {
    http: reqwest::Client,
    api_key: SecretString,
    config: LlmConfig,
}

impl OpenAiDecisionMaker {
    /// Creates a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: LlmConfig, api_key: SecretString) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdapterError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            config,
        })
    }

    /// Reads `OPENAI_API_KEY` from the environment.
    ///
    /// # Errors
    ///
    /// Fails when the variable is missing or the client cannot be built.
    pub fn from_env(config: LlmConfig) -> Result<Self, AdapterError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            AdapterError::Http("missing environment variable: OPENAI_API_KEY".to_string())
        })?;
        Self::new(config, SecretString::from(api_key))
    }
}

#[async_trait]
impl DecisionMaker for OpenAiDecisionMaker {
    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        let mut body = json!({
            "model": self.config.model,
            "input": prompt,
            "reasoning": { "effort": self.config.reasoning_effort },
            "text": { "verbosity": self.config.verbosity },
        });
        if let Some(max) = self.config.max_output_tokens {
            body["max_output_tokens"] = json!(max);
        }

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Http(format!("HTTP {status}: {text}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;
        extract_output_text(&value).ok_or(AdapterError::Empty)
    }
}

/// Pulls the text out of the first `message`-typed output item.
#[must_use]
pub fn extract_output_text(value: &Value) -> Option<String> {
    let message = value
        .get("output")?
        .as_array()?
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("message"))?;
    message
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|content| {
            if content.get("type").and_then(Value::as_str) == Some("output_text") {
                content
                    .get("text")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_message_item() {
        let value = serde_json::json!({
            "output": [
                { "type": "reasoning", "summary": [] },
                {
                    "type": "message",
                    "content": [
                        { "type": "output_text", "text": "{\"action\":\"HOLD\"}" }
                    ]
                }
            ]
        });
        assert_eq!(
            extract_output_text(&value),
            Some("{\"action\":\"HOLD\"}".to_string())
        );
    }

    #[test]
    fn missing_message_item_is_none() {
        let value = serde_json::json!({ "output": [ { "type": "reasoning" } ] });
        assert_eq!(extract_output_text(&value), None);

        let value = serde_json::json!({ "status": "failed" });
        assert_eq!(extract_output_text(&value), None);
    }
}
