//! Model gateway client (OpenRouter-compatible chat completions).
//!
//! Returns generated text plus actual token usage so every call can be
//! charged against the ledger. Rate limits surface as a typed error the
//! retry policy in the brain reacts to with backoff-and-rotate.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::guard::TrafficGuard;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limited")]
    RateLimited,
    #[error("gateway error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unparseable gateway response")]
    Parse,
}

/// One completed call: text plus what it cost in tokens.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    content: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct ModelGateway {
    url: String,
    api_key: String,
    guard: Arc<TrafficGuard>,
}

impl ModelGateway {
    pub fn new(url: &str, api_key: &str, guard: Arc<TrafficGuard>) -> Self {
        Self {
            url: url.to_string(),
            api_key: api_key.to_string(),
            guard,
        }
    }

    pub fn timeout() -> Duration {
        GATEWAY_TIMEOUT
    }

    /// One chat completion against `model_id`.
    pub async fn complete(
        &self,
        model_id: &str,
        system: Option<&str>,
        user: &str,
    ) -> Result<Completion, GatewayError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": user }));
        let body = serde_json::json!({
            "model": model_id,
            "messages": messages,
            "temperature": 0.8,
            "max_tokens": 1024,
        });

        let response = self
            .guard
            .post_json(&self.url, Some(&self.api_key), &body)
            .await?;

        if response.status == 429 {
            return Err(GatewayError::RateLimited);
        }
        if !(200..300).contains(&response.status) {
            return Err(GatewayError::Status {
                status: response.status,
                body: response.body.chars().take(300).collect(),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&response.body).map_err(|_| GatewayError::Parse)?;
        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or(GatewayError::Parse)?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(Completion {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_extracts_text_and_usage() {
        let raw = r#"{
            "choices": [{"message": {"content": "hello world"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 45}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello world");
        assert_eq!(parsed.usage.as_ref().unwrap().prompt_tokens, 120);
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let raw = r#"{"choices": [{"message": {"content": "x"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let usage = parsed.usage.unwrap_or_default();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
    }
}
