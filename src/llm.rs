use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CompletionConfig;

/// Prefix of the text returned in place of a completion when the backend
/// could not be reached. Callers treat such text as an empty result.
pub const COMPLETION_ERROR_PREFIX: &str = "[completion error]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Text completion backend. Never fails: transport and auth problems come back
/// as text starting with [`COMPLETION_ERROR_PREFIX`].
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, messages: &[ChatMessage], model: &str, temperature: f64) -> String;
}

pub fn completion_error_text(detail: impl std::fmt::Display) -> String {
    format!("{COMPLETION_ERROR_PREFIX} {detail}")
}

pub fn is_completion_error(text: &str) -> bool {
    text.trim_start().starts_with(COMPLETION_ERROR_PREFIX)
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (DeepSeek by default).
pub struct ChatCompletionClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ChatCompletionClient {
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .context("failed to build completion http client")?;
        let api_key = env::var(&config.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn request(&self, api_key: &str, body: &ChatCompletionRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .with_context(|| format!("completion request to {} failed", self.endpoint))?
            .error_for_status()
            .context("completion endpoint returned an error status")?;

        let parsed: ChatCompletionResponse = response
            .json()
            .context("failed to decode completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response has no message content"))
    }
}

impl CompletionBackend for ChatCompletionClient {
    fn complete(&self, messages: &[ChatMessage], model: &str, temperature: f64) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            return completion_error_text("missing API key");
        };

        let body = ChatCompletionRequest {
            model,
            messages,
            temperature,
        };
        match self.request(api_key, &body) {
            Ok(content) => content,
            Err(err) => {
                debug!(error = %err, "completion call failed");
                completion_error_text(format!("{err:#}"))
            }
        }
    }
}
