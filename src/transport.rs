
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::TransportConfig;

#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub message: &'a str,
    pub target: &'a str,
    /// Start a fresh conversation. Set on the first trial of a task only.
    pub new_conversation: bool,
    /// Conversation to continue when `new_conversation` is false.
    pub context_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub context_id: Option<String>,
}

pub trait AgentTransport: Send + Sync {
    fn send(&self, request: &SendRequest<'_>) -> Result<AgentReply>;
}

pub struct A2aTransport {
    client: reqwest::blocking::Client,
}

impl A2aTransport {
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .context("failed to build agent http client")?;
        Ok(Self { client })
    }
}

impl AgentTransport for A2aTransport {
    fn send(&self, request: &SendRequest<'_>) -> Result<AgentReply> {
        let body = build_send_message(request);
        let response = self
            .client
            .post(request.target)
            .json(&body)
            .send()
            .with_context(|| format!("request to agent {} failed", request.target))?
            .error_for_status()
            .with_context(|| format!("agent {} returned an error status", request.target))?;

        let envelope: JsonRpcResponse = response
            .json()
            .context("failed to decode agent json-rpc response")?;
        reply_from_envelope(envelope)
    }
}

pub fn build_send_message(request: &SendRequest<'_>) -> Value {
    let mut message = json!({
        "kind": "message",
        "role": "user",
        "messageId": Uuid::new_v4().to_string(),
        "parts": [{ "kind": "text", "text": request.message }],
    });
    if !request.new_conversation
        && let Some(context_id) = request.context_id
    {
        message["contextId"] = Value::String(context_id.to_string());
    }

    json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": "message/send",
        "params": { "message": message },
    })
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    result: Option<A2aResult>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct A2aResult {
    #[serde(default)]
    context_id: Option<String>,
    #[serde(default)]
    status: Option<A2aStatus>,
    #[serde(default)]
    artifacts: Vec<A2aArtifact>,
    #[serde(default)]
    parts: Vec<A2aPart>,
}

#[derive(Debug, Deserialize)]
struct A2aStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    message: Option<A2aMessage>,
}

#[derive(Debug, Deserialize)]
struct A2aMessage {
    #[serde(default)]
    parts: Vec<A2aPart>,
}

#[derive(Debug, Deserialize)]
struct A2aArtifact {
    #[serde(default)]
    parts: Vec<A2aPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum A2aPart {
    Text { text: String },
    Data { data: Value },
    #[serde(other)]
    Unsupported,
}

impl A2aPart {
    fn as_text(&self) -> Option<String> {
        match self {
            Self::Text { text } => Some(text.clone()),
            Self::Data { data } => Some(data.to_string()),
            Self::Unsupported => None,
        }
    }
}

/// Flattens a JSON-RPC reply into text: status message first, then message
/// parts, then artifacts, one part per line.
pub fn reply_from_envelope(envelope: JsonRpcResponse) -> Result<AgentReply> {
    if let Some(error) = envelope.error {
        bail!("agent json-rpc error {}: {}", error.code, error.message);
    }
    let result = envelope
        .result
        .ok_or_else(|| anyhow!("agent json-rpc response has neither result nor error"))?;

    let state = result
        .status
        .as_ref()
        .map(|status| status.state.to_ascii_lowercase())
        .unwrap_or_default();
    let mut segments = Vec::<String>::new();
    if let Some(message) = result.status.as_ref().and_then(|status| status.message.as_ref()) {
        segments.extend(message.parts.iter().filter_map(A2aPart::as_text));
    }

    if matches!(state.as_str(), "failed" | "rejected" | "canceled") {
        bail!("agent task ended in state {state}: {}", segments.join(" "));
    }

    segments.extend(result.parts.iter().filter_map(A2aPart::as_text));
    for artifact in &result.artifacts {
        segments.extend(artifact.parts.iter().filter_map(A2aPart::as_text));
    }

    if segments.is_empty() {
        bail!("agent reply carried no text or data parts");
    }

    Ok(AgentReply {
        text: segments.join("\n"),
        context_id: result.context_id,
    })
}
