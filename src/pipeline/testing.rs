//! Scripted collaborators shared by the pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::llm::{ChatMessage, CompletionBackend, completion_error_text};
use crate::semantic::Embedder;
use crate::transport::{AgentReply, AgentTransport, SendRequest};

/// Text the embedder refuses to embed.
pub const FAILING_ITEM: &str = "BOOM";

#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
}

/// Completion backend answering from rules keyed on the system prompt, then
/// from a queue. An exhausted queue yields sentinel text.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    rules: Vec<(String, String)>,
    queue: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<CompletionCall>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            queue: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, system_contains: &str, reply: &str) -> Self {
        self.rules
            .push((system_contains.to_string(), reply.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl CompletionBackend for ScriptedCompletion {
    fn complete(&self, messages: &[ChatMessage], model: &str, temperature: f64) -> String {
        self.calls.lock().expect("calls lock").push(CompletionCall {
            messages: messages.to_vec(),
            model: model.to_string(),
            temperature,
        });

        let system = messages
            .iter()
            .find(|message| message.role == "system")
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        if let Some((_, reply)) = self
            .rules
            .iter()
            .find(|(needle, _)| system.contains(needle.as_str()))
        {
            return reply.clone();
        }

        self.queue
            .lock()
            .expect("queue lock")
            .pop_front()
            .unwrap_or_else(|| completion_error_text("script exhausted"))
    }
}

/// Embedder backed by a lookup table. Unknown text embeds to the zero vector;
/// [`FAILING_ITEM`] is an error.
#[derive(Debug)]
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        let dimensions = entries.first().map(|(_, vector)| vector.len()).unwrap_or(1);
        Self {
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            dimensions,
        }
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text == FAILING_ITEM {
            bail!("embedding backend rejected {text}");
        }
        Ok(self
            .table
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.dimensions]))
    }

    fn model_id(&self) -> &str {
        "table"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub message: String,
    pub target: String,
    pub new_conversation: bool,
    pub context_id: Option<String>,
}

/// Transport that answers every call with the same text, except for the call
/// indices it was told to fail. Replies carry `ctx-<call index>` when no
/// conversation id was supplied.
#[derive(Debug)]
pub struct ScriptedTransport {
    reply: String,
    failing_calls: Vec<usize>,
    sent: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            failing_calls: Vec::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.failing_calls = calls.to_vec();
        self
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl AgentTransport for ScriptedTransport {
    fn send(&self, request: &SendRequest<'_>) -> Result<AgentReply> {
        let mut sent = self.sent.lock().expect("sent lock");
        let call = sent.len();
        sent.push(SentRequest {
            message: request.message.to_string(),
            target: request.target.to_string(),
            new_conversation: request.new_conversation,
            context_id: request.context_id.map(str::to_string),
        });

        if self.failing_calls.contains(&call) {
            bail!("connection refused on call {call}");
        }

        Ok(AgentReply {
            text: self.reply.clone(),
            context_id: Some(
                request
                    .context_id
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("ctx-{call}")),
            ),
        })
    }
}
