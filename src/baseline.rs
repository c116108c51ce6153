//! Reference agent under test: returns the first five candidate items.
//!
//! Conversations live in an explicit [`SessionStore`] keyed by conversation
//! id instead of process-global state.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::model::{COMPLETION_STATUS_TEXT, string_list};
use crate::transport::{AgentReply, AgentTransport, SendRequest};
use crate::util::now_utc_string;

const MAX_PREDICTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselinePrediction {
    pub prediction: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Default, Clone)]
pub struct BaselineAgent;

impl BaselineAgent {
    /// Answers one task message. Input that is not a JSON object is rejected.
    pub fn respond(&self, message: &str) -> Result<BaselinePrediction> {
        let task: Value =
            serde_json::from_str(message).context("Invalid JSON format in task message")?;
        if !task.is_object() {
            bail!("Invalid input: task message must be a JSON object");
        }

        let candidates = match task.get("input").and_then(|input| input.get("candidate_items")) {
            Some(nested) => string_list(Some(nested)),
            None => string_list(task.get("candidate_items")),
        };

        if candidates.is_empty() {
            return Ok(BaselinePrediction {
                prediction: Vec::new(),
                explanation: "No candidate items provided.".to_string(),
            });
        }

        Ok(BaselinePrediction {
            prediction: candidates.into_iter().take(MAX_PREDICTIONS).collect(),
            explanation: "Returned top-5 candidate items.".to_string(),
        })
    }
}

/// What happens to idle sessions. Only `Never` exists: sessions live as long
/// as the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    #[default]
    Never,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub created_at: String,
    pub turns: usize,
    agent: BaselineAgent,
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    policy: EvictionPolicy,
}

impl SessionStore {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
        }
    }

    #[cfg(test)]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns the session for `conversation_id`, creating it on first use.
    pub fn get_or_create(&mut self, conversation_id: &str) -> &mut Session {
        self.sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| Session {
                created_at: now_utc_string(),
                turns: 0,
                agent: BaselineAgent,
            })
    }

    #[cfg(test)]
    pub fn get(&self, conversation_id: &str) -> Option<&Session> {
        self.sessions.get(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// In-process transport that answers with [`BaselineAgent`]. Reply text has
/// the same shape as a completed A2A task: status line, then the artifact.
#[derive(Debug)]
pub struct LocalAgentTransport {
    sessions: Mutex<SessionStore>,
}

impl LocalAgentTransport {
    pub fn new(policy: EvictionPolicy) -> Self {
        debug!(policy = ?policy, "baseline session store created");
        Self {
            sessions: Mutex::new(SessionStore::new(policy)),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|store| store.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn turns_for(&self, conversation_id: &str) -> Option<usize> {
        self.sessions
            .lock()
            .ok()?
            .get(conversation_id)
            .map(|session| session.turns)
    }
}

impl AgentTransport for LocalAgentTransport {
    fn send(&self, request: &SendRequest<'_>) -> Result<AgentReply> {
        let conversation_id = match (request.new_conversation, request.context_id) {
            (false, Some(context_id)) => context_id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let mut store = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("baseline session store lock poisoned"))?;
        let session = store.get_or_create(&conversation_id);
        session.turns += 1;
        debug!(
            conversation_id = %conversation_id,
            turns = session.turns,
            created_at = %session.created_at,
            "baseline agent turn"
        );

        let prediction = session.agent.respond(request.message)?;
        let artifact =
            serde_json::to_string(&prediction).context("failed to serialize baseline reply")?;

        Ok(AgentReply {
            text: format!("{COMPLETION_STATUS_TEXT}\n{artifact}"),
            context_id: Some(conversation_id),
        })
    }
}
