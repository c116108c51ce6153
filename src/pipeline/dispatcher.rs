use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::model::{ParsedOutput, TaskSpec};
use crate::pipeline::normalize::normalize_reply;
use crate::pipeline::outcome::StageOutcome;
use crate::transport::{AgentTransport, SendRequest};

/// Successful trial outputs of one task, in trial order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSet {
    outputs: Vec<ParsedOutput>,
    attempted: usize,
}

impl TrialSet {
    pub fn outputs(&self) -> &[ParsedOutput] {
        &self.outputs
    }

    /// Output of the last trial that succeeded. Used by the single-output
    /// metrics.
    pub fn last_output(&self) -> Option<&ParsedOutput> {
        self.outputs.last()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn failed_count(&self) -> usize {
        self.attempted - self.outputs.len()
    }

    #[cfg(test)]
    pub fn from_outputs(outputs: Vec<ParsedOutput>) -> Self {
        let attempted = outputs.len();
        Self { outputs, attempted }
    }
}

/// Sends a task to the agent under test `trial_count` times.
pub struct Dispatcher<'a> {
    transport: &'a dyn AgentTransport,
    target: &'a str,
}

impl<'a> Dispatcher<'a> {
    pub fn new(transport: &'a dyn AgentTransport, target: &'a str) -> Self {
        Self { transport, target }
    }

    /// Trials run strictly in order. Trial 0 opens a conversation and later
    /// trials continue it with the id the agent handed back. A failed trial is
    /// dropped; it does not stop the remaining ones.
    pub fn run_trials(&self, task: &TaskSpec, trial_count: usize) -> StageOutcome<TrialSet> {
        let message = match serde_json::to_string(task)
            .with_context(|| format!("failed to serialize task {}", task.task_id))
        {
            Ok(message) => message,
            Err(err) => return StageOutcome::Failed(format!("{err:#}")),
        };

        let mut outputs = Vec::with_capacity(trial_count);
        let mut context_id: Option<String> = None;

        for trial in 0..trial_count {
            match self.send_trial(&message, trial, context_id.as_deref()) {
                Ok((output, returned_context)) => {
                    if returned_context.is_some() {
                        context_id = returned_context;
                    }
                    outputs.push(output);
                }
                Err(err) => {
                    warn!(
                        task_id = %task.task_id,
                        trial,
                        error = %format!("{err:#}"),
                        "trial failed, dropping it"
                    );
                }
            }
        }

        if outputs.is_empty() {
            return StageOutcome::Skipped(format!(
                "all {trial_count} trials failed for task {}",
                task.task_id
            ));
        }

        debug!(
            task_id = %task.task_id,
            succeeded = outputs.len(),
            attempted = trial_count,
            "trials finished"
        );
        StageOutcome::Ok(TrialSet {
            outputs,
            attempted: trial_count,
        })
    }

    fn send_trial(
        &self,
        message: &str,
        trial: usize,
        context_id: Option<&str>,
    ) -> Result<(ParsedOutput, Option<String>)> {
        let new_conversation = trial == 0;
        let reply = self.transport.send(&SendRequest {
            message,
            target: self.target,
            new_conversation,
            context_id: if new_conversation { None } else { context_id },
        })?;
        Ok((normalize_reply(&reply.text), reply.context_id))
    }
}

#[cfg(test)]
mod tests {
    use super::Dispatcher;
    use crate::model::TaskSpec;
    use crate::pipeline::outcome::StageOutcome;
    use crate::pipeline::testing::ScriptedTransport;

    fn task() -> TaskSpec {
        TaskSpec::from_value(serde_json::json!({
            "task_id": "t-1",
            "candidate_items": ["A", "B"]
        }))
    }

    #[test]
    fn failed_trials_are_dropped_not_padded() {
        let transport = ScriptedTransport::replying(r#"{"prediction": ["A"]}"#).failing_on(&[1, 2]);
        let dispatcher = Dispatcher::new(&transport, "http://agent");

        let StageOutcome::Ok(trials) = dispatcher.run_trials(&task(), 3) else {
            panic!("one successful trial should produce a trial set");
        };
        assert_eq!(trials.len(), 1);
        assert_eq!(trials.failed_count(), 2);
        assert_eq!(trials.last_output(), trials.outputs().first());
        assert_eq!(
            trials.last_output().map(|output| output.prediction.clone()),
            Some(vec!["A".to_string()])
        );
    }

    #[test]
    fn all_failed_trials_skip_the_task() {
        let transport = ScriptedTransport::replying("{}").failing_on(&[0, 1]);
        let dispatcher = Dispatcher::new(&transport, "http://agent");

        let outcome = dispatcher.run_trials(&task(), 2);
        assert_eq!(outcome.status(), "skipped");
    }

    #[test]
    fn only_first_trial_starts_a_conversation() {
        let transport = ScriptedTransport::replying(r#"{"prediction": ["A"]}"#);
        let dispatcher = Dispatcher::new(&transport, "http://agent");

        let outcome = dispatcher.run_trials(&task(), 3);
        assert!(outcome.is_ok());

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].new_conversation);
        assert!(sent[0].context_id.is_none());
        for request in &sent[1..] {
            assert!(!request.new_conversation);
            assert_eq!(request.context_id.as_deref(), Some("ctx-0"));
        }
        assert!(sent.iter().all(|request| request.target == "http://agent"));
    }

    #[test]
    fn context_from_first_successful_reply_is_reused() {
        let transport = ScriptedTransport::replying("{}").failing_on(&[0]);
        let dispatcher = Dispatcher::new(&transport, "http://agent");

        let outcome = dispatcher.run_trials(&task(), 3);
        assert!(outcome.is_ok());

        let sent = transport.sent();
        assert!(sent[1].context_id.is_none(), "no context known after failed trial 0");
        assert_eq!(sent[2].context_id.as_deref(), Some("ctx-1"));
    }
}
