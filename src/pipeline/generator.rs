use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionBackend, is_completion_error};
use crate::model::{GENERATOR_PARSE_ERROR, Persona, TaskSpec};
use crate::pipeline::normalize::strip_code_fence;

const GENERATOR_SYSTEM_PROMPT: &str =
    "You are a benchmark task generator. Output strictly in JSON format.";

/// Turns a persona into task specifications with one completion call.
pub struct TaskGenerator<'a> {
    backend: &'a dyn CompletionBackend,
    template: &'a str,
    model: &'a str,
    temperature: f64,
}

impl<'a> TaskGenerator<'a> {
    pub fn new(
        backend: &'a dyn CompletionBackend,
        template: &'a str,
        model: &'a str,
        temperature: f64,
    ) -> Self {
        Self {
            backend,
            template,
            model,
            temperature,
        }
    }

    /// `task_count` is advisory: the generator may return more or fewer tasks
    /// and the result is not re-validated. Output that does not parse comes
    /// back as a single error-marker task.
    pub fn generate(&self, persona: &Persona, task_count: usize) -> Vec<TaskSpec> {
        let prompt = build_generation_prompt(self.template, persona, task_count);
        let messages = [
            ChatMessage::system(GENERATOR_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let raw_output = self.backend.complete(&messages, self.model, self.temperature);
        let tasks = if is_completion_error(&raw_output) {
            warn!(
                persona = %persona.name,
                detail = %raw_output,
                "task generation call failed, emitting error task"
            );
            vec![error_marker_task(raw_output)]
        } else {
            parse_generated_tasks(&raw_output)
        };
        debug!(
            persona = %persona.name,
            requested = task_count,
            generated = tasks.len(),
            "generated tasks"
        );
        tasks
    }
}

pub fn build_generation_prompt(template: &str, persona: &Persona, task_count: usize) -> String {
    let persona_json = serde_json::to_string(persona).unwrap_or_else(|_| persona.name.clone());
    template
        .replace("{{persona}}", &persona_json)
        .replace("{{task_count}}", &task_count.to_string())
}

pub fn parse_generated_tasks(raw_output: &str) -> Vec<TaskSpec> {
    match serde_json::from_str::<Value>(strip_code_fence(raw_output)) {
        Ok(Value::Array(items)) => items.into_iter().map(TaskSpec::from_value).collect(),
        Ok(single) => vec![TaskSpec::from_value(single)],
        Err(err) => {
            warn!(error = %err, "generator output is not JSON, emitting error task");
            vec![error_marker_task(raw_output.to_string())]
        }
    }
}

fn error_marker_task(raw_output: String) -> TaskSpec {
    TaskSpec::error_marker(raw_output, GENERATOR_PARSE_ERROR.to_string())
}
