use serde_json::Value;
use tracing::warn;

use crate::llm::{ChatMessage, CompletionBackend, is_completion_error};
use crate::model::{ParsedOutput, Persona, TaskSpec};
use crate::pipeline::normalize::strip_code_fence;
use crate::util::clamp_unit;

const SEMANTIC_SYSTEM_PROMPT: &str =
    "You are a strict AI evaluator. Only output JSON {score, reason}";
const EXPLAINABILITY_SYSTEM_PROMPT: &str =
    "You are an explanation evaluator. Only output a number";

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticJudgement {
    pub score: f64,
    pub reason: String,
}

/// LLM-as-judge calls for the semantic and explainability metrics.
pub struct Judge<'a> {
    pub backend: &'a dyn CompletionBackend,
    pub eval_template: &'a str,
    pub model: &'a str,
    pub temperature: f64,
}

impl Judge<'_> {
    pub fn semantic(&self, task: &TaskSpec, output: &ParsedOutput) -> SemanticJudgement {
        let task_json = serde_json::to_string(task).unwrap_or_default();
        let output_json = serde_json::to_string(output).unwrap_or_default();
        let prompt = self
            .eval_template
            .replace("<<task>>", &task_json)
            .replace("<<output>>", &output_json);

        let raw = self.ask(SEMANTIC_SYSTEM_PROMPT, prompt);
        if is_completion_error(&raw) {
            warn!(task_id = %task.task_id, detail = %raw, "semantic judge unavailable");
            return SemanticJudgement {
                score: 0.0,
                reason: raw,
            };
        }

        let judgement = parse_semantic_judgement(&raw);
        if judgement.is_none() {
            warn!(task_id = %task.task_id, "semantic judge output did not parse");
        }
        judgement.unwrap_or_else(|| SemanticJudgement {
            score: 0.0,
            reason: format!("Parsing failed: {raw}"),
        })
    }

    /// Zero without a judge call when the output carries no explanation.
    pub fn explainability(&self, persona: &Persona, output: &ParsedOutput) -> f64 {
        if output.explanation.trim().is_empty() {
            return 0.0;
        }

        let raw = self.ask(
            EXPLAINABILITY_SYSTEM_PROMPT,
            build_explainability_prompt(persona, &output.explanation),
        );
        if is_completion_error(&raw) {
            warn!(persona = %persona.name, detail = %raw, "explainability judge unavailable");
            return 0.0;
        }

        parse_explainability(&raw).unwrap_or_else(|| {
            warn!(persona = %persona.name, "explainability judge output is not a number");
            0.0
        })
    }

    fn ask(&self, system_prompt: &str, prompt: String) -> String {
        let messages = [ChatMessage::system(system_prompt), ChatMessage::user(prompt)];
        self.backend.complete(&messages, self.model, self.temperature)
    }
}

fn build_explainability_prompt(persona: &Persona, explanation: &str) -> String {
    let persona_json = serde_json::to_string(persona).unwrap_or_else(|_| persona.name.clone());
    format!(
        "Persona:\n{persona_json}\n\nExplanation:\n{explanation}\n\n\
         Rate from 0 to 1 whether the explanation:\n\
         - References key persona info\n\
         - Reasonably supports final decision\n\
         - Avoids empty templating\n\
         Only output a single number.\n"
    )
}

/// Reads `{"score": .., "reason": ..}`. The score may be a number or a
/// numeric string and is clamped to `[0, 1]`; a missing score counts as 0.
pub fn parse_semantic_judgement(raw: &str) -> Option<SemanticJudgement> {
    let Value::Object(object) = serde_json::from_str::<Value>(strip_code_fence(raw)).ok()? else {
        return None;
    };

    let score = match object.get("score") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(number)) => number.as_f64()?,
        Some(Value::String(text)) => text.trim().parse::<f64>().ok()?,
        Some(_) => return None,
    };
    let reason = match object.get("reason") {
        Some(Value::String(reason)) => reason.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Some(SemanticJudgement {
        score: clamp_unit(score),
        reason,
    })
}

pub fn parse_explainability(raw: &str) -> Option<f64> {
    let value = raw.trim().parse::<f64>().ok()?;
    value.is_finite().then(|| clamp_unit(value))
}
