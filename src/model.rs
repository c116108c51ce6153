use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const UNKNOWN_TASK_ID: &str = "task-unknown";
pub const GENERATOR_PARSE_ERROR: &str = "JSON parse failed";
pub const STRUCTURAL_ROLE: &str = "diagnostic_only";
/// Status line an agent may put in front of its JSON reply.
pub const COMPLETION_STATUS_TEXT: &str = "Prediction completed successfully";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub preferences: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Persona {
    /// Builds a persona from one JSON object. Returns `None` for anything that
    /// is not an object or has no usable `name`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let name = scalar_to_string(object.get("name")?)?;

        let mut extra = object.clone();
        extra.remove("name");
        let preferences = string_list(extra.remove("preferences").as_ref())
            .into_iter()
            .collect::<BTreeSet<String>>();
        let history = string_list(extra.remove("history").as_ref());

        Some(Self {
            name,
            preferences,
            history,
            extra,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitledItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroundTruthItem {
    Title(String),
    Record(TitledItem),
    Other(Value),
}

impl GroundTruthItem {
    /// Label compared against predictions. Records without a title count as
    /// an empty label; other shapes are ignored.
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Title(title) => Some(title.clone()),
            Self::Record(record) => Some(record.title.clone().unwrap_or_default()),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub candidate_items: Vec<String>,
    #[serde(default)]
    pub ground_truth: Vec<GroundTruthItem>,
    #[serde(default)]
    pub user_history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskSpec {
    /// Lenient conversion from generator output. Missing or malformed fields
    /// fall back to empty defaults; a non-object item becomes an error task.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::error_marker(
                value.to_string(),
                "generated task is not a JSON object".to_string(),
            );
        };

        let task_id = object
            .remove("task_id")
            .as_ref()
            .and_then(scalar_to_string)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TASK_ID.to_string());
        let instruction = object
            .remove("instruction")
            .as_ref()
            .and_then(scalar_to_string)
            .unwrap_or_default();
        let candidate_items = string_list(object.remove("candidate_items").as_ref());
        let ground_truth = match object.remove("ground_truth") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value::<GroundTruthItem>(item.clone())
                        .unwrap_or(GroundTruthItem::Other(item))
                })
                .collect(),
            _ => Vec::new(),
        };
        let user_history = string_list(object.remove("user_history").as_ref());
        let raw_output = object
            .remove("raw_output")
            .as_ref()
            .and_then(scalar_to_string);
        let error = object.remove("error").as_ref().and_then(scalar_to_string);

        Self {
            task_id,
            instruction,
            candidate_items,
            ground_truth,
            user_history,
            raw_output,
            error,
            extra: object,
        }
    }

    pub fn error_marker(raw_output: String, error: String) -> Self {
        Self {
            task_id: UNKNOWN_TASK_ID.to_string(),
            instruction: String::new(),
            candidate_items: Vec::new(),
            ground_truth: Vec::new(),
            user_history: Vec::new(),
            raw_output: Some(raw_output),
            error: Some(error),
            extra: Map::new(),
        }
    }

    pub fn truth_labels(&self) -> Vec<String> {
        self.ground_truth
            .iter()
            .filter_map(GroundTruthItem::label)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prediction: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParsedOutput {
    pub fn degraded(raw: String) -> Self {
        Self {
            raw: Some(raw),
            ..Self::default()
        }
    }

    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let prediction = string_list(object.remove("prediction").as_ref());
        let explanation = object
            .remove("explanation")
            .as_ref()
            .and_then(scalar_to_string)
            .unwrap_or_default();
        let raw = object.remove("raw").as_ref().and_then(scalar_to_string);

        Self {
            prediction,
            explanation,
            raw,
            extra: object,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralScores {
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
    /// Weighted composite of the three values above. Never part of `final_score`.
    pub score: f64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub task_id: String,
    pub instruction: String,
    pub output: ParsedOutput,
    pub structural: StructuralScores,
    pub semantic: f64,
    pub semantic_reason: String,
    pub consistency: f64,
    pub explainability: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaResult {
    pub persona: String,
    pub persona_score: f64,
    pub tasks: Vec<ScoreRecord>,
}

/// Accepts a list of scalars or a single string. Nested values are dropped.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
