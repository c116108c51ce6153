use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};


pub const DEFAULT_COMPLETION_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_COMPLETION_MODEL: &str = "deepseek-chat";
pub const DEFAULT_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://127.0.0.1:11434/api/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";

pub const TASK_PROMPT_FILE: &str = "task_prompt.txt";
pub const EVAL_PROMPT_FILE: &str = "eval_prompt.txt";

const DEFAULT_TASK_PROMPT: &str = "\
You are building recommendation benchmark tasks for the persona below.

Persona:
{{persona}}

Produce {{task_count}} tasks as a JSON array. Every task is an object with:
- \"task_id\": short unique id
- \"instruction\": what the recommender must do for this persona
- \"candidate_items\": 8 to 12 item titles to rank
- \"ground_truth\": the titles from candidate_items this persona would pick

Output the JSON array only.
";

const DEFAULT_EVAL_PROMPT: &str = "\
Evaluate whether the recommendation output solves the task.

Task:
<<task>>

Output:
<<output>>

Judge correctness against the instruction and the user history, not formatting.
Respond with JSON {\"score\": <number between 0 and 1>, \"reason\": \"<one sentence>\"}.
";

/// Policy knobs for one benchmark run. Every field has a default so a partial
/// JSON file is enough to override a single value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub task_count: usize,
    pub trial_count: usize,
    pub top_k: usize,
    pub weights: FinalWeights,
    pub structural_weights: StructuralWeights,
    pub category_threshold: f64,
    pub categories: Vec<CategoryDescription>,
    pub completion: CompletionConfig,
    pub embedding: EmbeddingConfig,
    pub transport: TransportConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            task_count: 3,
            trial_count: 3,
            top_k: 5,
            weights: FinalWeights::default(),
            structural_weights: StructuralWeights::default(),
            category_threshold: 0.3,
            categories: default_categories(),
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalWeights {
    pub semantic: f64,
    pub consistency: f64,
    pub explainability: f64,
}

impl Default for FinalWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            consistency: 0.2,
            explainability: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralWeights {
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
}

impl Default for StructuralWeights {
    fn default() -> Self {
        Self {
            precision: 0.4,
            recall: 0.4,
            ndcg: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDescription {
    pub label: String,
    pub description: String,
}

fn default_categories() -> Vec<CategoryDescription> {
    [
        ("Action", "action, fight, war, mission, killer"),
        ("Thriller", "thrill, crime, murder, dark, detective"),
        ("Drama", "life, family, love, story"),
        ("Comedy", "fun, comedy, funny"),
        ("Romance", "love, romance, relationship"),
    ]
    .into_iter()
    .map(|(label, description)| CategoryDescription {
        label: label.to_string(),
        description: description.to_string(),
    })
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub generation_temperature: f64,
    pub judge_temperature: f64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COMPLETION_ENDPOINT.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_ms: 60_000,
            generation_temperature: 0.0,
            judge_temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingBackend {
    /// Ollama `/api/embeddings` (`{model, prompt}` -> `{embedding}`).
    #[default]
    #[serde(rename = "ollama")]
    Ollama,
    /// OpenAI-compatible `/v1/embeddings` (`{model, input}` -> `{data[0].embedding}`).
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "local_hash")]
    LocalHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub endpoint: String,
    pub model_id: String,
    pub api_key_env: Option<String>,
    pub timeout_ms: u64,
    /// Vector size of the local hash backend.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key_env: None,
            timeout_ms: 30_000,
            dimensions: 384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}

impl BenchConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                let config: BenchConfig = serde_json::from_slice(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?;
                info!(path = %path.display(), "loaded bench config");
                config
            }
            None => BenchConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, task_count: Option<usize>, trial_count: Option<usize>) -> Self {
        if let Some(task_count) = task_count {
            self.task_count = task_count;
        }
        if let Some(trial_count) = trial_count {
            self.trial_count = trial_count;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            bail!("top_k must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.category_threshold) {
            bail!(
                "category_threshold must lie in [0, 1], got {}",
                self.category_threshold
            );
        }
        let weights = [
            self.weights.semantic,
            self.weights.consistency,
            self.weights.explainability,
            self.structural_weights.precision,
            self.structural_weights.recall,
            self.structural_weights.ndcg,
        ];
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
            bail!("score weights must be finite and non-negative");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub task_prompt: String,
    pub eval_prompt: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            task_prompt: DEFAULT_TASK_PROMPT.to_string(),
            eval_prompt: DEFAULT_EVAL_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn load(prompts_dir: &Path) -> Result<Self> {
        Ok(Self {
            task_prompt: read_template(prompts_dir, TASK_PROMPT_FILE, DEFAULT_TASK_PROMPT)?,
            eval_prompt: read_template(prompts_dir, EVAL_PROMPT_FILE, DEFAULT_EVAL_PROMPT)?,
        })
    }
}

fn read_template(prompts_dir: &Path, file_name: &str, fallback: &str) -> Result<String> {
    let path = prompts_dir.join(file_name);
    if !path.exists() {
        warn!(path = %path.display(), "prompt template missing, using built-in template");
        return Ok(fallback.to_string());
    }

    fs::read_to_string(&path)
        .with_context(|| format!("failed to read prompt template {}", path.display()))
}
