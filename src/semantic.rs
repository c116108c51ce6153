use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::{CategoryDescription, EmbeddingBackend, EmbeddingConfig};

pub const LOCAL_HASH_MODEL_ID: &str = "local-hash-v1";

const HEALTH_CHECK_TEXT: &str = "embedding health check";

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn model_id(&self) -> &str;
}

/// Picks the configured backend. An HTTP backend that cannot answer a first
/// request is replaced by the local hash embedder.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    if config.backend == EmbeddingBackend::LocalHash {
        warn!(
            model = LOCAL_HASH_MODEL_ID,
            "local hash embedder only relates items sharing words with a category description"
        );
        return Ok(Box::new(LocalHashEmbedder::new(config.dimensions)));
    }

    let embedder = HttpEmbedder::from_config(config)?;
    match embedder.embed(HEALTH_CHECK_TEXT) {
        Ok(vector) => {
            info!(
                backend = ?config.backend,
                endpoint = %config.endpoint,
                model = %config.model_id,
                dimensions = vector.len(),
                "embedding backend ready"
            );
            Ok(Box::new(embedder))
        }
        Err(err) => {
            warn!(
                endpoint = %config.endpoint,
                error = %format!("{err:#}"),
                fallback = LOCAL_HASH_MODEL_ID,
                "embedding backend unreachable, consistency falls back to word matching"
            );
            Ok(Box::new(LocalHashEmbedder::new(config.dimensions)))
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default)]
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    backend: EmbeddingBackend,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .context("failed to build embedding http client")?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            client,
            backend: config.backend,
            endpoint: config.endpoint.clone(),
            model: config.model_id.clone(),
            api_key,
        })
    }

    fn post<T: Serialize>(&self, body: &T) -> Result<reqwest::blocking::Response> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        request
            .send()
            .with_context(|| format!("embedding request to {} failed", self.endpoint))?
            .error_for_status()
            .context("embedding endpoint returned an error status")
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = match self.backend {
            EmbeddingBackend::OpenAi => {
                let response: OpenAiEmbeddingResponse = self
                    .post(&OpenAiEmbeddingRequest {
                        model: &self.model,
                        input: [text],
                    })?
                    .json()
                    .context("failed to decode embedding response")?;
                response
                    .data
                    .into_iter()
                    .next()
                    .map(|data| data.embedding)
                    .ok_or_else(|| anyhow!("embedding response has no data"))?
            }
            EmbeddingBackend::Ollama | EmbeddingBackend::LocalHash => {
                let response: OllamaEmbeddingResponse = self
                    .post(&OllamaEmbeddingRequest {
                        model: &self.model,
                        prompt: text,
                    })?
                    .json()
                    .context("failed to decode embedding response")?;
                response.embedding
            }
        };

        if vector.is_empty() {
            bail!("embedding endpoint returned an empty vector");
        }
        Ok(vector)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    dimensions: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }
}

impl Embedder for LocalHashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed_text_local(text, self.dimensions))
    }

    fn model_id(&self) -> &str {
        LOCAL_HASH_MODEL_ID
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

/// Mismatched or zero vectors score zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let (l, r) = (f64::from(*left_value), f64::from(*right_value));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub struct CategoryIndex {
    entries: Vec<(String, Vec<f32>)>,
    threshold: f64,
}

impl CategoryIndex {
    pub fn build(
        embedder: &dyn Embedder,
        categories: &[CategoryDescription],
        threshold: f64,
    ) -> Result<Self> {
        if categories.is_empty() {
            bail!("category table is empty");
        }

        let mut entries = Vec::with_capacity(categories.len());
        for category in categories {
            let embedding = embedder.embed(&category.description)?;
            entries.push((category.label.clone(), embedding));
        }

        Ok(Self { entries, threshold })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Labels at least `threshold` similar to `item`, in table order.
    pub fn infer(&self, embedder: &dyn Embedder, item: &str) -> Result<Vec<String>> {
        let item_embedding = embedder.embed(item)?;
        Ok(self
            .entries
            .iter()
            .filter(|(_, embedding)| {
                cosine_similarity(&item_embedding, embedding) >= self.threshold
            })
            .map(|(label, _)| label.clone())
            .collect())
    }
}

fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}
