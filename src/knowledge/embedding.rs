//! Text embedding backends for the knowledge index.
//!
//! `EmbeddingProvider` mirrors the LLM provider enum: a local hashed
//! bag-of-words embedder for offline use, and an OpenAI-compatible
//! `/v1/embeddings` client. Vectors from different embedders are not
//! comparable, so each provider reports a [`model_id`](EmbeddingProvider::model_id)
//! that the store records next to every vector.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::EmbeddingConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
    #[error("embedding request timed out")]
    Timeout,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    Hashed(HashedEmbedder),
    OpenAiCompatible(OpenAiEmbedder),
}

impl EmbeddingProvider {
    pub fn build(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self, EmbeddingError> {
        match config.provider.as_str() {
            "hashed" => Ok(Self::Hashed(HashedEmbedder::new(config.dims))),
            "openai" | "openai-compatible" => Ok(Self::OpenAiCompatible(OpenAiEmbedder::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.timeout_seconds,
                api_key,
            )?)),
            other => Err(EmbeddingError::UnknownProvider(other.to_string())),
        }
    }

    /// Embed each text; output order matches input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Hashed(e) => Ok(texts.iter().map(|t| e.embed_one(t)).collect()),
            Self::OpenAiCompatible(e) => e.embed(texts).await,
        }
    }

    /// Identifies the vector space, e.g. `hashed-384`.
    pub fn model_id(&self) -> String {
        match self {
            Self::Hashed(e) => format!("hashed-{}", e.dims),
            Self::OpenAiCompatible(e) => e.model.clone(),
        }
    }
}

// ── Hashed bag-of-words ───────────────────────────────────────────────────────

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "i", "in",
    "is", "it", "my", "of", "on", "or", "the", "to", "was", "with",
];

/// Deterministic feature-hashing embedder. Each word and each of its
/// character trigrams is hashed into one of `dims` buckets with a signed
/// weight; the result is L2-normalised. Shared prefixes ("itch", "itching")
/// land close together through the trigrams.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dims: usize,
}

impl HashedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w));

        for word in words {
            self.add_feature(&mut v, word, 1.0);
            let padded: Vec<char> = format!("^{word}$").chars().collect();
            for tri in padded.windows(3) {
                let gram: String = tri.iter().collect();
                self.add_feature(&mut v, &gram, 0.5);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(head) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, api_key })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let payload = EmbeddingRequest { model: &self.model, input: texts };
        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        debug!(model = %self.model, inputs = texts.len(), "sending embedding request");

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "embedding request failed");
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Request(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(EmbeddingError::Request(format!("HTTP {status}: {body}")));
        }
        let mut parsed = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if vectors.iter().any(Vec::is_empty) {
            return Err(EmbeddingError::Malformed("empty embedding vector".into()));
        }
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Cosine similarity; zero vectors and length mismatches score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}
