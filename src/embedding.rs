//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in
//! `codectx-core`:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`HashProvider`]**: deterministic local feature hashing. No network, no
//!   model download; quality is lexical rather than semantic.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use codectx::config::EmbeddingConfig;
//! # use codectx::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use codectx_core::chunk::words;
use codectx_core::embedding::{normalize, EmbeddingProvider};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::Error;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_HASH_DIMS: usize = 256;

pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "hash" => Ok(Box::new(HashProvider::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    fn estimate_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in the config.")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    max_retries: u32,
    price_per_1k: f64,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let price_per_1k = config
            .cost_per_1k_tokens
            .unwrap_or_else(|| openai_price_per_1k(&model));

        Ok(Self {
            model,
            dims,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            max_retries: config.max_retries,
            price_per_1k,
            client,
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // Only the v3 models accept a shortened output size.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dims);
        }
        body
    }
}

/// USD per 1,000 tokens for known embedding models.
fn openai_price_per_1k(model: &str) -> f64 {
    match model {
        "text-embedding-3-small" => 0.000_02,
        "text-embedding-3-large" => 0.000_13,
        _ => 0.000_1,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn estimate_cost(&self, tokens: usize) -> f64 {
        tokens as f64 / 1000.0 * self.price_per_1k
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = self.request_body(texts);
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
                            Error::ProviderFailure(format!("invalid OpenAI response: {}", e))
                        })?;
                        return order_embeddings(parsed, texts.len(), self.dims);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = format!("OpenAI API error {}: {}", status, body_text);

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = status.as_u16(), attempt, "transient embedding failure");
                        last_err = Some(message);
                        continue;
                    }

                    return Err(Error::ProviderFailure(message).into());
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(Error::ProviderFailure(
            last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
        )
        .into())
    }
}

/// Put response vectors back in input order and check their shape.
fn order_embeddings(
    mut response: EmbeddingsResponse,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(Error::ProviderFailure(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        ))
        .into());
    }
    response.data.sort_by_key(|d| d.index);
    let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::ProviderFailure(format!(
            "expected {}-dimensional vectors, got {}",
            dims,
            bad.len()
        ))
        .into());
    }
    Ok(vectors)
}

// ============ Hash Provider ============

/// Local feature-hashing embedder.
///
/// Each lowercased word (identifiers split on camelCase and punctuation) is
/// hashed to a signed bucket; the bucket counts are L2-normalized. Texts
/// sharing vocabulary get high cosine similarity.
pub struct HashProvider {
    dims: usize,
    model: String,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model: format!("feature-hash-{}", dims),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in words(text) {
            if word.chars().count() < 2 {
                continue;
            }
            let digest = Sha256::digest(word.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(bytes);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn estimate_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
