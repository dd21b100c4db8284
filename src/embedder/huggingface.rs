//! Hugging Face hosted feature-extraction client.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{batch_fingerprint, check_shape, is_retryable_error, retry_backoff, should_retry};
use super::Embedder;
use crate::error::PipelineError;
use crate::records::EmbeddingVector;

/// Default sentence-transformers model; produces 384-dimensional vectors.
pub const DEFAULT_HF_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Blocking embeddings client for the hosted feature-extraction pipeline.
#[derive(Clone)]
pub struct HfInferenceEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_attempts: usize,
    batch_size: usize,
}

impl HfInferenceEmbedder {
    /// Builds a new client.
    ///
    /// # Arguments
    /// * `api_token` - Bearer token (usually from `HF_API_TOKEN`)
    /// * `base_url` - Inference host, e.g. `https://router.huggingface.co/hf-inference/models`
    /// * `model` - Model repository id, e.g. `sentence-transformers/all-MiniLM-L6-v2`
    pub fn new(
        api_token: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_attempts: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_token.trim().is_empty(), "missing Hugging Face API token");
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Hugging Face endpoint must be an http(s) URL"
        );
        anyhow::ensure!(!model.trim().is_empty(), "missing Hugging Face model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid Hugging Face API token")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Hugging Face HTTP client")?;
        let endpoint = format!(
            "{}/{}/pipeline/feature-extraction",
            base_url.trim_end_matches('/'),
            model.trim()
        );
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            max_attempts: max_attempts.max(1),
            batch_size: batch_size.max(1),
        })
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<EmbeddingVector>> {
        anyhow::ensure!(
            inputs.len() <= self.batch_size,
            "batch of {} exceeds configured max {}",
            inputs.len(),
            self.batch_size
        );

        let mut attempt = 0usize;
        loop {
            let request = FeatureRequest {
                inputs,
                options: FeatureOptions {
                    wait_for_model: true,
                },
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload: FeatureResponse = resp
                            .json()
                            .context("failed to parse Hugging Face feature-extraction response")?;
                        let vectors = payload.into_embeddings()?;
                        check_shape(&vectors, inputs.len(), self.dimensions)?;
                        return Ok(vectors);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        warn!(%status, attempt, "retrying Hugging Face inference request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("Hugging Face inference request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        warn!(error = %err, attempt, "retrying Hugging Face inference request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err).context("Hugging Face inference request did not complete");
                }
            }
        }
    }
}

impl Embedder for HfInferenceEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> crate::error::Result<Vec<EmbeddingVector>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.request(inputs)
            .map_err(|err| PipelineError::embedding(batch_fingerprint(inputs), err))
    }
}

#[derive(Serialize)]
struct FeatureRequest<'a> {
    inputs: &'a [&'a str],
    options: FeatureOptions,
}

#[derive(Serialize)]
struct FeatureOptions {
    wait_for_model: bool,
}

/// Sentence-transformers models return one pooled vector per input; plain
/// encoders return per-token vectors that are mean-pooled here.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureResponse {
    Pooled(Vec<Vec<f32>>),
    TokenLevel(Vec<Vec<Vec<f32>>>),
}

impl FeatureResponse {
    fn into_embeddings(self) -> Result<Vec<EmbeddingVector>> {
        match self {
            Self::Pooled(vectors) => Ok(vectors),
            Self::TokenLevel(per_input) => per_input.into_iter().map(mean_pool).collect(),
        }
    }
}

fn mean_pool(tokens: Vec<Vec<f32>>) -> Result<EmbeddingVector> {
    let width = tokens
        .first()
        .map(Vec::len)
        .ok_or_else(|| anyhow!("token-level embedding has no tokens"))?;
    anyhow::ensure!(
        tokens.iter().all(|t| t.len() == width),
        "token-level embedding has ragged rows"
    );
    let mut pooled = vec![0.0f32; width];
    for token in &tokens {
        for (acc, value) in pooled.iter_mut().zip(token) {
            *acc += value;
        }
    }
    let count = tokens.len() as f32;
    pooled.iter_mut().for_each(|v| *v /= count);
    Ok(pooled)
}
