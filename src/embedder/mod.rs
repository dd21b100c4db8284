//! Embedding clients behind a single [`Embedder`] seam.
//!
//! Two hosted backends are provided: any OpenAI-compatible `/embeddings`
//! endpoint ([`openai::OpenAiEmbedder`]) and the Hugging Face feature-extraction
//! pipeline ([`huggingface::HfInferenceEmbedder`]). A deployment picks one.

use std::time::Duration;

use anyhow::anyhow;
use reqwest::StatusCode;

use crate::error::{fingerprint, PipelineError, Result};
use crate::records::EmbeddingVector;

pub mod huggingface;
pub mod openai;

/// Text → vector service. Implementations must be deterministic for identical
/// input and model version, and safe to share across request threads.
pub trait Embedder: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Largest batch accepted by [`Embedder::embed_batch`].
    fn batch_size(&self) -> usize;

    /// Embeds every input, preserving order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<EmbeddingVector>>;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed_batch(&[text])?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(PipelineError::embedding(
                fingerprint(text),
                anyhow!("expected exactly one embedding for a single input"),
            )),
        }
    }
}

/// Identifier used in errors for a batch: input count plus a fingerprint of the
/// concatenated inputs.
pub fn batch_fingerprint(inputs: &[&str]) -> String {
    match inputs {
        [single] => fingerprint(single),
        _ => format!("batch[{}]:{}", inputs.len(), fingerprint(&inputs.concat())),
    }
}

/// Verifies that the upstream returned one vector per input with the expected
/// dimension.
pub(crate) fn check_shape(
    vectors: &[EmbeddingVector],
    inputs: usize,
    dimensions: Option<usize>,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        vectors.len() == inputs,
        "service returned {} embeddings for {} inputs",
        vectors.len(),
        inputs
    );
    if let Some(expected) = dimensions {
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            anyhow::bail!(
                "embedding has {} dimensions, expected {}",
                bad.len(),
                expected
            );
        }
    }
    anyhow::ensure!(
        vectors.iter().all(|v| !v.is_empty()),
        "service returned an empty embedding"
    );
    Ok(())
}

pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        returned: usize,
    }

    impl Embedder for FixedEmbedder {
        fn model(&self) -> &str {
            "fixed"
        }

        fn batch_size(&self) -> usize {
            8
        }

        fn embed_batch(&self, _inputs: &[&str]) -> Result<Vec<EmbeddingVector>> {
            Ok(vec![vec![1.0, 0.0]; self.returned])
        }
    }

    #[test]
    fn embed_requires_exactly_one_vector() {
        assert_eq!(
            FixedEmbedder { returned: 1 }.embed("cough").expect("embed"),
            vec![1.0, 0.0]
        );
        let err = FixedEmbedder { returned: 2 }.embed("cough").unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingService { .. }));
        let err = FixedEmbedder { returned: 0 }.embed("cough").unwrap_err();
        assert!(!err.to_string().contains("cough"));
    }

    #[test]
    fn shape_check_flags_count_and_dimension_mismatch() {
        let vectors = vec![vec![0.1; 384], vec![0.2; 384]];
        assert!(check_shape(&vectors, 2, Some(384)).is_ok());
        assert!(check_shape(&vectors, 3, Some(384)).is_err());
        let err = check_shape(&vectors, 2, Some(768)).unwrap_err();
        assert_eq!(err.to_string(), "embedding has 384 dimensions, expected 768");
        assert!(check_shape(&[Vec::new()], 1, None).is_err());
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn batch_fingerprint_hides_inputs() {
        let id = batch_fingerprint(&["fever", "chills"]);
        assert!(id.starts_with("batch[2]:"));
        assert!(!id.contains("fever"));
        assert_eq!(batch_fingerprint(&["fever"]), fingerprint("fever"));
    }
}
