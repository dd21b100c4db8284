//! Error kinds surfaced by the retrieval pipeline and its collaborators.

use thiserror::Error;

/// Failures that escape the pipeline. Validation rejections and empty retrievals
/// are not errors; they resolve to fixed advisory messages in [`crate::pipeline`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid chunking parameters or missing/invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedding service failed for the input with the given fingerprint.
    #[error("embedding service error for input {input_id}: {reason}")]
    EmbeddingService {
        /// Fingerprint of the offending input (never the raw text).
        input_id: String,
        /// Upstream failure description.
        reason: String,
    },

    /// The vector index rejected or failed an upsert.
    #[error("index write error in namespace '{namespace}' ({records} records): {reason}")]
    IndexWrite {
        /// Target namespace.
        namespace: String,
        /// Number of records in the failed request.
        records: usize,
        /// Upstream failure description.
        reason: String,
    },

    /// The vector index failed a similarity query.
    #[error("index query error in namespace '{namespace}': {reason}")]
    IndexQuery {
        /// Queried namespace.
        namespace: String,
        /// Upstream failure description.
        reason: String,
    },

    /// The completion service failed or returned no usable text.
    #[error("generation service error: {0}")]
    GenerationService(String),
}

impl PipelineError {
    /// Builds a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wraps an embedding client failure, keeping the whole context chain.
    pub fn embedding(input_id: impl Into<String>, err: anyhow::Error) -> Self {
        Self::EmbeddingService {
            input_id: input_id.into(),
            reason: format!("{err:#}"),
        }
    }

    /// Wraps an index upsert failure.
    pub fn index_write(namespace: &str, records: usize, err: anyhow::Error) -> Self {
        Self::IndexWrite {
            namespace: namespace.to_string(),
            records,
            reason: format!("{err:#}"),
        }
    }

    /// Wraps an index query failure.
    pub fn index_query(namespace: &str, err: anyhow::Error) -> Self {
        Self::IndexQuery {
            namespace: namespace.to_string(),
            reason: format!("{err:#}"),
        }
    }

    /// Wraps a completion client failure.
    pub fn generation(err: anyhow::Error) -> Self {
        Self::GenerationService(format!("{err:#}"))
    }

    /// Short machine-readable label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::EmbeddingService { .. } => "embedding_service",
            Self::IndexWrite { .. } => "index_write",
            Self::IndexQuery { .. } => "index_query",
            Self::GenerationService(_) => "generation_service",
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fingerprint used in logs and errors in place of user-entered text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(text.as_bytes());
    format!("{:08x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn embedding_error_keeps_context_chain() {
        let err = Err::<(), _>(anyhow!("503 Service Unavailable"))
            .context("embeddings request failed")
            .unwrap_err();
        let err = PipelineError::embedding("query:1234abcd", err);
        assert_eq!(
            err.to_string(),
            "embedding service error for input query:1234abcd: embeddings request failed: 503 Service Unavailable"
        );
        assert_eq!(err.kind(), "embedding_service");
    }

    #[test]
    fn index_errors_name_the_namespace() {
        let write = PipelineError::index_write("pubmed-data", 50, anyhow!("timeout"));
        assert!(write.to_string().contains("'pubmed-data' (50 records)"));
        let query = PipelineError::index_query("pubmed-data", anyhow!("bad vector"));
        assert_eq!(
            query.to_string(),
            "index query error in namespace 'pubmed-data': bad vector"
        );
    }

    #[test]
    fn fingerprint_is_stable_and_hides_text() {
        let a = fingerprint("I have a fever and chills");
        let b = fingerprint("I have a fever and chills");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(!a.contains("fever"));
        assert_ne!(a, fingerprint("I have a cough"));
    }
}
