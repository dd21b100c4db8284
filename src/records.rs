//! Shared record shapes exchanged between ingestion, the index, and retrieval.

use serde::{Deserialize, Serialize};

/// Dense embedding produced by an [`crate::embedder::Embedder`].
pub type EmbeddingVector = Vec<f32>;

/// Maximum characters of passage text kept in index metadata.
pub const CONTEXT_METADATA_CHARS: usize = 1000;

/// Metadata persisted next to each vector and returned on query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Human-readable title (question text or corpus label).
    pub title: String,
    /// Passage text handed to the generator, truncated on ingestion.
    pub context: String,
    /// Dataset or file the passage came from.
    pub source: String,
}

impl RecordMetadata {
    /// Builds metadata, truncating `context` to [`CONTEXT_METADATA_CHARS`].
    pub fn new(title: impl Into<String>, context: &str, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            context: truncate_chars(context, CONTEXT_METADATA_CHARS).to_string(),
            source: source.into(),
        }
    }
}

/// Row written to the vector index. Upserting an existing `id` replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Unique record identifier.
    pub id: String,
    /// Embedding values.
    pub values: EmbeddingVector,
    /// Attached metadata.
    pub metadata: RecordMetadata,
}

/// Single similarity match returned by [`crate::index::VectorIndex::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    /// Record identifier.
    pub id: String,
    /// Similarity score as reported by the index (higher is closer).
    pub score: f32,
    /// Record metadata.
    pub metadata: RecordMetadata,
}

/// Truncates to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
