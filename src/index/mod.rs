//! Vector index adapters.

use crate::error::Result;
use crate::records::{IndexedRecord, QueryMatch};

pub mod memory;
pub mod pinecone;

pub use memory::MemoryIndex;
pub use pinecone::PineconeIndex;

/// Similarity index partitioned by namespace.
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces records by id.
    fn upsert(&self, records: &[IndexedRecord], namespace: &str) -> Result<()>;

    /// Returns at most `top_k` matches, closest first.
    fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<QueryMatch>>;
}
