//! Query → context passages via one embedding call and one index query.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{fingerprint, Result};
use crate::index::VectorIndex;

/// Default number of passages handed to the generator.
pub const DEFAULT_TOP_K: usize = 3;

/// Embeds a query and returns the `context` metadata of the closest records.
/// Query validation belongs to the caller.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    namespace: String,
    top_k: usize,
}

impl Retriever {
    /// Wires the retriever to its collaborators.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            namespace: namespace.into(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Overrides the default passage count.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Namespace queried.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Default passage count used by [`Retriever::retrieve_default`].
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieves with the configured default `k`.
    pub fn retrieve_default(&self, query: &str) -> Result<Vec<String>> {
        self.retrieve(query, self.top_k)
    }

    /// Returns up to `k` passages in the order the index ranked them. An empty
    /// result means nothing relevant is indexed. Failures are not retried.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let started = Instant::now();
        let vector = self.embedder.embed(query)?;
        let matches = self.index.query(&vector, k, &self.namespace)?;
        let contexts: Vec<String> = matches
            .into_iter()
            .take(k)
            .map(|m| m.metadata.context)
            .collect();
        debug!(
            input_id = %fingerprint(query),
            namespace = %self.namespace,
            k,
            returned = contexts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved contexts"
        );
        Ok(contexts)
    }
}
