//! Recording doubles for the collaborator traits.

use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::embedder::Embedder;
use crate::error::{PipelineError, Result as PipelineResult};
use crate::index::VectorIndex;
use crate::providers::{CompletionProvider, ProviderRequest};
use crate::records::{EmbeddingVector, IndexedRecord, QueryMatch, RecordMetadata};

pub(crate) struct RecordingEmbedder {
    pub vector: EmbeddingVector,
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn new(vector: EmbeddingVector) -> Self {
        Self {
            vector,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Embedder for RecordingEmbedder {
    fn model(&self) -> &str {
        "recording"
    }

    fn batch_size(&self) -> usize {
        16
    }

    fn embed_batch(&self, inputs: &[&str]) -> PipelineResult<Vec<EmbeddingVector>> {
        let mut calls = self.calls.lock().unwrap();
        calls.extend(inputs.iter().map(|s| s.to_string()));
        if self.fail {
            return Err(PipelineError::embedding(
                crate::embedder::batch_fingerprint(inputs),
                anyhow!("embedding upstream returned 503"),
            ));
        }
        Ok(vec![self.vector.clone(); inputs.len()])
    }
}

pub(crate) struct ScriptedIndex {
    pub matches: Vec<QueryMatch>,
    pub fail: bool,
    pub queries: Mutex<Vec<(EmbeddingVector, usize, String)>>,
}

impl ScriptedIndex {
    pub fn returning(contexts: &[&str]) -> Self {
        let matches = contexts
            .iter()
            .enumerate()
            .map(|(idx, context)| QueryMatch {
                id: format!("doc-{idx}"),
                score: 1.0 - idx as f32 * 0.1,
                metadata: RecordMetadata::new(format!("title {idx}"), context, "pubmed"),
            })
            .collect();
        Self {
            matches,
            fail: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::returning(&[])
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

impl VectorIndex for ScriptedIndex {
    fn upsert(&self, records: &[IndexedRecord], namespace: &str) -> PipelineResult<()> {
        Err(PipelineError::index_write(
            namespace,
            records.len(),
            anyhow!("scripted index is read-only"),
        ))
    }

    fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> PipelineResult<Vec<QueryMatch>> {
        self.queries
            .lock()
            .unwrap()
            .push((vector.to_vec(), top_k, namespace.to_string()));
        if self.fail {
            return Err(PipelineError::index_query(namespace, anyhow!("connection reset")));
        }
        Ok(self.matches.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

pub(crate) struct RecordingProvider {
    pub answer: Option<String>,
    pub requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingProvider {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionProvider for RecordingProvider {
    fn model(&self) -> &str {
        "recording"
    }

    fn complete(&self, request: &ProviderRequest) -> Result<String> {
        self.requests.lock().unwrap().push(RecordedRequest {
            system: request.system.to_string(),
            user: request.user.to_string(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        });
        self.answer
            .clone()
            .ok_or_else(|| anyhow!("chat completions returned 500 Internal Server Error"))
    }
}
