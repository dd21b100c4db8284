//! In-process cosine-similarity index for local corpora and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::anyhow;

use super::VectorIndex;
use crate::error::{PipelineError, Result};
use crate::records::{IndexedRecord, QueryMatch};

/// Brute-force index. Records are kept per namespace, keyed by id, so a second
/// upsert of the same id replaces the first.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    namespaces: RwLock<HashMap<String, BTreeMap<String, IndexedRecord>>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored in `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|guard| guard.get(namespace).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Returns true when `namespace` holds no records.
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Fetches a record by id.
    pub fn get(&self, id: &str, namespace: &str) -> Option<IndexedRecord> {
        let guard = self.namespaces.read().ok()?;
        guard.get(namespace)?.get(id).cloned()
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, records: &[IndexedRecord], namespace: &str) -> Result<()> {
        let mut guard = self.namespaces.write().map_err(|_| {
            PipelineError::index_write(namespace, records.len(), anyhow!("index lock poisoned"))
        })?;
        let expected = guard
            .get(namespace)
            .and_then(|entries| entries.values().next())
            .or_else(|| records.first())
            .map(|record| record.values.len());
        // Whole batch is checked before any write so a rejected upsert stores nothing.
        if let Some(dims) = expected {
            if let Some(bad) = records.iter().find(|record| record.values.len() != dims) {
                return Err(PipelineError::index_write(
                    namespace,
                    records.len(),
                    anyhow!(
                        "record {} has dimension {}, namespace uses {}",
                        bad.id,
                        bad.values.len(),
                        dims
                    ),
                ));
            }
        }
        let entries = guard.entry(namespace.to_string()).or_default();
        for record in records {
            entries.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<QueryMatch>> {
        let guard = self
            .namespaces
            .read()
            .map_err(|_| PipelineError::index_query(namespace, anyhow!("index lock poisoned")))?;
        let Some(entries) = guard.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<QueryMatch> = Vec::with_capacity(entries.len());
        for record in entries.values() {
            if record.values.len() != vector.len() {
                return Err(PipelineError::index_query(
                    namespace,
                    anyhow!(
                        "query dimension {} does not match index dimension {}",
                        vector.len(),
                        record.values.len()
                    ),
                ));
            }
            scored.push(QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: record.metadata.clone(),
            });
        }
        // Stable sort keeps id order for equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordMetadata;

    fn record(id: &str, values: Vec<f32>, context: &str) -> IndexedRecord {
        IndexedRecord {
            id: id.to_string(),
            values,
            metadata: RecordMetadata::new(format!("title {id}"), context, "test"),
        }
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let index = MemoryIndex::new();
        index
            .upsert(&[record("17", vec![1.0, 0.0], "first")], "ns")
            .expect("upsert");
        index
            .upsert(&[record("17", vec![1.0, 0.0], "second")], "ns")
            .expect("upsert");
        assert_eq!(index.len("ns"), 1);
        assert_eq!(index.get("17", "ns").expect("record").metadata.context, "second");
        let matches = index.query(&[1.0, 0.0], 5, "ns").expect("query");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].metadata.context, "second");
    }

    #[test]
    fn query_orders_by_descending_similarity() {
        let index = MemoryIndex::new();
        index
            .upsert(
                &[
                    record("far", vec![0.0, 1.0], "far"),
                    record("near", vec![1.0, 0.1], "near"),
                    record("mid", vec![1.0, 1.0], "mid"),
                ],
                "ns",
            )
            .expect("upsert");
        let matches = index.query(&[1.0, 0.0], 2, "ns").expect("query");
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(matches[0].score >= matches[1].score);
    }

    #[test]
    fn namespaces_are_isolated() {
        let index = MemoryIndex::new();
        index
            .upsert(&[record("a", vec![1.0], "only in a")], "a")
            .expect("upsert");
        assert!(index.query(&[1.0], 3, "b").expect("query").is_empty());
        assert!(index.is_empty("b"));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = MemoryIndex::new();
        index
            .upsert(&[record("a", vec![1.0, 0.0], "x")], "ns")
            .expect("upsert");
        assert!(matches!(
            index.upsert(&[record("b", vec![1.0], "y")], "ns"),
            Err(PipelineError::IndexWrite { .. })
        ));
        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 1, "ns"),
            Err(PipelineError::IndexQuery { .. })
        ));
    }

    #[test]
    fn rejected_batch_writes_nothing() {
        let index = MemoryIndex::new();
        let batch = [record("a", vec![1.0, 0.0], "x"), record("b", vec![1.0], "y")];
        assert!(matches!(
            index.upsert(&batch, "ns"),
            Err(PipelineError::IndexWrite { .. })
        ));
        assert!(index.is_empty("ns"));

        index
            .upsert(&[record("c", vec![0.0, 1.0], "z")], "ns")
            .expect("upsert");
        assert!(index
            .upsert(&[record("d", vec![1.0, 1.0], "w"), record("e", vec![1.0], "v")], "ns")
            .is_err());
        assert_eq!(index.len("ns"), 1);
        assert!(index.get("d", "ns").is_none());
    }
}
