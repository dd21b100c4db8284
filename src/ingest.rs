//! Offline ingestion: embed source documents in batches and upsert them.
//!
//! The run never aborts on a single failure. A record whose embedding fails is
//! skipped; a batch whose upsert still fails after the configured attempts is
//! skipped. Both are logged and counted in the [`IngestReport`].

use std::fmt;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dataset::{SkippedRows, SourceDocument};
use crate::embedder::Embedder;
use crate::error::fingerprint;
use crate::index::VectorIndex;
use crate::records::IndexedRecord;

/// Records per upsert request.
pub const DEFAULT_INGEST_BATCH: usize = 50;

/// Batch loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Target namespace.
    pub namespace: String,
    /// Records per upsert request.
    pub batch_size: usize,
    /// Attempts per upsert before the batch is skipped.
    pub upsert_attempts: usize,
    /// Base delay between upsert attempts, doubled each retry.
    pub retry_base: Duration,
    /// Pause after each batch.
    pub batch_delay: Duration,
}

impl IngestConfig {
    /// Defaults for `namespace`: batches of 50, three upsert attempts.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            batch_size: DEFAULT_INGEST_BATCH,
            upsert_attempts: 3,
            retry_base: Duration::from_millis(500),
            batch_delay: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        self.retry_base * (1u32 << attempt.min(5) as u32)
    }
}

/// Totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents read from the source, including unreadable ones.
    pub seen: usize,
    /// Documents embedded successfully.
    pub embedded: usize,
    /// Documents dropped because the source row or its embedding failed.
    pub skipped_records: usize,
    /// Records written by successful upserts.
    pub upserted_records: usize,
    /// Batches written.
    pub upserted_batches: usize,
    /// Batches dropped after exhausting upsert attempts.
    pub failed_batches: usize,
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen {}, embedded {}, skipped {}, upserted {} record{} in {} batch{}, failed batches {}",
            self.seen,
            self.embedded,
            self.skipped_records,
            self.upserted_records,
            if self.upserted_records == 1 { "" } else { "s" },
            self.upserted_batches,
            if self.upserted_batches == 1 { "" } else { "es" },
            self.failed_batches
        )
    }
}

/// Sequential embed-and-upsert loop over borrowed clients.
pub struct Ingestor<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    config: IngestConfig,
}

impl<'a> Ingestor<'a> {
    /// Creates an ingestor writing to `config.namespace`.
    pub fn new(embedder: &'a dyn Embedder, index: &'a dyn VectorIndex, config: IngestConfig) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Consumes `documents`, calling `on_batch` with running totals after each
    /// batch is settled.
    pub fn run<I, F>(&self, documents: I, mut on_batch: F) -> IngestReport
    where
        I: IntoIterator<Item = Result<SourceDocument>>,
        F: FnMut(&IngestReport),
    {
        let batch_size = self.config.batch_size.max(1);
        let mut report = IngestReport::default();
        let mut batch: Vec<SourceDocument> = Vec::with_capacity(batch_size);
        for item in documents {
            report.seen += 1;
            match item {
                Ok(doc) => batch.push(doc),
                Err(err) => {
                    let lost = err
                        .downcast_ref::<SkippedRows>()
                        .map_or(1, |skipped| skipped.rows.max(1));
                    report.seen += lost - 1;
                    report.skipped_records += lost;
                    warn!(lost, error = %format!("{err:#}"), "skipping unreadable source record");
                }
            }
            if batch.len() >= batch_size {
                self.settle(std::mem::take(&mut batch), &mut report);
                on_batch(&report);
                self.pause();
            }
        }
        if !batch.is_empty() {
            self.settle(batch, &mut report);
            on_batch(&report);
        }
        info!(namespace = %self.config.namespace, %report, "ingestion finished");
        report
    }

    fn pause(&self) {
        if !self.config.batch_delay.is_zero() {
            thread::sleep(self.config.batch_delay);
        }
    }

    fn settle(&self, batch: Vec<SourceDocument>, report: &mut IngestReport) {
        let submitted = batch.len();
        let records = self.embed(batch);
        report.embedded += records.len();
        report.skipped_records += submitted - records.len();
        if records.is_empty() {
            return;
        }
        if self.upsert_with_retry(&records) {
            report.upserted_batches += 1;
            report.upserted_records += records.len();
        } else {
            report.failed_batches += 1;
        }
    }

    /// Embeds in embedder-sized slices; a failed slice is retried record by
    /// record so one bad input does not drop its neighbours.
    fn embed(&self, batch: Vec<SourceDocument>) -> Vec<IndexedRecord> {
        let slice_len = self.embedder.batch_size().max(1);
        let mut records = Vec::with_capacity(batch.len());
        let mut pending = batch.into_iter().peekable();
        while pending.peek().is_some() {
            let slice: Vec<SourceDocument> = pending.by_ref().take(slice_len).collect();
            let inputs: Vec<&str> = slice.iter().map(|doc| doc.text.as_str()).collect();
            match self.embedder.embed_batch(&inputs) {
                Ok(vectors) if vectors.len() == slice.len() => {
                    records.extend(slice.into_iter().zip(vectors).map(into_record));
                }
                Ok(vectors) => {
                    warn!(
                        expected = slice.len(),
                        returned = vectors.len(),
                        "embedding count mismatch; embedding records one by one"
                    );
                    records.extend(self.embed_individually(slice));
                }
                Err(err) => {
                    debug!(kind = err.kind(), error = %err, "batch embedding failed; embedding records one by one");
                    records.extend(self.embed_individually(slice));
                }
            }
        }
        records
    }

    fn embed_individually(&self, slice: Vec<SourceDocument>) -> Vec<IndexedRecord> {
        slice
            .into_iter()
            .filter_map(|doc| match self.embedder.embed(&doc.text) {
                Ok(vector) => Some(into_record((doc, vector))),
                Err(err) => {
                    warn!(
                        record = %doc.id,
                        input_id = %fingerprint(&doc.text),
                        error = %err,
                        "skipping record"
                    );
                    None
                }
            })
            .collect()
    }

    fn upsert_with_retry(&self, records: &[IndexedRecord]) -> bool {
        let attempts = self.config.upsert_attempts.max(1);
        for attempt in 1..=attempts {
            match self.index.upsert(records, &self.config.namespace) {
                Ok(()) => {
                    debug!(namespace = %self.config.namespace, batch = records.len(), "upserted batch");
                    return true;
                }
                Err(err) if attempt < attempts => {
                    warn!(attempt, error = %err, "upsert failed; retrying");
                    thread::sleep(self.config.backoff(attempt));
                }
                Err(err) => {
                    warn!(
                        namespace = %self.config.namespace,
                        batch = records.len(),
                        first_id = records.first().map(|r| r.id.as_str()).unwrap_or_default(),
                        error = %err,
                        "skipping batch after {attempts} attempts"
                    );
                }
            }
        }
        false
    }
}

fn into_record((doc, values): (SourceDocument, Vec<f32>)) -> IndexedRecord {
    IndexedRecord {
        id: doc.id,
        values,
        metadata: doc.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, Result as PipelineResult};
    use crate::index::MemoryIndex;
    use crate::records::{EmbeddingVector, QueryMatch, RecordMetadata};
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails any batch containing a text that starts with `bad`.
    struct PickyEmbedder {
        batch_calls: AtomicUsize,
    }

    impl Embedder for PickyEmbedder {
        fn model(&self) -> &str {
            "picky"
        }

        fn batch_size(&self) -> usize {
            4
        }

        fn embed_batch(&self, inputs: &[&str]) -> PipelineResult<Vec<EmbeddingVector>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if inputs.iter().any(|text| text.starts_with("bad")) {
                return Err(PipelineError::embedding("x", anyhow!("422 unprocessable")));
            }
            Ok(inputs.iter().map(|text| vec![text.len() as f32, 1.0]).collect())
        }
    }

    /// Fails the first `failures` upserts, then delegates to a memory index.
    struct FlakyIndex {
        failures: AtomicUsize,
        inner: MemoryIndex,
        attempts: Mutex<usize>,
    }

    impl FlakyIndex {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                inner: MemoryIndex::new(),
                attempts: Mutex::new(0),
            }
        }
    }

    impl VectorIndex for FlakyIndex {
        fn upsert(&self, records: &[IndexedRecord], namespace: &str) -> PipelineResult<()> {
            *self.attempts.lock().unwrap() += 1;
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(PipelineError::index_write(namespace, records.len(), anyhow!("503")));
            }
            self.inner.upsert(records, namespace)
        }

        fn query(&self, vector: &[f32], top_k: usize, namespace: &str) -> PipelineResult<Vec<QueryMatch>> {
            self.inner.query(vector, top_k, namespace)
        }
    }

    fn doc(id: &str, text: &str) -> Result<SourceDocument> {
        Ok(SourceDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata: RecordMetadata::new(format!("title {id}"), text, "pubmed"),
        })
    }

    fn config(batch_size: usize, upsert_attempts: usize) -> IngestConfig {
        IngestConfig {
            batch_size,
            upsert_attempts,
            retry_base: Duration::ZERO,
            ..IngestConfig::new("pubmed-data")
        }
    }

    fn picky() -> PickyEmbedder {
        PickyEmbedder {
            batch_calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn writes_every_record_in_batches() {
        let embedder = picky();
        let index = MemoryIndex::new();
        let docs: Vec<_> = (0..5).map(|i| doc(&i.to_string(), "fever study")).collect();
        let mut progress = Vec::new();

        let report = Ingestor::new(&embedder, &index, config(2, 1))
            .run(docs, |r| progress.push(r.upserted_records));

        assert_eq!(
            report,
            IngestReport {
                seen: 5,
                embedded: 5,
                skipped_records: 0,
                upserted_records: 5,
                upserted_batches: 3,
                failed_batches: 0,
            }
        );
        assert_eq!(progress, vec![2, 4, 5]);
        assert_eq!(index.len("pubmed-data"), 5);
    }

    #[test]
    fn failing_record_is_skipped_and_neighbours_survive() {
        let embedder = picky();
        let index = MemoryIndex::new();
        let docs = vec![doc("1", "cough trial"), doc("2", "bad input"), doc("3", "rash cohort")];

        let report = Ingestor::new(&embedder, &index, config(50, 1)).run(docs, |_| {});

        assert_eq!(report.embedded, 2);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.upserted_batches, 1);
        assert!(index.get("2", "pubmed-data").is_none());
        assert!(index.get("3", "pubmed-data").is_some());
        // one failed batch call, then three single-record calls
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn unreadable_source_rows_are_counted_as_skipped() {
        let embedder = picky();
        let index = MemoryIndex::new();
        let docs = vec![doc("1", "fever"), Err(anyhow!("invalid row at line 2"))];

        let report = Ingestor::new(&embedder, &index, config(50, 1)).run(docs, |_| {});

        assert_eq!(report.seen, 2);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.upserted_records, 1);
    }

    #[test]
    fn skipped_source_page_counts_every_lost_row() {
        let embedder = picky();
        let index = MemoryIndex::new();
        let docs = vec![
            Err(anyhow!("503 Service Unavailable").context(SkippedRows { offset: 0, rows: 4 })),
            doc("5", "fever"),
        ];

        let report = Ingestor::new(&embedder, &index, config(50, 1)).run(docs, |_| {});

        assert_eq!(report.seen, 5);
        assert_eq!(report.skipped_records, 4);
        assert_eq!(report.upserted_records, 1);
    }

    #[test]
    fn upsert_is_retried_then_succeeds() {
        let embedder = picky();
        let index = FlakyIndex::new(2);

        let report = Ingestor::new(&embedder, &index, config(50, 3)).run(vec![doc("1", "pain")], |_| {});

        assert_eq!(report.upserted_batches, 1);
        assert_eq!(*index.attempts.lock().unwrap(), 3);
        assert_eq!(index.inner.len("pubmed-data"), 1);
    }

    #[test]
    fn exhausted_batch_is_skipped_and_the_run_continues() {
        let embedder = picky();
        let index = FlakyIndex::new(2);
        let docs = vec![doc("1", "pain"), doc("2", "nausea"), doc("3", "fatigue")];

        let report = Ingestor::new(&embedder, &index, config(2, 2)).run(docs, |_| {});

        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.upserted_batches, 1);
        assert_eq!(report.upserted_records, 1);
        assert!(index.inner.get("3", "pubmed-data").is_some());
        assert!(index.inner.get("1", "pubmed-data").is_none());
    }

    #[test]
    fn report_reads_naturally() {
        let report = IngestReport {
            seen: 3,
            embedded: 2,
            skipped_records: 1,
            upserted_records: 2,
            upserted_batches: 1,
            failed_batches: 0,
        };
        assert_eq!(
            report.to_string(),
            "seen 3, embedded 2, skipped 1, upserted 2 records in 1 batch, failed batches 0"
        );
    }
}
