//! Corpus sources for ingestion: PubMedQA rows (hub API or JSONL export) and
//! plain-text files split by the chunker.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::chunker::{chunk_text, load_text, ChunkConfig};
use crate::embedder::retry_backoff;
use crate::records::RecordMetadata;

/// Public rows API serving Hugging Face datasets.
pub const DATASETS_SERVER_URL: &str = "https://datasets-server.huggingface.co/rows";
/// Largest page the rows API hands out.
pub const MAX_PAGE_ROWS: usize = 100;
/// Failed pages in a row after which the reader gives up.
pub const MAX_CONSECUTIVE_FAILED_PAGES: usize = 5;

/// One unit of ingestion: the text to embed plus the metadata to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Record id written to the index.
    pub id: String,
    /// Text submitted to the embedder.
    pub text: String,
    /// Metadata stored next to the vector.
    pub metadata: RecordMetadata,
}

/// PubMedQA row as published in the `pqa_*` configurations.
#[derive(Debug, Clone, Deserialize)]
pub struct PubMedQaRow {
    /// PubMed article id.
    pub pubid: u64,
    /// Research question.
    pub question: String,
    /// Abstract passages.
    pub context: PubMedQaContext,
}

/// Abstract passages of a PubMedQA row.
#[derive(Debug, Clone, Deserialize)]
pub struct PubMedQaContext {
    /// Passage texts in abstract order.
    pub contexts: Vec<String>,
}

impl PubMedQaRow {
    /// Embeds `question + context`, stores the question as title and the
    /// truncated context as passage text.
    pub fn into_document(self) -> SourceDocument {
        let context = self.context.contexts.join(" ").trim().to_string();
        let text = format!("{} {}", self.question, context);
        SourceDocument {
            id: self.pubid.to_string(),
            metadata: RecordMetadata::new(self.question, &context, "pubmed"),
            text,
        }
    }
}

/// Streams PubMedQA rows from a JSONL export, one row per line.
pub fn read_pubmed_jsonl(path: &Path) -> Result<impl Iterator<Item = Result<SourceDocument>>> {
    let file = File::open(path).with_context(|| format!("failed to open dataset {:?}", path))?;
    let reader = BufReader::new(file);
    let origin: PathBuf = path.to_path_buf();
    Ok(reader
        .lines()
        .enumerate()
        .filter_map(move |(line_no, line)| {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(anyhow::Error::new(err)
                        .context(format!("failed to read line {} of {:?}", line_no + 1, origin))))
                }
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(
                serde_json::from_str::<PubMedQaRow>(&line)
                    .map(PubMedQaRow::into_document)
                    .with_context(|| format!("invalid PubMedQA row at line {}", line_no + 1)),
            )
        }))
}

/// Splits a text file into overlapping chunks, one document per chunk.
pub fn corpus_documents(path: &Path, config: &ChunkConfig) -> Result<Vec<SourceDocument>> {
    let text = load_text(path)?;
    let label = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("corpus")
        .to_string();
    let source = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("corpus")
        .to_string();
    let chunks = chunk_text(&text, config)?;
    Ok(chunks
        .into_iter()
        .map(|chunk| SourceDocument {
            id: format!("{label}-{}", chunk.ordinal),
            metadata: RecordMetadata::new(
                format!("{label} part {}", chunk.ordinal + 1),
                &chunk.text,
                source.clone(),
            ),
            text: chunk.text,
        })
        .collect())
}

/// Dataset coordinates on the Hugging Face hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubDataset {
    /// Dataset repository, e.g. `pubmed_qa`.
    pub dataset: String,
    /// Configuration, e.g. `pqa_unlabeled`.
    pub config: String,
    /// Split, e.g. `train`.
    pub split: String,
}

impl Default for HubDataset {
    fn default() -> Self {
        Self {
            dataset: "pubmed_qa".to_string(),
            config: "pqa_unlabeled".to_string(),
            split: "train".to_string(),
        }
    }
}

/// Attached to the error for a rows page that was given up on, so callers can
/// account for every row it held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("skipped {rows} rows at offset {offset}")]
pub struct SkippedRows {
    /// First row of the lost page.
    pub offset: usize,
    /// Rows the page was asked for.
    pub rows: usize,
}

/// Paginated reader over the datasets-server rows API.
///
/// A page that still fails after `max_attempts` yields one error carrying
/// [`SkippedRows`], and reading resumes at the next page. The stream ends
/// early only after [`MAX_CONSECUTIVE_FAILED_PAGES`] failures in a row.
pub struct HubRows {
    client: Client,
    base_url: String,
    dataset: HubDataset,
    offset: usize,
    remaining: Option<usize>,
    page_rows: usize,
    max_attempts: usize,
    failed_pages: usize,
    buffer: VecDeque<SourceDocument>,
    done: bool,
}

impl HubRows {
    /// Starts reading at `offset`, stopping after `limit` rows when set.
    pub fn new(
        dataset: HubDataset,
        offset: usize,
        limit: Option<usize>,
        timeout: Duration,
        max_attempts: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build datasets-server HTTP client")?;
        Ok(Self {
            client,
            base_url: DATASETS_SERVER_URL.to_string(),
            dataset,
            offset,
            remaining: limit,
            page_rows: MAX_PAGE_ROWS,
            max_attempts: max_attempts.max(1),
            failed_pages: 0,
            buffer: VecDeque::new(),
            done: false,
        })
    }

    /// Points the reader at another rows endpoint, e.g. a mirror.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Rows requested per page, capped at [`MAX_PAGE_ROWS`].
    pub fn with_page_rows(mut self, page_rows: usize) -> Self {
        self.page_rows = page_rows.clamp(1, MAX_PAGE_ROWS);
        self
    }

    fn skip_page(&mut self, length: usize, err: anyhow::Error) -> anyhow::Error {
        let skipped = SkippedRows {
            offset: self.offset,
            rows: length,
        };
        warn!(offset = skipped.offset, rows = length, "skipping rows page");
        self.offset += length;
        if let Some(left) = self.remaining.as_mut() {
            *left = left.saturating_sub(length);
        }
        self.failed_pages += 1;
        if self.failed_pages >= MAX_CONSECUTIVE_FAILED_PAGES {
            warn!(failed_pages = self.failed_pages, "giving up on datasets-server");
            self.done = true;
        }
        err.context(skipped)
    }

    fn fetch_page(&self, length: usize) -> Result<RowsPage> {
        let mut attempt = 0usize;
        loop {
            let result = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("dataset", self.dataset.dataset.as_str()),
                    ("config", self.dataset.config.as_str()),
                    ("split", self.dataset.split.as_str()),
                ])
                .query(&[("offset", self.offset), ("length", length)])
                .send()
                .context("failed to call datasets-server")
                .and_then(|resp| {
                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp
                            .text()
                            .unwrap_or_else(|_| "<body unavailable>".to_string());
                        anyhow::bail!("datasets-server returned {}: {}", status, body);
                    }
                    resp.json::<RowsPage>()
                        .context("failed to parse datasets-server rows page")
                });
            match result {
                Ok(page) => return Ok(page),
                Err(err) if attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    warn!(offset = self.offset, attempt, error = %format!("{err:#}"), "retrying rows page");
                    thread::sleep(retry_backoff(attempt));
                }
                Err(err) => {
                    return Err(err.context(format!("rows page at offset {}", self.offset)))
                }
            }
        }
    }
}

impl Iterator for HubRows {
    type Item = Result<SourceDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(doc) = self.buffer.pop_front() {
            return Some(Ok(doc));
        }
        if self.done {
            return None;
        }
        let length = match self.remaining {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(left) => left.min(self.page_rows),
            None => self.page_rows,
        };
        let page = match self.fetch_page(length) {
            Ok(page) => page,
            Err(err) => return Some(Err(self.skip_page(length, err))),
        };
        self.failed_pages = 0;
        let fetched = page.rows.len();
        debug!(offset = self.offset, fetched, "fetched rows page");
        self.offset += fetched;
        if let Some(left) = self.remaining.as_mut() {
            *left = left.saturating_sub(fetched);
        }
        if fetched < length {
            self.done = true;
        }
        self.buffer
            .extend(page.rows.into_iter().map(|entry| entry.row.into_document()));
        self.buffer.pop_front().map(Ok)
    }
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: PubMedQaRow,
}
