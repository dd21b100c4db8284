use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pulse_rag::chunker::ChunkConfig;
use pulse_rag::config::{EmbedderArgs, IndexArgs};
use pulse_rag::dataset::{self, HubDataset, HubRows, SourceDocument};
use pulse_rag::index::pinecone::ServerlessSpec;
use pulse_rag::ingest::{IngestConfig, IngestReport, Ingestor, DEFAULT_INGEST_BATCH};
use pulse_rag::{logging, Embedder};
use tracing::info;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SourceKind {
    /// PubMedQA rows from the Hugging Face datasets-server
    Hub,
    /// PubMedQA rows from a local JSONL export
    Jsonl,
    /// Plain-text file split into overlapping chunks
    Text,
}

#[derive(Parser, Debug)]
#[command(
    name = "pulse-ingest",
    about = "Embed a medical corpus and upsert it into the Pinecone index"
)]
struct IngestCli {
    /// Where documents come from
    #[arg(long, env = "PULSE_INGEST_SOURCE", value_enum, default_value = "hub")]
    source: SourceKind,

    /// Input file for the jsonl and text sources
    #[arg(long, env = "PULSE_INGEST_INPUT", required_if_eq_any = [("source", "jsonl"), ("source", "text")])]
    input: Option<PathBuf>,

    /// Hub dataset name
    #[arg(long, env = "PULSE_DATASET", default_value = "pubmed_qa")]
    dataset: String,

    /// Hub dataset configuration
    #[arg(long, env = "PULSE_DATASET_CONFIG", default_value = "pqa_unlabeled")]
    dataset_config: String,

    /// Hub dataset split
    #[arg(long, env = "PULSE_DATASET_SPLIT", default_value = "train")]
    split: String,

    /// Rows to skip before ingesting
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Stop after this many rows
    #[arg(long)]
    limit: Option<usize>,

    /// Words per chunk for the text source
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Words shared by consecutive chunks for the text source
    #[arg(long, default_value_t = 20)]
    chunk_overlap: usize,

    /// Records per upsert request
    #[arg(long, env = "PULSE_INGEST_BATCH", default_value_t = DEFAULT_INGEST_BATCH)]
    batch_size: usize,

    /// Attempts per upsert before a batch is skipped
    #[arg(long, env = "PULSE_UPSERT_ATTEMPTS", default_value_t = 3)]
    upsert_attempts: usize,

    /// Milliseconds to pause between batches
    #[arg(long, env = "PULSE_BATCH_DELAY_MS", default_value_t = 0)]
    batch_delay_ms: u64,

    /// Seconds to wait for a newly created index to become ready
    #[arg(long, default_value_t = 120)]
    ready_timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    index: IndexArgs,
}

fn main() -> Result<()> {
    let cli = IngestCli::parse();
    logging::init(cli.verbose)?;

    let embedder = cli.embedder.build()?;
    let dimension = match cli.embedder.expected_dimensions() {
        Some(dims) => dims,
        None => probe_dimension(embedder.as_ref())?,
    };
    let spec = ServerlessSpec {
        dimension,
        ..ServerlessSpec::default()
    };
    let index = cli
        .index
        .ensure(&spec, Duration::from_secs(cli.ready_timeout_secs.max(1)))?;
    info!(index = index.name(), host = index.host(), dimension, "index ready");

    let config = IngestConfig {
        batch_size: cli.batch_size.max(1),
        upsert_attempts: cli.upsert_attempts.max(1),
        batch_delay: Duration::from_millis(cli.batch_delay_ms),
        ..IngestConfig::new(cli.index.namespace.clone())
    };
    let ingestor = Ingestor::new(embedder.as_ref(), &index, config);
    let started = Instant::now();

    let report = match cli.source {
        SourceKind::Hub => {
            let rows = HubRows::new(
                HubDataset {
                    dataset: cli.dataset.clone(),
                    config: cli.dataset_config.clone(),
                    split: cli.split.clone(),
                },
                cli.offset,
                cli.limit,
                Duration::from_secs(60),
                3,
            )?;
            ingestor.run(rows, render_progress)
        }
        SourceKind::Jsonl => {
            let path = input_path(&cli)?;
            let rows = dataset::read_pubmed_jsonl(path)?
                .skip(cli.offset)
                .take(cli.limit.unwrap_or(usize::MAX));
            ingestor.run(rows, render_progress)
        }
        SourceKind::Text => {
            let path = input_path(&cli)?;
            let chunking = ChunkConfig::new(cli.chunk_size, cli.chunk_overlap)?;
            let docs = dataset::corpus_documents(path, &chunking)?
                .into_iter()
                .skip(cli.offset)
                .take(cli.limit.unwrap_or(usize::MAX))
                .map(Ok::<SourceDocument, anyhow::Error>);
            ingestor.run(docs, render_progress)
        }
    };

    if report.seen > 0 {
        println!();
    }
    println!(
        "Ingested into {}/{} in {:.1}s: {}.",
        index.name(),
        cli.index.namespace,
        started.elapsed().as_secs_f64(),
        report
    );
    Ok(())
}

fn input_path(cli: &IngestCli) -> Result<&PathBuf> {
    cli.input
        .as_ref()
        .context("--input is required for the jsonl and text sources")
}

fn probe_dimension(embedder: &dyn Embedder) -> Result<usize> {
    let vector = embedder
        .embed("fever and cough")
        .context("failed to probe embedding dimension")?;
    Ok(vector.len())
}

fn render_progress(report: &IngestReport) {
    let plural = if report.upserted_records == 1 { "" } else { "s" };
    print!(
        "\rUpserted {} record{} ({} skipped)...",
        report.upserted_records, plural, report.skipped_records
    );
    let _ = io::stdout().flush();
}
