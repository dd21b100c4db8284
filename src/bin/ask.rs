use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_rag::chunker::ChunkConfig;
use pulse_rag::config::PipelineArgs;
use pulse_rag::dataset;
use pulse_rag::ingest::{IngestConfig, Ingestor};
use pulse_rag::{logging, Embedder, MemoryIndex, Outcome, Retriever, VectorIndex, REJECTION_MESSAGE};

#[derive(Parser, Debug)]
#[command(
    name = "pulse-ask",
    about = "Ask one symptom question from the terminal"
)]
struct AskCli {
    /// Symptom description, e.g. "persistent cough and fever"
    query: String,

    /// Answer from a local text corpus (chunked into an in-memory index) instead of Pinecone
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Words per chunk for --corpus
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Words shared by consecutive chunks for --corpus
    #[arg(long, default_value_t = 20)]
    chunk_overlap: usize,

    /// Print the retrieved context and skip generation
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

fn main() -> Result<()> {
    let cli = AskCli::parse();
    logging::init(cli.verbose)?;

    let embedder = cli.pipeline.embedder.build()?;
    let index: Arc<dyn VectorIndex> = match &cli.corpus {
        Some(path) => Arc::new(load_corpus(&cli, path, embedder.as_ref())?),
        None => Arc::new(cli.pipeline.index.connect()?),
    };

    if cli.dry_run {
        return dry_run(&cli, embedder, index);
    }

    let pipeline = cli.pipeline.assemble(embedder, index)?;
    let outcome = pipeline.run(cli.query.trim())?;
    if let Outcome::Answered { contexts, .. } = &outcome {
        println!("(answer grounded on {contexts} reference{})", if *contexts == 1 { "" } else { "s" });
    }
    println!("{}", outcome.message());
    Ok(())
}

fn dry_run(cli: &AskCli, embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Result<()> {
    let query = cli.query.trim();
    let validator = cli.pipeline.validator.build()?;
    if !validator.is_valid(query) {
        println!("{REJECTION_MESSAGE}");
        return Ok(());
    }
    let retriever = Retriever::new(embedder, index, cli.pipeline.index.namespace.clone())
        .with_top_k(cli.pipeline.top_k.max(1));
    let contexts = retriever.retrieve_default(query)?;
    if contexts.is_empty() {
        println!("No matching references.");
        return Ok(());
    }
    for (rank, context) in contexts.iter().enumerate() {
        println!("[{}] {}", rank + 1, context);
        println!();
    }
    Ok(())
}

fn load_corpus(cli: &AskCli, path: &Path, embedder: &dyn Embedder) -> Result<MemoryIndex> {
    let chunking = ChunkConfig::new(cli.chunk_size, cli.chunk_overlap)?;
    let docs = dataset::corpus_documents(path, &chunking)
        .with_context(|| format!("failed to load corpus {:?}", path))?;
    let index = MemoryIndex::new();
    let report = Ingestor::new(
        embedder,
        &index,
        IngestConfig::new(cli.pipeline.index.namespace.clone()),
    )
    .run(docs.into_iter().map(Ok::<_, anyhow::Error>), |_| {});
    anyhow::ensure!(
        report.upserted_records > 0,
        "no chunks from {:?} could be embedded",
        path
    );
    eprintln!("Indexed {} chunks from {:?}.", report.upserted_records, path);
    Ok(index)
}
