use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_rag::config::PipelineArgs;
use pulse_rag::server::{self, AppState};
use pulse_rag::logging;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "pulse-server",
    about = "HTTP API answering symptom questions from the PubMedQA index"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "PULSE_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Directory holding index.html and static assets
    #[arg(long, env = "PULSE_FRONTEND_DIR", default_value = "frontend")]
    frontend_dir: PathBuf,

    /// Worker threads for the async runtime (0 = number of cores)
    #[arg(long, env = "PULSE_WORKER_THREADS", default_value_t = 0)]
    worker_threads: usize,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

fn main() -> Result<()> {
    let cli = ServerCli::parse();
    logging::init(cli.verbose)?;

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    if !cli.frontend_dir.join("index.html").is_file() {
        tracing::warn!(dir = ?cli.frontend_dir, "frontend index.html not found; `/` will return 404");
    }

    // Blocking HTTP clients are built and dropped outside the async runtime.
    let pipeline = Arc::new(cli.pipeline.build().context("failed to build pipeline")?);
    info!(
        namespace = pipeline.retriever().namespace(),
        top_k = pipeline.retriever().top_k(),
        "pipeline ready"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if cli.worker_threads > 0 {
        builder.worker_threads(cli.worker_threads);
    }
    let runtime = builder
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let app = server::router(AppState::new(pipeline.clone()), &cli.frontend_dir);
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        println!("pulse-server listening on http://{addr}");
        server::serve(listener, app).await
    })?;
    drop(runtime);
    drop(pipeline);
    Ok(())
}
