//! Tracing subscriber setup shared by the binaries.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const CRATE_TARGETS: &[&str] = &["pulse_rag", "pulse_server", "pulse_ingest", "pulse_ask"];

/// Installs the global fmt subscriber. `RUST_LOG` wins over `verbose` when set.
pub fn init(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let crates = CRATE_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::new(format!("{},{crates}", default_level(level)))
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}

// Dependencies stay at warn unless debugging.
fn default_level(level: Level) -> Level {
    if level == Level::DEBUG {
        Level::INFO
    } else {
        Level::WARN
    }
}
