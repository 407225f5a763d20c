//! Standalone ingestion: builds the vector index from the documents directory.

use std::env;
use std::sync::Arc;

use anyhow::Context;

use ragdesk_backend::core::config::AppPaths;
use ragdesk_backend::core::logging;
use ragdesk_backend::state::AppState;

const USAGE: &str = "Usage: ragdesk-ingest [--skip-existing]

Loads .md and .txt files from the configured documents directory, splits and
embeds them, and writes the vector index.

Options:
  --skip-existing   keep an existing index instead of rebuilding it
  -h, --help        print this help";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut force = true;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--skip-existing" => force = false,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other => anyhow::bail!("unknown argument: {}\n\n{}", other, USAGE),
        }
    }

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths, "ingest.log");

    let state = AppState::initialize(paths).await?;
    let report = state
        .ingestor
        .run(force)
        .await
        .context("Ingestion failed")?;

    if report.skipped {
        tracing::info!(
            "Index already present with {} chunks; nothing to do",
            report.chunks_indexed
        );
    } else {
        tracing::info!(
            "Ingestion complete: {} documents, {} chunks -> {}",
            report.documents_loaded,
            report.chunks_indexed,
            state.ingestor.index_path().display()
        );
    }
    Ok(())
}
