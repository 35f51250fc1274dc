//! `producer`: publish every record of an input file to the queue.
//!
//! ```text
//! producer [--config ferry.toml] [users.csv]
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use ferry_pipeline::Producer;
use ferry_service::{DEFAULT_CONFIG_PATH, ServiceConfig, init_tracing};

#[derive(Parser)]
#[command(author, version, about = "Publish user records from a file to the Ferry queue")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,

  /// Input file: a header row followed by one user per line.
  #[arg(default_value = "users.csv")]
  input: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_tracing();
  let cli = Cli::parse();

  let config = ServiceConfig::load(&cli.config)?;
  let broker = Arc::new(config.open_broker().await?);

  let report = Producer::new(broker)
    .ingest_path(&cli.input)
    .await
    .with_context(|| format!("failed to ingest {}", cli.input.display()))?;

  tracing::info!(
    published = report.published,
    skipped = report.skipped,
    queue = %config.queue,
    "done"
  );
  Ok(())
}
