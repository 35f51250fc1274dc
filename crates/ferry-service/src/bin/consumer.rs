//! `consumer`: persist queued records until interrupted.
//!
//! ```text
//! consumer [--config ferry.toml]
//! ```
//!
//! Ctrl-C finishes in-flight messages, returns buffered ones to the queue,
//! and exits.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use ferry_pipeline::{Pipeline, UserAccessor};
use ferry_service::{DEFAULT_CONFIG_PATH, ServiceConfig, init_tracing};

#[derive(Parser)]
#[command(author, version, about = "Persist queued Ferry records")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,
}

async fn interrupted() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => tracing::info!("interrupt received, shutting down"),
    Err(e) => {
      tracing::error!(error = %e, "cannot listen for Ctrl-C");
      std::future::pending::<()>().await;
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_tracing();
  let cli = Cli::parse();

  let config = ServiceConfig::load(&cli.config)?;
  let broker = Arc::new(config.open_broker().await?);
  let store = Arc::new(config.open_store().await?);
  let cache = Arc::new(config.open_cache().await?);
  let users = UserAccessor::new(store, cache, Arc::new(config.encryptor()));

  tracing::info!(queue = %config.queue, store = %config.store_path.display(), "consuming");
  let report = Pipeline::new(broker, users, config.consumer_config())
    .run(interrupted())
    .await
    .context("consumer stopped on error")?;

  println!(
    "persisted {} (duplicates {}), dead-lettered {}, requeued {}, abandoned {}",
    report.persisted, report.duplicates, report.dead_lettered, report.requeued, report.abandoned
  );
  Ok(())
}
