//! `lookup`: read persisted records through the shared cache.
//!
//! ```text
//! lookup [--config ferry.toml] --id 42
//! lookup [--config ferry.toml] [--first-name P] [--last-name P]
//! ```
//!
//! With `--id`, one record is fetched, preferring the cache. Otherwise records
//! are listed by case-insensitive name prefix; first name wins if both are
//! given.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use ferry_core::{record::PlainRecord, store::RecordFilter};
use ferry_pipeline::UserAccessor;
use ferry_service::{DEFAULT_CONFIG_PATH, ServiceConfig, init_tracing};

#[derive(Parser)]
#[command(author, version, about = "Look up persisted Ferry records")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,

  /// Fetch the record with this id.
  #[arg(long, conflicts_with_all = ["first_name", "last_name"])]
  id: Option<i64>,

  #[arg(long)]
  first_name: Option<String>,

  #[arg(long)]
  last_name: Option<String>,
}

fn print_record(record: &PlainRecord) {
  let optional = |dt: Option<chrono::DateTime<chrono::Utc>>| {
    dt.map_or_else(|| "-".to_string(), |dt| dt.to_rfc3339())
  };
  println!(
    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
    record.id,
    record.first_name,
    record.last_name,
    record.email.as_str(),
    record.created_at.to_rfc3339(),
    optional(record.deleted_at),
    optional(record.merged_at),
    record.parent_user_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
  );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_tracing();
  let cli = Cli::parse();

  let config = ServiceConfig::load(&cli.config)?;
  let store = Arc::new(config.open_store().await?);
  let cache = Arc::new(config.open_cache().await?);
  let users = UserAccessor::new(store, cache, Arc::new(config.encryptor()));

  if let Some(id) = cli.id {
    match users.get_by_id(id).await? {
      Some(record) => print_record(&record),
      None => anyhow::bail!("no record with id {id}"),
    }
    return Ok(());
  }

  let filter = RecordFilter { first_name_prefix: cli.first_name, last_name_prefix: cli.last_name };
  for record in users.query(&filter).await? {
    print_record(&record);
  }
  Ok(())
}
