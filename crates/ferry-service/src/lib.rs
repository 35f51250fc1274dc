//! Shared startup code for the `producer` and `consumer` binaries.

use std::{
  fmt,
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use ferry_core::cipher::{EncryptionKey, Encryptor};
use ferry_pipeline::{ConsumerConfig, FailurePolicy};
use ferry_store_sqlite::{SqliteBroker, SqliteCache, SqliteStore};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Prefix of environment variables that override the config file,
/// e.g. `FERRY_ENCRYPTION_KEY`.
pub const ENV_PREFIX: &str = "FERRY";

pub const DEFAULT_CONFIG_PATH: &str = "ferry.toml";

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Deserialize)]
pub struct ServiceConfig {
  #[serde(default = "defaults::store_path")]
  pub store_path:       PathBuf,
  #[serde(default = "defaults::broker_path")]
  pub broker_path:      PathBuf,
  /// Record cache shared by the consumer and readers.
  #[serde(default = "defaults::cache_path")]
  pub cache_path:       PathBuf,
  #[serde(default = "defaults::queue")]
  pub queue:            String,
  /// Secret the record encryption key is derived from. Required.
  #[serde(default)]
  pub encryption_key:   String,
  #[serde(default = "defaults::workers")]
  pub workers:          usize,
  #[serde(default = "defaults::buffer_capacity")]
  pub buffer_capacity:  usize,
  #[serde(default = "defaults::max_attempts")]
  pub max_attempts:     u32,
  /// Stop the consumer on the first failed message instead of
  /// dead-lettering it.
  #[serde(default)]
  pub halt_on_error:    bool,
  #[serde(default = "defaults::poll_interval_ms")]
  pub poll_interval_ms: u64,
}

mod defaults {
  use std::path::PathBuf;

  pub fn store_path() -> PathBuf { PathBuf::from("ferry.db") }
  pub fn broker_path() -> PathBuf { PathBuf::from("ferry-queue.db") }
  pub fn cache_path() -> PathBuf { PathBuf::from("ferry-cache.db") }
  pub fn queue() -> String { "users".to_string() }
  pub fn workers() -> usize { 4 }
  pub fn buffer_capacity() -> usize { 50 }
  pub fn max_attempts() -> u32 { 5 }
  pub fn poll_interval_ms() -> u64 { 100 }
}

impl fmt::Debug for ServiceConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServiceConfig")
      .field("store_path", &self.store_path)
      .field("broker_path", &self.broker_path)
      .field("cache_path", &self.cache_path)
      .field("queue", &self.queue)
      .field("encryption_key", &"<redacted>")
      .field("workers", &self.workers)
      .field("buffer_capacity", &self.buffer_capacity)
      .field("max_attempts", &self.max_attempts)
      .field("halt_on_error", &self.halt_on_error)
      .field("poll_interval_ms", &self.poll_interval_ms)
      .finish()
  }
}

impl ServiceConfig {
  /// Read `path` (if it exists) overlaid with `FERRY_*` environment
  /// variables, then validate.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .build()
      .with_context(|| format!("failed to read config from {}", path.display()))?;

    let config: Self = settings
      .try_deserialize()
      .context("failed to deserialise ServiceConfig")?;
    config.validated()
  }

  fn validated(mut self) -> anyhow::Result<Self> {
    if self.encryption_key.is_empty() {
      anyhow::bail!("encryption_key is not set (use the config file or {ENV_PREFIX}_ENCRYPTION_KEY)");
    }
    if self.queue.is_empty() {
      anyhow::bail!("queue name must not be empty");
    }
    self.store_path = expand_tilde(&self.store_path);
    self.broker_path = expand_tilde(&self.broker_path);
    self.cache_path = expand_tilde(&self.cache_path);
    Ok(self)
  }

  pub fn encryptor(&self) -> Encryptor {
    Encryptor::new(&EncryptionKey::derive(&self.encryption_key))
  }

  pub fn consumer_config(&self) -> ConsumerConfig {
    ConsumerConfig {
      buffer_capacity: self.buffer_capacity,
      workers:         self.workers,
      max_attempts:    self.max_attempts,
      failure_policy:  if self.halt_on_error { FailurePolicy::Halt } else { FailurePolicy::DeadLetter },
    }
  }

  pub async fn open_broker(&self) -> anyhow::Result<SqliteBroker> {
    let broker = SqliteBroker::open(&self.broker_path, self.queue.clone())
      .await
      .with_context(|| format!("failed to open broker at {:?}", self.broker_path))?;
    Ok(broker.with_poll_interval(Duration::from_millis(self.poll_interval_ms)))
  }

  pub async fn open_store(&self) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&self.store_path)
      .await
      .with_context(|| format!("failed to open store at {:?}", self.store_path))
  }

  pub async fn open_cache(&self) -> anyhow::Result<SqliteCache> {
    SqliteCache::open(&self.cache_path)
      .await
      .with_context(|| format!("failed to open cache at {:?}", self.cache_path))
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Logging ─────────────────────────────────────────────────────────────────

/// Log to stderr at `INFO` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();
}
