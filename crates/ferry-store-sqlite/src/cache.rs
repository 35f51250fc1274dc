//! [`SqliteCache`], a [`RecordCache`] kept in a SQLite file so the consumer
//! that fills it and the readers that use it can be separate processes.

use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use ferry_core::cache::RecordCache;
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result,
  encode::encode_dt,
  schema::{CACHE_SCHEMA, with_pragmas},
};

/// Every this many writes, expired rows are deleted.
const SWEEP_EVERY: u64 = 256;

/// Clones share one background connection.
#[derive(Clone)]
pub struct SqliteCache {
  conn:   tokio_rusqlite::Connection,
  writes: Arc<AtomicU64>,
}

fn now_millis() -> i64 { encode_dt(Utc::now()) }

impl SqliteCache {
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open a private in-memory cache.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let ddl = with_pragmas(CACHE_SCHEMA);
    conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, writes: Arc::new(AtomicU64::new(0)) })
  }

  /// Delete expired entries, returning how many were removed.
  pub async fn sweep(&self) -> Result<usize> {
    let now = now_millis();
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM cache WHERE expires_at <= ?1", rusqlite::params![now])?)
      })
      .await?;
    Ok(removed)
  }

  /// Number of stored rows, expired or not.
  pub async fn count(&self) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM cache", [], |r| r.get(0))?))
      .await?;
    Ok(n as u64)
  }
}

impl RecordCache for SqliteCache {
  type Error = Error;

  async fn get(&self, key: &str) -> Result<Option<Bytes>> {
    let key = key.to_owned();
    let now = now_millis();
    let value: Option<Vec<u8>> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT value FROM cache WHERE key = ?1 AND expires_at > ?2",
              rusqlite::params![key, now],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(value.map(Bytes::from))
  }

  async fn set(&self, key: String, value: Bytes, ttl: Duration) -> Result<()> {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = now_millis().saturating_add(ttl_ms);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cache (key, value, expires_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
          rusqlite::params![key, &value[..], expires_at],
        )?;
        Ok(())
      })
      .await?;

    if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
      let removed = self.sweep().await?;
      tracing::debug!(removed, "swept expired cache entries");
    }
    Ok(())
  }
}
