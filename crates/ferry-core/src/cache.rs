//! The `RecordCache` trait: a best-effort, TTL-bounded key/value cache that
//! holds wire-encoded [`SealedRecord`](crate::record::SealedRecord)s.

use std::{future::Future, time::Duration};

use bytes::Bytes;

/// TTL applied to every cache write, whether from the consumer pipeline or
/// from a cache-miss repair on read.
pub const CACHE_TTL: Duration = Duration::from_secs(120);

/// Cache key for the record with primary key `id`.
pub fn cache_key(id: i64) -> String { format!("users:{id}") }

pub trait RecordCache: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Look up `key`. Expired entries are reported as `None`.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<Bytes>, Self::Error>> + Send + 'a;

  /// Store `value` under `key` for `ttl`, replacing any previous value.
  fn set(
    &self,
    key: String,
    value: Bytes,
    ttl: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
