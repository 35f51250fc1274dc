//! In-process [`RecordCache`] with per-entry TTL.

use std::{
  collections::HashMap,
  convert::Infallible,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::{Duration, Instant},
};

use bytes::Bytes;
use ferry_core::cache::RecordCache;

/// Once the map holds this many entries, writes sweep out expired ones.
const SWEEP_THRESHOLD: usize = 4096;

struct Entry {
  value:      Bytes,
  expires_at: Instant,
}

/// Shared, cloneable TTL cache. The lock is held only for map operations.
#[derive(Clone, Default)]
pub struct MemoryCache {
  entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
  pub fn new() -> Self { Self::default() }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Number of stored entries, including ones that have expired but not yet
  /// been evicted.
  pub fn len(&self) -> usize { self.entries().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl RecordCache for MemoryCache {
  type Error = Infallible;

  async fn get(&self, key: &str) -> Result<Option<Bytes>, Infallible> {
    let mut entries = self.entries();
    let Some(entry) = entries.get(key) else {
      return Ok(None);
    };
    if entry.expires_at <= Instant::now() {
      entries.remove(key);
      return Ok(None);
    }
    Ok(Some(entry.value.clone()))
  }

  async fn set(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), Infallible> {
    let now = Instant::now();
    let mut entries = self.entries();
    if entries.len() >= SWEEP_THRESHOLD {
      entries.retain(|_, e| e.expires_at > now);
    }
    entries.insert(key, Entry { value, expires_at: now + ttl });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn set_then_get() {
    let cache = MemoryCache::new();
    cache.set("users:1".into(), Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();
    assert_eq!(cache.get("users:1").await.unwrap(), Some(Bytes::from_static(b"v")));
    assert_eq!(cache.get("users:2").await.unwrap(), None);
  }

  #[tokio::test]
  async fn set_replaces_previous_value() {
    let cache = MemoryCache::new();
    cache.set("k".into(), Bytes::from_static(b"old"), Duration::from_secs(60)).await.unwrap();
    cache.set("k".into(), Bytes::from_static(b"new"), Duration::from_secs(60)).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from_static(b"new")));
    assert_eq!(cache.len(), 1);
  }

  #[tokio::test]
  async fn expired_entries_are_evicted_on_read() {
    let cache = MemoryCache::new();
    cache.set("k".into(), Bytes::from_static(b"v"), Duration::ZERO).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), None);
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn clones_share_entries() {
    let cache = MemoryCache::new();
    let other = cache.clone();
    cache.set("k".into(), Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();
    assert!(other.get("k").await.unwrap().is_some());
  }
}
