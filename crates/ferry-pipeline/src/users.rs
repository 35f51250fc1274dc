//! [`UserAccessor`] is the read/write path over a record store and its cache.
//!
//! Writes go to the store first and to the cache second. Reads are
//! cache-aside: a hit is served from the cache; a miss, an unreadable entry,
//! or a cache outage falls through to the store and repairs the cache.
//! Emails leave this type decrypted and enter it already sealed.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use ferry_codec::wire;
use ferry_core::{
  cache::{CACHE_TTL, RecordCache, cache_key},
  cipher::Encryptor,
  record::{PlainRecord, SealedEmail, SealedRecord},
  store::{Insertion, RecordFilter, RecordStore},
};

use crate::{Error, Result};

pub struct UserAccessor<S, C> {
  store:     Arc<S>,
  cache:     Arc<C>,
  encryptor: Arc<Encryptor>,
  cache_ttl: Duration,
}

impl<S, C> Clone for UserAccessor<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      cache:     self.cache.clone(),
      encryptor: self.encryptor.clone(),
      cache_ttl: self.cache_ttl,
    }
  }
}

impl<S: RecordStore, C: RecordCache> UserAccessor<S, C> {
  pub fn new(store: Arc<S>, cache: Arc<C>, encryptor: Arc<Encryptor>) -> Self {
    Self { store, cache, encryptor, cache_ttl: CACHE_TTL }
  }

  pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
    self.cache_ttl = ttl;
    self
  }

  pub fn encryptor(&self) -> &Encryptor { &self.encryptor }

  pub fn store(&self) -> &S { &self.store }

  pub fn cache(&self) -> &C { &self.cache }

  /// Persist an already-sealed record.
  pub async fn insert(&self, record: SealedRecord) -> Result<Insertion> {
    self.store.insert(record).await.map_err(Error::store)
  }

  /// Write a wire-encoded sealed record to the cache. Failures are logged
  /// and otherwise ignored.
  pub async fn cache_encoded(&self, id: i64, encoded: Bytes) {
    if let Err(e) = self.cache.set(cache_key(id), encoded, self.cache_ttl).await {
      tracing::warn!(id, error = %e, "cache write failed");
    }
  }

  /// Encode and cache `record`. Failures are logged and otherwise ignored.
  pub async fn cache_record(&self, record: &SealedRecord) {
    match wire::encode(record) {
      Ok(encoded) => self.cache_encoded(record.id, encoded).await,
      Err(e) => tracing::warn!(id = record.id, error = %e, "could not encode record for cache"),
    }
  }

  /// All records matching `filter`, emails decrypted, ordered by id.
  pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<PlainRecord>> {
    let sealed = self.store.query(filter).await.map_err(Error::store)?;
    sealed
      .into_iter()
      .map(|record| record.open(&self.encryptor).map_err(Error::from))
      .collect()
  }

  /// Look up one record, preferring the cache.
  ///
  /// Returns `Ok(None)` when the store has no such id.
  pub async fn get_by_id(&self, id: i64) -> Result<Option<PlainRecord>> {
    if let Some(sealed) = self.cached(id).await {
      return Ok(Some(sealed.open(&self.encryptor)?));
    }

    let Some(sealed) = self.store.get(id).await.map_err(Error::store)? else {
      tracing::debug!(id, "record not found");
      return Ok(None);
    };
    self.cache_record(&sealed).await;
    Ok(Some(sealed.open(&self.encryptor)?))
  }

  async fn cached(&self, id: i64) -> Option<SealedRecord> {
    let bytes = match self.cache.get(&cache_key(id)).await {
      Ok(Some(bytes)) => bytes,
      Ok(None) => {
        tracing::debug!(id, "cache miss");
        return None;
      }
      Err(e) => {
        tracing::warn!(id, error = %e, "cache read failed, falling back to store");
        return None;
      }
    };
    match wire::decode::<SealedEmail>(&bytes) {
      Ok(record) => {
        tracing::debug!(id, "cache hit");
        Some(record)
      }
      Err(e) => {
        tracing::warn!(id, error = %e, "discarding unreadable cache entry");
        None
      }
    }
  }
}
