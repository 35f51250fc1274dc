//! End-to-end tests of producer, consumer pipeline, and user accessor over
//! in-memory SQLite backends.

use std::{future::Future, io, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::DateTime;
use ferry_codec::wire;
use ferry_core::{
  broker::{Broker, Delivery, DeliveryStream, DeliveryTag, StreamError},
  cache::{RecordCache, cache_key},
  cipher::Encryptor,
  record::{PlainEmail, PlainRecord, Record, SealedRecord},
  store::{Insertion, RecordFilter, RecordStore},
};
use ferry_store_sqlite::{SqliteBroker, SqliteStore};
use tokio::sync::{Semaphore, mpsc};

use crate::{
  ConsumerConfig, ConsumerReport, Error, FailurePolicy, IngestReport, MemoryCache, Pipeline,
  Producer, UserAccessor,
};

const HEADER: &str = "id,first_name,last_name,email,created_at,deleted_at,merged_at,parent_user_id";

// ─── Fixtures ────────────────────────────────────────────────────────────────

async fn broker() -> Arc<SqliteBroker> {
  Arc::new(
    SqliteBroker::open_in_memory("users")
      .await
      .expect("in-memory broker")
      .with_poll_interval(Duration::from_millis(5)),
  )
}

async fn store() -> Arc<SqliteStore> {
  Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"))
}

fn encryptor() -> Arc<Encryptor> { Arc::new(Encryptor::from_secret("test-secret")) }

fn record(id: i64, first: &str, last: &str) -> PlainRecord {
  Record {
    id,
    first_name: first.into(),
    last_name: last.into(),
    email: PlainEmail::new(format!("{}@example.com", first.to_lowercase())),
    created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
    deleted_at: None,
    merged_at: None,
    parent_user_id: None,
  }
}

async fn publish(broker: &SqliteBroker, record: &PlainRecord) {
  let payload = wire::encode(record).unwrap();
  broker.publish(payload, wire::CONTENT_TYPE).await.unwrap();
}

/// Resolves once nothing is waiting in or held from the queue.
async fn drained(broker: Arc<SqliteBroker>) {
  loop {
    let depth = broker.depth().await.unwrap();
    if depth.ready == 0 && depth.delivered == 0 {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

async fn run<S, C>(
  broker: &Arc<SqliteBroker>,
  users: UserAccessor<S, C>,
  config: ConsumerConfig,
  shutdown: impl Future<Output = ()> + Send,
) -> crate::Result<ConsumerReport>
where
  S: RecordStore + 'static,
  C: RecordCache + 'static,
{
  let pipeline = Pipeline::new(broker.clone(), users, config);
  tokio::time::timeout(Duration::from_secs(10), pipeline.run(shutdown))
    .await
    .expect("pipeline did not stop")
}

/// A cache that is always down.
struct BrokenCache;

impl RecordCache for BrokenCache {
  type Error = io::Error;

  async fn get(&self, _key: &str) -> Result<Option<Bytes>, io::Error> {
    Err(io::Error::other("cache unavailable"))
  }

  async fn set(&self, _key: String, _value: Bytes, _ttl: Duration) -> Result<(), io::Error> {
    Err(io::Error::other("cache unavailable"))
  }
}

/// A store whose writes always fail.
struct BrokenStore;

impl RecordStore for BrokenStore {
  type Error = io::Error;

  async fn insert(&self, _record: SealedRecord) -> Result<Insertion, io::Error> {
    Err(io::Error::other("store unavailable"))
  }

  async fn get(&self, _id: i64) -> Result<Option<SealedRecord>, io::Error> { Ok(None) }

  async fn query(&self, _filter: &RecordFilter) -> Result<Vec<SealedRecord>, io::Error> {
    Ok(Vec::new())
  }
}

/// A store whose writes wait for a permit.
struct GatedStore {
  inner: Arc<SqliteStore>,
  gate:  Arc<Semaphore>,
}

impl RecordStore for GatedStore {
  type Error = ferry_store_sqlite::Error;

  async fn insert(&self, record: SealedRecord) -> Result<Insertion, Self::Error> {
    let _permit = self.gate.acquire().await.unwrap();
    self.inner.insert(record).await
  }

  async fn get(&self, id: i64) -> Result<Option<SealedRecord>, Self::Error> {
    self.inner.get(id).await
  }

  async fn query(&self, filter: &RecordFilter) -> Result<Vec<SealedRecord>, Self::Error> {
    self.inner.query(filter).await
  }
}

/// A broker whose delivery stream reports a lost connection and then ends.
struct DisconnectingBroker;

impl Broker for DisconnectingBroker {
  type Error = io::Error;

  async fn publish(&self, _payload: Bytes, _content_type: &str) -> Result<(), io::Error> {
    Ok(())
  }

  async fn consume(&self) -> Result<DeliveryStream, io::Error> {
    let (tx, rx) = mpsc::channel::<Result<Delivery, StreamError>>(1);
    tx.send(Err(Box::new(io::Error::other("broker connection lost")))).await.unwrap();
    Ok(DeliveryStream::new(rx))
  }

  async fn ack(&self, _tag: DeliveryTag) -> Result<(), io::Error> { Ok(()) }

  async fn requeue(&self, _tag: DeliveryTag) -> Result<(), io::Error> { Ok(()) }

  async fn dead_letter(&self, _tag: DeliveryTag, _reason: String) -> Result<(), io::Error> {
    Ok(())
  }
}

// ─── Producer ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn producer_publishes_rows_and_skips_malformed() {
  let broker = broker().await;
  let input = format!(
    "# exported users\n{HEADER}\n\
     42,Jane,Doe,jane@x.com,1700000000000,-1,-1,-1\n\
     43,Short,Row\n\
     \n\
     # trailing comment\n\
     44,\"Smith, Jr.\",Ann,ann@x.com,1700000000000,-1,-1,42\n\
     45,Bad,Stamp,b@x.com,yesterday,-1,-1,-1\n"
  );

  let report = Producer::new(broker.clone()).ingest(input.as_bytes()).await.unwrap();

  assert_eq!(report, IngestReport { published: 2, skipped: 2 });
  assert_eq!(broker.depth().await.unwrap().ready, 2);
}

#[tokio::test]
async fn producer_handles_crlf_input() {
  let broker = broker().await;
  let input = format!("{HEADER}\r\n1,A,B,a@b.c,0,-1,-1,-1\r\n");

  let report = Producer::new(broker.clone()).ingest(input.as_bytes()).await.unwrap();
  assert_eq!(report.published, 1);
}

#[tokio::test]
async fn producer_rejects_empty_input() {
  let broker = broker().await;
  let err = Producer::new(broker.clone())
    .ingest("# nothing here\n\n".as_bytes())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::EmptyInput));
}

#[tokio::test]
async fn producer_rejects_wrong_header() {
  let broker = broker().await;
  let err = Producer::new(broker.clone())
    .ingest("id,first_name\n1,A\n".as_bytes())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidHeader { expected: 8, found: 2 }));
  assert_eq!(broker.depth().await.unwrap().ready, 0);
}

#[tokio::test]
async fn producer_reports_missing_file() {
  let broker = broker().await;
  let err = Producer::new(broker)
    .ingest_path("/nonexistent/ferry/users.csv")
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Io(_)));
}

// ─── Consumer ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn consumer_stores_sealed_records_and_caches_them() {
  let broker = broker().await;
  let store = store().await;
  let cache = Arc::new(MemoryCache::new());
  let enc = encryptor();
  let users = UserAccessor::new(store.clone(), cache.clone(), enc.clone());

  publish(&broker, &record(42, "Jane", "Doe")).await;
  publish(&broker, &record(43, "John", "Roe")).await;

  let report = run(&broker, users, ConsumerConfig::default(), drained(broker.clone()))
    .await
    .unwrap();

  assert_eq!(report.persisted, 2);
  assert_eq!(report.abandoned, 0);
  assert_eq!(store.count().await.unwrap(), 2);

  let stored = store.get(42).await.unwrap().unwrap();
  assert_ne!(stored.email.as_str(), "jane@example.com");
  assert_eq!(stored.open(&enc).unwrap().email.as_str(), "jane@example.com");

  let cached = cache.get(&cache_key(43)).await.unwrap().expect("cache entry");
  let cached = wire::decode::<ferry_core::record::SealedEmail>(&cached).unwrap();
  assert_eq!(cached.open(&enc).unwrap(), record(43, "John", "Roe"));
}

#[tokio::test]
async fn duplicate_messages_are_acknowledged() {
  let broker = broker().await;
  let store = store().await;
  let users = UserAccessor::new(store.clone(), Arc::new(MemoryCache::new()), encryptor());

  publish(&broker, &record(7, "Jane", "Doe")).await;
  publish(&broker, &record(7, "Jane", "Doe")).await;

  let config = ConsumerConfig { workers: 1, ..ConsumerConfig::default() };
  let report = run(&broker, users, config, drained(broker.clone())).await.unwrap();

  assert_eq!(report.persisted, 1);
  assert_eq!(report.duplicates, 1);
  assert_eq!(store.count().await.unwrap(), 1);
  assert_eq!(broker.depth().await.unwrap(), Default::default());
}

#[tokio::test]
async fn wrong_content_type_is_dead_lettered_and_pipeline_continues() {
  let broker = broker().await;
  let store = store().await;
  let users = UserAccessor::new(store.clone(), Arc::new(MemoryCache::new()), encryptor());

  broker.publish(Bytes::from_static(b"{}"), "application/json").await.unwrap();
  publish(&broker, &record(1, "Ann", "Lee")).await;

  let report = run(&broker, users, ConsumerConfig::default(), drained(broker.clone()))
    .await
    .unwrap();

  assert_eq!(report.dead_lettered, 1);
  assert_eq!(report.persisted, 1);
  let dead = broker.dead_letters().await.unwrap();
  assert_eq!(dead.len(), 1);
  assert_eq!(dead[0].content_type, "application/json");
  assert!(dead[0].reason.as_deref().unwrap_or_default().contains("content type"));
}

#[tokio::test]
async fn undecodable_payload_is_dead_lettered() {
  let broker = broker().await;
  let store = store().await;
  let users = UserAccessor::new(store.clone(), Arc::new(MemoryCache::new()), encryptor());

  broker.publish(Bytes::from_static(&[0xff, 0xff]), wire::CONTENT_TYPE).await.unwrap();

  let report = run(&broker, users, ConsumerConfig::default(), drained(broker.clone()))
    .await
    .unwrap();

  assert_eq!(report.dead_lettered, 1);
  assert_eq!(report.requeued, 0);
  assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn halt_policy_stops_on_first_failure() {
  let broker = broker().await;
  let store = store().await;
  let users = UserAccessor::new(store.clone(), Arc::new(MemoryCache::new()), encryptor());

  broker.publish(Bytes::from_static(b"hello"), "text/plain").await.unwrap();

  let config = ConsumerConfig { failure_policy: FailurePolicy::Halt, ..ConsumerConfig::default() };
  let err = run(&broker, users, config, std::future::pending()).await.unwrap_err();

  assert!(matches!(err, Error::ContentType { ref found, .. } if found == "text/plain"));
  assert_eq!(store.count().await.unwrap(), 0);

  let depth = broker.depth().await.unwrap();
  assert_eq!(depth.dead, 0);
  assert_eq!(depth.ready + depth.delivered, 1);
}

#[tokio::test]
async fn store_failures_are_retried_then_dead_lettered() {
  let broker = broker().await;
  let users = UserAccessor::new(Arc::new(BrokenStore), Arc::new(MemoryCache::new()), encryptor());

  publish(&broker, &record(9, "Ann", "Lee")).await;

  let config = ConsumerConfig { workers: 1, max_attempts: 3, ..ConsumerConfig::default() };
  let report = run(&broker, users, config, drained(broker.clone())).await.unwrap();

  assert_eq!(report.requeued, 2);
  assert_eq!(report.dead_lettered, 1);
  assert_eq!(report.persisted, 0);

  let dead = broker.dead_letters().await.unwrap();
  assert_eq!(dead[0].attempt, 2);
  assert!(dead[0].reason.as_deref().unwrap_or_default().contains("store unavailable"));
}

#[tokio::test]
async fn cache_outage_does_not_block_persistence() {
  let broker = broker().await;
  let store = store().await;
  let users = UserAccessor::new(store.clone(), Arc::new(BrokenCache), encryptor());

  publish(&broker, &record(5, "Ann", "Lee")).await;

  let report = run(&broker, users, ConsumerConfig::default(), drained(broker.clone()))
    .await
    .unwrap();

  assert_eq!(report.persisted, 1);
  assert!(store.get(5).await.unwrap().is_some());
}

#[tokio::test]
async fn shutdown_requeues_unprocessed_deliveries() {
  let broker = broker().await;
  let inner = store().await;
  let gate = Arc::new(Semaphore::new(0));
  let store = Arc::new(GatedStore { inner: inner.clone(), gate: gate.clone() });
  let users = UserAccessor::new(store, Arc::new(MemoryCache::new()), encryptor());

  for id in 1..=5 {
    publish(&broker, &record(id, "Ann", "Lee")).await;
  }

  // One worker blocked on the gate, two buffered, and more held upstream.
  let watcher = broker.clone();
  let shutdown = async move {
    while watcher.depth().await.unwrap().delivered < 4 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    gate.add_permits(16);
  };

  let config = ConsumerConfig { workers: 1, buffer_capacity: 2, ..ConsumerConfig::default() };
  let report = run(&broker, users, config, shutdown).await.unwrap();

  assert_eq!(report.persisted, 1);
  assert!(report.abandoned >= 3);
  assert_eq!(inner.count().await.unwrap(), 1);

  let depth = broker.depth().await.unwrap();
  assert_eq!(depth.delivered, 0);
  assert_eq!(depth.ready, 4);
}

#[tokio::test]
async fn broker_failure_fails_the_run() {
  let users = UserAccessor::new(store().await, Arc::new(MemoryCache::new()), encryptor());
  let pipeline = Pipeline::new(Arc::new(DisconnectingBroker), users, ConsumerConfig::default());

  let result = tokio::time::timeout(
    Duration::from_secs(10),
    pipeline.run(std::future::pending::<()>()),
  )
  .await
  .expect("pipeline did not stop");

  match result {
    Err(Error::Broker(e)) => assert!(e.to_string().contains("broker connection lost")),
    other => panic!("expected broker error, got {other:?}"),
  }
}

// ─── User accessor ───────────────────────────────────────────────────────────

async fn seeded_accessor() -> UserAccessor<SqliteStore, MemoryCache> {
  let users = UserAccessor::new(store().await, Arc::new(MemoryCache::new()), encryptor());
  for (id, first, last) in [(1, "Alice", "Smith"), (2, "alfred", "Jones"), (3, "Bob", "Allen")] {
    let sealed = record(id, first, last).seal(users.encryptor()).unwrap();
    users.insert(sealed).await.unwrap();
  }
  users
}

#[tokio::test]
async fn get_by_id_repairs_cache_on_miss() {
  let users = seeded_accessor().await;
  assert!(users.cache().is_empty());

  let first = users.get_by_id(1).await.unwrap().unwrap();
  assert_eq!(first, record(1, "Alice", "Smith"));
  assert!(users.cache().get(&cache_key(1)).await.unwrap().is_some());

  let second = users.get_by_id(1).await.unwrap().unwrap();
  assert_eq!(first, second);
}

#[tokio::test]
async fn get_by_id_serves_cache_hit_without_store() {
  let users = UserAccessor::new(Arc::new(BrokenStore), Arc::new(MemoryCache::new()), encryptor());
  let sealed = record(7, "Cara", "Diaz").seal(users.encryptor()).unwrap();
  users.cache_encoded(7, wire::encode(&sealed).unwrap()).await;

  // BrokenStore never finds anything, so a hit must come from the cache.
  assert_eq!(users.get_by_id(7).await.unwrap(), Some(record(7, "Cara", "Diaz")));
  assert_eq!(users.get_by_id(8).await.unwrap(), None);
}

#[tokio::test]
async fn get_by_id_of_unknown_id_is_none() {
  let users = seeded_accessor().await;
  assert_eq!(users.get_by_id(99).await.unwrap(), None);
  assert!(users.cache().is_empty());
}

#[tokio::test]
async fn get_by_id_ignores_corrupt_cache_entry() {
  let users = seeded_accessor().await;
  users
    .cache()
    .set(cache_key(2), Bytes::from_static(b"junk"), Duration::from_secs(60))
    .await
    .unwrap();

  let found = users.get_by_id(2).await.unwrap().unwrap();
  assert_eq!(found.first_name, "alfred");

  let repaired = users.cache().get(&cache_key(2)).await.unwrap().unwrap();
  assert!(wire::decode::<ferry_core::record::SealedEmail>(&repaired).is_ok());
}

#[tokio::test]
async fn get_by_id_survives_cache_outage() {
  let store = store().await;
  let users = UserAccessor::new(store, Arc::new(BrokenCache), encryptor());
  users.insert(record(4, "Dana", "Ng").seal(users.encryptor()).unwrap()).await.unwrap();

  assert_eq!(users.get_by_id(4).await.unwrap(), Some(record(4, "Dana", "Ng")));
}

#[tokio::test]
async fn query_decrypts_matching_records() {
  let users = seeded_accessor().await;

  let all = users.query(&RecordFilter::default()).await.unwrap();
  assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 2, 3]);
  assert_eq!(all[0].email.as_str(), "alice@example.com");

  let al = users.query(&RecordFilter::first_name("AL")).await.unwrap();
  assert_eq!(al.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 2]);

  let by_last = users.query(&RecordFilter::last_name("al")).await.unwrap();
  assert_eq!(by_last.iter().map(|r| r.id).collect::<Vec<_>>(), [3]);
}

#[tokio::test]
async fn query_with_wrong_key_fails() {
  let users = seeded_accessor().await;
  let other = UserAccessor::new(
    Arc::new(users.store().clone()),
    Arc::new(MemoryCache::new()),
    Arc::new(Encryptor::from_secret("other")),
  );
  let err = other.query(&RecordFilter::default()).await.unwrap_err();
  assert!(matches!(err, Error::Crypto(_)));
}
