//! The consumer [`Pipeline`], which drains the broker into the store and cache.
//!
//! ```text
//! DeliveryStream ─▶ drain task ─▶ bounded buffer ─▶ N workers ─▶ store, cache, ack
//! ```
//!
//! A delivery is acknowledged only after its record is persisted. Failures
//! are settled per message according to [`FailurePolicy`]. On shutdown,
//! deliveries that were handed over but not processed are requeued.

use std::{
  future::Future,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use ferry_codec::wire;
use ferry_core::{
  broker::{Broker, Delivery, DeliveryStream},
  cache::RecordCache,
  record::PlainRecord,
  store::{Insertion, RecordStore},
};
use tokio::{
  sync::{Mutex, mpsc, watch},
  task::JoinHandle,
};

use crate::{Error, Result, users::UserAccessor};

// ─── Configuration ───────────────────────────────────────────────────────────

/// What to do with a message that could not be persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
  /// Dead-letter undecodable messages, requeue store failures until
  /// `max_attempts` is reached, and keep going.
  #[default]
  DeadLetter,
  /// Requeue the failing message and stop the pipeline with its error.
  Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
  /// Deliveries held between the broker and the workers.
  pub buffer_capacity: usize,
  pub workers:         usize,
  /// Deliveries of one message before a store failure dead-letters it.
  pub max_attempts:    u32,
  pub failure_policy:  FailurePolicy,
}

impl Default for ConsumerConfig {
  fn default() -> Self {
    Self {
      buffer_capacity: 50,
      workers:         4,
      max_attempts:    5,
      failure_policy:  FailurePolicy::default(),
    }
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// Settlement counts for one [`Pipeline::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
  pub persisted:     u64,
  /// Messages whose record was already stored; acknowledged without a write.
  pub duplicates:    u64,
  pub dead_lettered: u64,
  pub requeued:      u64,
  /// Deliveries returned to the queue unprocessed because of shutdown.
  pub abandoned:     u64,
}

#[derive(Default)]
struct Counters {
  persisted:     AtomicU64,
  duplicates:    AtomicU64,
  dead_lettered: AtomicU64,
  requeued:      AtomicU64,
  abandoned:     AtomicU64,
}

impl Counters {
  fn bump(counter: &AtomicU64) { counter.fetch_add(1, Ordering::Relaxed); }

  fn snapshot(&self) -> ConsumerReport {
    ConsumerReport {
      persisted:     self.persisted.load(Ordering::Relaxed),
      duplicates:    self.duplicates.load(Ordering::Relaxed),
      dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
      requeued:      self.requeued.load(Ordering::Relaxed),
      abandoned:     self.abandoned.load(Ordering::Relaxed),
    }
  }
}

// ─── Failure classification ──────────────────────────────────────────────────

enum Failure {
  /// The message itself is bad; retrying cannot help.
  Poison(Error),
  /// A backend failed; the message may succeed on redelivery.
  Transient(Error),
}

impl Failure {
  fn poison(e: impl Into<Error>) -> Self { Self::Poison(e.into()) }

  fn into_error(self) -> Error {
    match self {
      Self::Poison(e) | Self::Transient(e) => e,
    }
  }
}

// ─── Shared worker state ─────────────────────────────────────────────────────

struct Shared<B, S, C> {
  broker:   Arc<B>,
  users:    UserAccessor<S, C>,
  config:   ConsumerConfig,
  counters: Counters,
  stop:     watch::Receiver<bool>,
  fatal:    mpsc::Sender<Error>,
}

impl<B, S, C> Shared<B, S, C>
where
  B: Broker,
  S: RecordStore,
  C: RecordCache,
{
  fn stopping(&self) -> bool { *self.stop.borrow() }

  async fn process(&self, delivery: Delivery) {
    match self.persist(&delivery).await {
      Ok(insertion) => {
        match insertion {
          Insertion::Inserted => Counters::bump(&self.counters.persisted),
          Insertion::AlreadyPresent => Counters::bump(&self.counters.duplicates),
        }
        if let Err(e) = self.broker.ack(delivery.tag).await {
          tracing::error!(tag = delivery.tag, error = %e, "ack failed, message will be redelivered");
        }
      }
      Err(failure) => self.fail(delivery, failure).await,
    }
  }

  async fn persist(&self, delivery: &Delivery) -> Result<Insertion, Failure> {
    let record: PlainRecord = wire::decode(&delivery.payload).map_err(Failure::poison)?;
    let id = record.id;
    let sealed = record.seal(self.users.encryptor()).map_err(Failure::poison)?;
    let encoded = wire::encode(&sealed).map_err(Failure::poison)?;

    let insertion = self
      .users
      .insert(sealed)
      .await
      .map_err(Failure::Transient)?;
    tracing::debug!(id, tag = delivery.tag, ?insertion, "stored record");

    self.users.cache_encoded(id, encoded).await;
    Ok(insertion)
  }

  async fn fail(&self, delivery: Delivery, failure: Failure) {
    let tag = delivery.tag;
    let attempt = delivery.attempt;

    if self.config.failure_policy == FailurePolicy::Halt {
      let error = failure.into_error();
      tracing::error!(tag, attempt, error = %error, "halting on failed message");
      self.requeue(tag).await;
      // Only the first error is reported.
      let _ = self.fatal.try_send(error);
      return;
    }

    let exhausted = attempt.saturating_add(1) >= self.config.max_attempts;
    match failure {
      Failure::Transient(error) if !exhausted => {
        tracing::warn!(tag, attempt, error = %error, "requeueing failed message");
        self.requeue(tag).await;
        Counters::bump(&self.counters.requeued);
      }
      failure => {
        let error = failure.into_error();
        tracing::error!(tag, attempt, error = %error, "dead-lettering message");
        match self.broker.dead_letter(tag, error.to_string()).await {
          Ok(()) => Counters::bump(&self.counters.dead_lettered),
          Err(e) => tracing::error!(tag, error = %e, "dead-letter failed"),
        }
      }
    }
  }

  /// Reject a delivery whose content type is not a wire record.
  async fn reject(&self, delivery: Delivery) {
    let error = Error::ContentType {
      expected: wire::CONTENT_TYPE,
      found:    delivery.content_type.clone(),
    };
    self.fail(delivery, Failure::Poison(error)).await;
  }

  /// Return an unprocessed delivery to the queue during shutdown.
  async fn abandon(&self, delivery: Delivery) {
    self.requeue(delivery.tag).await;
    Counters::bump(&self.counters.abandoned);
  }

  async fn requeue(&self, tag: i64) {
    if let Err(e) = self.broker.requeue(tag).await {
      tracing::error!(tag, error = %e, "requeue failed");
    }
  }
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

/// Move deliveries from the broker into the bounded buffer until the stream
/// ends or a stop is signalled. A broker failure is reported as fatal.
async fn drain<B, S, C>(
  shared: Arc<Shared<B, S, C>>,
  mut stream: DeliveryStream,
  buffer: mpsc::Sender<Delivery>,
  mut stop: watch::Receiver<bool>,
) where
  B: Broker,
  S: RecordStore,
  C: RecordCache,
{
  loop {
    let delivery = tokio::select! {
      _ = stop.changed() => break,
      next = stream.next() => match next {
        Some(Ok(delivery)) => delivery,
        Some(Err(e)) => {
          tracing::error!(error = %e, "broker failed, stopping consumer");
          let _ = shared.fatal.try_send(Error::Broker(e));
          break;
        }
        None => {
          tracing::info!("delivery stream closed");
          return;
        }
      },
    };

    if delivery.content_type != wire::CONTENT_TYPE {
      shared.reject(delivery).await;
      continue;
    }

    let permit = tokio::select! {
      _ = stop.changed() => {
        shared.abandon(delivery).await;
        break;
      }
      permit = buffer.reserve() => match permit {
        Ok(permit) => permit,
        Err(_) => {
          shared.abandon(delivery).await;
          break;
        }
      },
    };
    permit.send(delivery);
  }

  for delivery in stream.close().await {
    shared.abandon(delivery).await;
  }
}

async fn work<B, S, C>(shared: Arc<Shared<B, S, C>>, buffer: Arc<Mutex<mpsc::Receiver<Delivery>>>)
where
  B: Broker,
  S: RecordStore,
  C: RecordCache,
{
  loop {
    let next = buffer.lock().await.recv().await;
    let Some(delivery) = next else {
      return;
    };
    if shared.stopping() {
      shared.abandon(delivery).await;
    } else {
      shared.process(delivery).await;
    }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline<B, S, C> {
  broker: Arc<B>,
  users:  UserAccessor<S, C>,
  config: ConsumerConfig,
}

enum Exit {
  Shutdown,
  StreamEnded,
  Failed(Error),
}

impl<B, S, C> Pipeline<B, S, C>
where
  B: Broker + 'static,
  S: RecordStore + 'static,
  C: RecordCache + 'static,
{
  pub fn new(broker: Arc<B>, users: UserAccessor<S, C>, config: ConsumerConfig) -> Self {
    Self { broker, users, config }
  }

  /// Consume until `shutdown` resolves, the broker stream ends, the broker
  /// fails, or (under [`FailurePolicy::Halt`]) a message fails.
  ///
  /// In-flight messages are always finished before returning. A broker
  /// failure, or under `Halt` the first message failure, is returned as the
  /// error.
  pub async fn run<F>(self, shutdown: F) -> Result<ConsumerReport>
  where
    F: Future<Output = ()> + Send,
  {
    let config = self.config;
    let stream = self.broker.consume().await.map_err(Error::broker)?;

    let (buffer_tx, buffer_rx) = mpsc::channel(config.buffer_capacity.max(1));
    let buffer_rx = Arc::new(Mutex::new(buffer_rx));
    let (stop_tx, stop_rx) = watch::channel(false);
    let (fatal_tx, mut fatal_rx) = mpsc::channel(1);

    let shared = Arc::new(Shared {
      broker: self.broker,
      users: self.users,
      config,
      counters: Counters::default(),
      stop: stop_rx.clone(),
      fatal: fatal_tx,
    });

    tracing::info!(
      workers = config.workers,
      buffer = config.buffer_capacity,
      policy = ?config.failure_policy,
      "consumer started"
    );

    let mut drainer = tokio::spawn(drain(shared.clone(), stream, buffer_tx, stop_rx));
    let workers: Vec<JoinHandle<()>> = (0..config.workers.max(1))
      .map(|_| tokio::spawn(work(shared.clone(), buffer_rx.clone())))
      .collect();

    tokio::pin!(shutdown);
    let exit = tokio::select! {
      _ = &mut shutdown => Exit::Shutdown,
      Some(error) = fatal_rx.recv() => Exit::Failed(error),
      joined = &mut drainer => {
        joined?;
        Exit::StreamEnded
      }
    };

    match exit {
      Exit::StreamEnded => {}
      Exit::Shutdown | Exit::Failed(_) => {
        tracing::info!("stopping consumer");
        stop_tx.send_replace(true);
        drainer.await?;
      }
    }
    for worker in workers {
      worker.await?;
    }

    let report = shared.counters.snapshot();
    tracing::info!(
      persisted = report.persisted,
      duplicates = report.duplicates,
      dead_lettered = report.dead_lettered,
      requeued = report.requeued,
      abandoned = report.abandoned,
      "consumer stopped"
    );

    let failure = match exit {
      Exit::Failed(error) => Some(error),
      Exit::Shutdown | Exit::StreamEnded => fatal_rx.try_recv().ok(),
    };
    match failure {
      Some(error) => Err(error),
      None => Ok(report),
    }
  }
}
