//! [`SqliteBroker`], a durable single-queue broker stored in SQLite.
//!
//! Messages move through three states:
//!
//! | State       | Meaning |
//! |-------------|---------|
//! | `ready`     | waiting to be delivered |
//! | `delivered` | handed to a consumer, not yet settled |
//! | `dead`      | parked by [`Broker::dead_letter`] |
//!
//! Acknowledged messages are deleted. Starting a new consumer returns every
//! `delivered` message of the queue to `ready`, so work lost in a crash is
//! redelivered. One consumer per queue is assumed.

use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tokio::sync::mpsc;

use ferry_core::broker::{Broker, Delivery, DeliveryStream, DeliveryTag, StreamError};

use crate::{
  Error, Result,
  encode::encode_dt,
  schema::{BROKER_SCHEMA, with_pragmas},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A message parked in the dead-letter state.
#[derive(Debug, Clone)]
pub struct DeadLetter {
  pub tag:          DeliveryTag,
  pub content_type: String,
  pub payload:      Bytes,
  pub attempt:      u32,
  pub reason:       Option<String>,
}

/// Message counts per state for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
  pub ready:     u64,
  pub delivered: u64,
  pub dead:      u64,
}

// ─── Broker ──────────────────────────────────────────────────────────────────

/// Handle to one named queue. Cloning is cheap.
#[derive(Clone)]
pub struct SqliteBroker {
  conn:          tokio_rusqlite::Connection,
  queue:         Arc<str>,
  poll_interval: Duration,
}

impl SqliteBroker {
  /// Open (or create) the broker database at `path` and declare `queue`.
  pub async fn open(path: impl AsRef<Path>, queue: impl Into<String>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::declare(conn, queue.into()).await
  }

  /// Open a private in-memory broker.
  pub async fn open_in_memory(queue: impl Into<String>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::declare(conn, queue.into()).await
  }

  async fn declare(conn: tokio_rusqlite::Connection, queue: String) -> Result<Self> {
    let ddl = with_pragmas(BROKER_SCHEMA);
    conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    tracing::debug!(queue = %queue, "queue declared");
    Ok(Self {
      conn,
      queue: queue.into(),
      poll_interval: DEFAULT_POLL_INTERVAL,
    })
  }

  /// How long an idle consumer waits before checking for new messages.
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn queue(&self) -> &str { &self.queue }

  /// Message counts for this queue.
  pub async fn depth(&self) -> Result<QueueDepth> {
    let queue = self.queue.to_string();
    let counts: Vec<(String, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn
          .prepare("SELECT state, COUNT(*) FROM messages WHERE queue = ?1 GROUP BY state")?;
        let rows = stmt
          .query_map(rusqlite::params![queue], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut depth = QueueDepth::default();
    for (state, n) in counts {
      match state.as_str() {
        "ready" => depth.ready = n as u64,
        "delivered" => depth.delivered = n as u64,
        "dead" => depth.dead = n as u64,
        other => tracing::warn!(state = other, "unknown message state"),
      }
    }
    Ok(depth)
  }

  /// Every dead-lettered message of this queue, oldest first.
  pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
    let queue = self.queue.to_string();
    let rows: Vec<(i64, String, Vec<u8>, u32, Option<String>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT message_id, content_type, payload, attempt, dead_reason
           FROM messages
           WHERE queue = ?1 AND state = 'dead'
           ORDER BY message_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![queue], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(tag, content_type, payload, attempt, reason)| DeadLetter {
          tag,
          content_type,
          payload: payload.into(),
          attempt,
          reason,
        })
        .collect(),
    )
  }

  /// Return every unsettled delivery of this queue to `ready`.
  async fn recover_unsettled(&self) -> Result<usize> {
    let queue = self.queue.to_string();
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE messages SET state = 'ready', delivered_at = NULL
           WHERE queue = ?1 AND state = 'delivered'",
          rusqlite::params![queue],
        )?)
      })
      .await?;
    Ok(n)
  }

  /// Atomically move the oldest ready message to `delivered`.
  async fn claim_next(&self) -> Result<Option<Delivery>> {
    let queue = self.queue.to_string();
    let now = encode_dt(Utc::now());
    let claimed: Option<(i64, String, Vec<u8>, u32)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "UPDATE messages SET state = 'delivered', delivered_at = ?2
               WHERE message_id = (
                 SELECT message_id FROM messages
                 WHERE queue = ?1 AND state = 'ready'
                 ORDER BY message_id
                 LIMIT 1
               )
               RETURNING message_id, content_type, payload, attempt",
              rusqlite::params![queue, now],
              |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(claimed.map(|(tag, content_type, payload, attempt)| Delivery {
      tag,
      content_type,
      payload: payload.into(),
      attempt,
    }))
  }

  /// Feed `tx` until the receiving side is dropped. A message is claimed only
  /// once there is room to hand it over. A claim failure is handed over as
  /// the final item.
  async fn pump(self, tx: mpsc::Sender<Result<Delivery, StreamError>>) {
    loop {
      let Ok(permit) = tx.reserve().await else {
        tracing::debug!(queue = %self.queue, "delivery stream dropped");
        return;
      };
      match self.claim_next().await {
        Ok(Some(delivery)) => permit.send(Ok(delivery)),
        Ok(None) => {
          drop(permit);
          tokio::time::sleep(self.poll_interval).await;
        }
        Err(e) => {
          tracing::error!(queue = %self.queue, error = %e, "claiming message failed; closing delivery stream");
          permit.send(Err(Box::new(e)));
          return;
        }
      }
    }
  }

  /// Run a settlement statement against one in-flight delivery.
  async fn settle(&self, tag: DeliveryTag, sql: &'static str, reason: Option<String>) -> Result<()> {
    let queue = self.queue.to_string();
    let changed = self
      .conn
      .call(move |conn| {
        let changed = match reason {
          Some(reason) => conn.execute(sql, rusqlite::params![tag, queue, reason])?,
          None => conn.execute(sql, rusqlite::params![tag, queue])?,
        };
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      return Err(Error::UnknownDelivery(tag));
    }
    Ok(())
  }
}

// ─── Broker impl ─────────────────────────────────────────────────────────────

impl Broker for SqliteBroker {
  type Error = Error;

  async fn publish(&self, payload: Bytes, content_type: &str) -> Result<()> {
    let queue = self.queue.to_string();
    let content_type = content_type.to_owned();
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO messages (queue, content_type, payload, published_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![queue, content_type, &payload[..], now],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn consume(&self) -> Result<DeliveryStream> {
    let recovered = self.recover_unsettled().await?;
    if recovered > 0 {
      tracing::info!(queue = %self.queue, recovered, "requeued unsettled deliveries");
    }

    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(self.clone().pump(tx));
    Ok(DeliveryStream::new(rx))
  }

  async fn ack(&self, tag: DeliveryTag) -> Result<()> {
    self
      .settle(
        tag,
        "DELETE FROM messages WHERE message_id = ?1 AND queue = ?2 AND state = 'delivered'",
        None,
      )
      .await
  }

  async fn requeue(&self, tag: DeliveryTag) -> Result<()> {
    self
      .settle(
        tag,
        "UPDATE messages SET state = 'ready', delivered_at = NULL, attempt = attempt + 1
         WHERE message_id = ?1 AND queue = ?2 AND state = 'delivered'",
        None,
      )
      .await
  }

  async fn dead_letter(&self, tag: DeliveryTag, reason: String) -> Result<()> {
    self
      .settle(
        tag,
        "UPDATE messages SET state = 'dead', dead_reason = ?3
         WHERE message_id = ?1 AND queue = ?2 AND state = 'delivered'",
        Some(reason),
      )
      .await
  }
}
