//! The `Broker` trait: a durable single-queue message broker with explicit
//! acknowledgement.
//!
//! Deliveries are not settled at hand-off. The consumer settles each one
//! exactly once with [`Broker::ack`], [`Broker::requeue`] or
//! [`Broker::dead_letter`]; anything left unsettled is redelivered the next
//! time the queue is consumed.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Broker-assigned identifier of a single delivery.
pub type DeliveryTag = i64;

/// One message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
  pub tag:          DeliveryTag,
  pub content_type: String,
  pub payload:      Bytes,
  /// Number of earlier deliveries of this message that were requeued.
  pub attempt:      u32,
}

/// A broker-side failure that ended a [`DeliveryStream`].
pub type StreamError = Box<dyn std::error::Error + Send + Sync>;

/// A continuous stream of deliveries from one queue.
///
/// Dropping the stream stops delivery; messages already handed out but not
/// settled remain in-flight until the queue is consumed again. If the broker
/// fails mid-stream, the failure is yielded as the last item before `None`,
/// so it is never mistaken for an orderly close.
pub struct DeliveryStream {
  rx: mpsc::Receiver<Result<Delivery, StreamError>>,
}

impl DeliveryStream {
  pub fn new(rx: mpsc::Receiver<Result<Delivery, StreamError>>) -> Self { Self { rx } }

  /// Wait for the next delivery. `None` once the broker side has closed.
  pub async fn next(&mut self) -> Option<Result<Delivery, StreamError>> { self.rx.recv().await }

  /// Stop accepting deliveries and return those already handed over but
  /// not yet taken, so the caller can settle them. A pending failure is
  /// logged and dropped.
  pub async fn close(mut self) -> Vec<Delivery> {
    self.rx.close();
    let mut pending = Vec::new();
    while let Some(item) = self.rx.recv().await {
      match item {
        Ok(delivery) => pending.push(delivery),
        Err(e) => tracing::warn!(error = %e, "broker failed while the stream was closing"),
      }
    }
    pending
  }
}

pub trait Broker: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Enqueue `payload` tagged with `content_type`. Resolves once the broker
  /// has durably accepted the message.
  fn publish<'a>(
    &'a self,
    payload: Bytes,
    content_type: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Start consuming the queue.
  fn consume(&self) -> impl Future<Output = Result<DeliveryStream, Self::Error>> + Send + '_;

  /// Settle a delivery as successfully processed.
  fn ack(&self, tag: DeliveryTag) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Return a delivery to the queue for another attempt.
  fn requeue(&self, tag: DeliveryTag) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Park a delivery that can never succeed, recording why.
  fn dead_letter(
    &self,
    tag: DeliveryTag,
    reason: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
