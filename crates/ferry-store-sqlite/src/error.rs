//! Error type for `ferry-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("stored timestamp {0} ms is out of range")]
  TimestampOutOfRange(i64),

  /// Tried to settle a delivery that is not currently in flight.
  #[error("no in-flight delivery with tag {0}")]
  UnknownDelivery(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
