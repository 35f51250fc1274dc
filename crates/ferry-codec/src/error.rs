//! Error types for the ferry-codec crate.

use thiserror::Error;

/// Why a single input row was rejected. Rows failing with this error are
/// skipped by the producer; ingestion continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
  #[error("expected {expected} fields, found {found}")]
  FieldCount { expected: usize, found: usize },

  #[error("unterminated quoted field")]
  UnterminatedQuote,

  #[error("invalid integer in {column}: {value:?}")]
  InvalidInteger { column: &'static str, value: String },

  #[error("timestamp out of range in {column}: {value}")]
  TimestampOutOfRange { column: &'static str, value: i64 },

  #[error("{column} is required")]
  MissingRequired { column: &'static str },
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("row error: {0}")]
  Row(#[from] RowError),

  #[error("wire encode error: {0}")]
  Encode(#[from] bincode::error::EncodeError),

  #[error("wire decode error: {0}")]
  Decode(#[from] bincode::error::DecodeError),

  #[error("{0} trailing bytes after wire record")]
  TrailingBytes(usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
