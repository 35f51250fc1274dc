//! Error type for `ferry-pipeline`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("input has no header row")]
  EmptyInput,

  #[error("header has {found} columns, expected {expected}")]
  InvalidHeader { expected: usize, found: usize },

  #[error("unexpected content type {found:?}, expected {expected:?}")]
  ContentType { expected: &'static str, found: String },

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("codec error: {0}")]
  Codec(#[from] ferry_codec::Error),

  #[error("crypto error: {0}")]
  Crypto(#[from] ferry_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("broker error: {0}")]
  Broker(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub(crate) fn broker(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Broker(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
