//! The Ferry ingestion pipeline.
//!
//! ```text
//! input rows ─▶ Producer ─▶ Broker ─▶ Pipeline ─▶ UserAccessor ─▶ store + cache
//! ```
//!
//! Everything here is written against the [`ferry_core`] backend traits;
//! wire up concrete backends (e.g. `ferry-store-sqlite`) at the edge.

pub mod cache;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod users;

pub use cache::MemoryCache;
pub use consumer::{ConsumerConfig, ConsumerReport, FailurePolicy, Pipeline};
pub use error::{Error, Result};
pub use producer::{IngestReport, Producer};
pub use users::UserAccessor;

#[cfg(test)]
mod tests;
