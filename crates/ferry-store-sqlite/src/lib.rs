//! SQLite backends for Ferry: the durable record store, a durable message
//! queue, and a record cache that several processes can share.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod broker;
mod cache;
mod encode;
mod schema;
mod store;

pub mod error;

pub use broker::{DeadLetter, QueueDepth, SqliteBroker};
pub use cache::SqliteCache;
pub use error::{Error, Result};
pub use store::SqliteStore;
