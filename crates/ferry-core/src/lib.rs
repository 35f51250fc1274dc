//! Core types and trait definitions for the Ferry ingestion pipeline.
//!
//! This crate holds the [`Record`](record::Record) entity, the field-level
//! [`Encryptor`](cipher::Encryptor), and the backend abstractions the
//! pipeline is written against. It contains no database or broker code;
//! concrete backends live in `ferry-store-sqlite` and `ferry-pipeline`.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod broker;
pub mod cache;
pub mod cipher;
pub mod error;
pub mod record;
pub mod store;

pub use error::{Error, Result};
