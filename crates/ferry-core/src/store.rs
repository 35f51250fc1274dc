//! The `RecordStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `ferry-store-sqlite`).
//! It deals exclusively in [`SealedRecord`]s; decryption for readers happens
//! one layer up, in the pipeline's user accessor.

use std::future::Future;

use crate::record::SealedRecord;

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`RecordStore::query`].
///
/// Both fields are case-insensitive prefixes, compared after Unicode
/// lowercase folding. When both are supplied only `first_name_prefix` is
/// honoured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
  pub first_name_prefix: Option<String>,
  pub last_name_prefix:  Option<String>,
}

/// The single condition a [`RecordFilter`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixMatch<'a> {
  All,
  FirstName(&'a str),
  LastName(&'a str),
}

impl RecordFilter {
  pub fn first_name(prefix: impl Into<String>) -> Self {
    Self { first_name_prefix: Some(prefix.into()), ..Self::default() }
  }

  pub fn last_name(prefix: impl Into<String>) -> Self {
    Self { last_name_prefix: Some(prefix.into()), ..Self::default() }
  }

  /// Apply the precedence rule: first name wins over last name.
  pub fn effective(&self) -> PrefixMatch<'_> {
    match (&self.first_name_prefix, &self.last_name_prefix) {
      (Some(first), _) => PrefixMatch::FirstName(first),
      (None, Some(last)) => PrefixMatch::LastName(last),
      (None, None) => PrefixMatch::All,
    }
  }
}

/// Outcome of [`RecordStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
  Inserted,
  /// A record with the same primary key already existed; nothing was written.
  AlreadyPresent,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the durable record store.
///
/// All methods return `Send` futures so the trait can be used from worker
/// tasks on a multi-threaded runtime.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist `record`. A primary-key collision is not an error: it yields
  /// [`Insertion::AlreadyPresent`] so reprocessing a message is harmless.
  fn insert(
    &self,
    record: SealedRecord,
  ) -> impl Future<Output = Result<Insertion, Self::Error>> + Send + '_;

  /// Fetch one record by primary key. Returns `None` if not found.
  fn get(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<SealedRecord>, Self::Error>> + Send + '_;

  /// List records matching `filter`, ordered by id.
  fn query<'a>(
    &'a self,
    filter: &'a RecordFilter,
  ) -> impl Future<Output = Result<Vec<SealedRecord>, Self::Error>> + Send + 'a;
}
