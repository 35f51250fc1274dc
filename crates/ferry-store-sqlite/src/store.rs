//! [`SqliteStore`], the SQLite implementation of [`RecordStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;

use ferry_core::{
  record::SealedRecord,
  store::{Insertion, PrefixMatch, RecordFilter, RecordStore},
};

use crate::{
  Error, Result,
  encode::{RawRecord, USER_COLUMNS, encode_dt, fold, like_prefix},
  schema::{STORE_SCHEMA, with_pragmas},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A record store backed by a single SQLite file.
///
/// Clones share one background connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a private in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let ddl = with_pragmas(STORE_SCHEMA);
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Number of persisted records.
  pub async fn count(&self) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
      .await?;
    Ok(n as u64)
  }
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  )
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn insert(&self, record: SealedRecord) -> Result<Insertion> {
    let id         = record.id;
    let created_at = encode_dt(record.created_at);
    let deleted_at = record.deleted_at.map(encode_dt);
    let merged_at  = record.merged_at.map(encode_dt);

    let outcome = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO users (
             id, first_name, last_name, email,
             created_at, deleted_at, merged_at, parent_user_id,
             first_name_folded, last_name_folded
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            id,
            record.first_name,
            record.last_name,
            record.email.as_str(),
            created_at,
            deleted_at,
            merged_at,
            record.parent_user_id,
            fold(&record.first_name),
            fold(&record.last_name),
          ],
        );
        match result {
          Ok(_) => Ok(Insertion::Inserted),
          Err(e) if is_primary_key_violation(&e) => Ok(Insertion::AlreadyPresent),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if outcome == Insertion::AlreadyPresent {
      tracing::debug!(id, "record already present");
    }
    Ok(outcome)
  }

  async fn get(&self, id: i64) -> Result<Option<SealedRecord>> {
    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
              rusqlite::params![id],
              RawRecord::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn query(&self, filter: &RecordFilter) -> Result<Vec<SealedRecord>> {
    // Only the column name is interpolated; the user-supplied prefix is
    // always bound as a parameter.
    let (condition, pattern) = match filter.effective() {
      PrefixMatch::All => ("", None),
      PrefixMatch::FirstName(p) => {
        ("WHERE first_name_folded LIKE ?1 ESCAPE '\\'", Some(like_prefix(&fold(p))))
      }
      PrefixMatch::LastName(p) => {
        ("WHERE last_name_folded LIKE ?1 ESCAPE '\\'", Some(like_prefix(&fold(p))))
      }
    };
    let sql = format!("SELECT {USER_COLUMNS} FROM users {condition} ORDER BY id");

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(pattern), RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }
}
