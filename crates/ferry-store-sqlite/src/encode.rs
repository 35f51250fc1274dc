//! Encoding and decoding helpers between domain types and the values stored
//! in SQLite columns.
//!
//! All timestamps are stored as INTEGER epoch milliseconds, the same unit the
//! input file uses, so every representable instant round-trips.

use chrono::{DateTime, Utc};
use ferry_core::record::{Record, SealedEmail, SealedRecord};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_dt(millis: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(millis).ok_or(Error::TimestampOutOfRange(millis))
}

// ─── LIKE patterns ───────────────────────────────────────────────────────────

/// Turn a user-supplied prefix into a `LIKE … ESCAPE '\'` pattern, so `%`
/// and `_` in the input match literally.
pub fn like_prefix(prefix: &str) -> String {
  let mut pattern = String::with_capacity(prefix.len() + 1);
  for c in prefix.chars() {
    if matches!(c, '\\' | '%' | '_') {
      pattern.push('\\');
    }
    pattern.push(c);
  }
  pattern.push('%');
  pattern
}

/// Case-fold a name for prefix matching. SQLite's own `LIKE` folds ASCII
/// only, so both the stored column and the query prefix go through this.
pub fn fold(name: &str) -> String { name.to_lowercase() }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawRecord::from_row`].
pub const USER_COLUMNS: &str =
  "id, first_name, last_name, email, created_at, deleted_at, merged_at, parent_user_id";

/// Raw values read directly from a `users` row.
pub struct RawRecord {
  pub id:             i64,
  pub first_name:     String,
  pub last_name:      String,
  pub email:          String,
  pub created_at:     i64,
  pub deleted_at:     Option<i64>,
  pub merged_at:      Option<i64>,
  pub parent_user_id: Option<i64>,
}

impl RawRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      first_name:     row.get(1)?,
      last_name:      row.get(2)?,
      email:          row.get(3)?,
      created_at:     row.get(4)?,
      deleted_at:     row.get(5)?,
      merged_at:      row.get(6)?,
      parent_user_id: row.get(7)?,
    })
  }

  pub fn into_record(self) -> Result<SealedRecord> {
    Ok(Record {
      id:             self.id,
      first_name:     self.first_name,
      last_name:      self.last_name,
      email:          SealedEmail::from_ciphertext(self.email),
      created_at:     decode_dt(self.created_at)?,
      deleted_at:     self.deleted_at.map(decode_dt).transpose()?,
      merged_at:      self.merged_at.map(decode_dt).transpose()?,
      parent_user_id: self.parent_user_id,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fold_lowercases_beyond_ascii() {
    assert_eq!(fold("JÜRGEN"), "jürgen");
    assert_eq!(fold("Åsa"), "åsa");
  }

  #[test]
  fn like_prefix_escapes_wildcards() {
    assert_eq!(like_prefix("ja"), "ja%");
    assert_eq!(like_prefix("50%_off\\"), "50\\%\\_off\\\\%");
  }

  #[test]
  fn dt_round_trip_keeps_millis() {
    let dt = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
    assert_eq!(encode_dt(dt), 1_700_000_000_123);
    assert_eq!(decode_dt(encode_dt(dt)).unwrap(), dt);
  }

  #[test]
  fn dt_outside_four_digit_years_round_trips() {
    for millis in [253_402_300_800_000, -62_167_219_200_001, 0] {
      let dt = DateTime::from_timestamp_millis(millis).unwrap();
      assert_eq!(decode_dt(encode_dt(dt)).unwrap(), dt);
    }
  }

  #[test]
  fn unrepresentable_millis_are_rejected() {
    assert!(matches!(decode_dt(i64::MAX), Err(Error::TimestampOutOfRange(i64::MAX))));
  }
}
