//! Input-row parsing.
//!
//! The input is comma-separated text: `#`-prefixed lines are comments, the
//! first remaining line is a header fixing the column count, and every other
//! line is one record in [`COLUMNS`] order. Timestamp columns hold epoch
//! milliseconds; [`NULL_SENTINEL`] marks an absent optional value.

use chrono::{DateTime, Utc};
use ferry_core::record::{PlainEmail, PlainRecord, Record};

use crate::RowError;

/// Fixed column order of the input file.
pub const COLUMNS: [&str; 8] = [
  "id",
  "first_name",
  "last_name",
  "email",
  "created_at",
  "deleted_at",
  "merged_at",
  "parent_user_id",
];

/// Literal used in place of null for optional timestamp/reference columns.
pub const NULL_SENTINEL: &str = "-1";

/// `true` for comment lines, which the reader discards.
pub fn is_comment(line: &str) -> bool { line.starts_with('#') }

// ─── Splitting ───────────────────────────────────────────────────────────────

/// Split one line into fields.
///
/// Supports double-quoted fields containing commas and `""` escapes. A quote
/// appearing inside an unquoted field is kept literally. A trailing `\r` is
/// ignored.
pub fn split_row(line: &str) -> Result<Vec<String>, RowError> {
  let line = line.strip_suffix('\r').unwrap_or(line);
  let mut fields = Vec::new();
  let mut field = String::new();
  let mut chars = line.chars().peekable();
  let mut at_field_start = true;
  let mut in_quotes = false;

  while let Some(c) = chars.next() {
    if in_quotes {
      match c {
        '"' if chars.peek() == Some(&'"') => {
          chars.next();
          field.push('"');
        }
        '"' => in_quotes = false,
        _ => field.push(c),
      }
      continue;
    }

    match c {
      ',' => {
        fields.push(std::mem::take(&mut field));
        at_field_start = true;
      }
      '"' if at_field_start => {
        in_quotes = true;
        at_field_start = false;
      }
      _ => {
        field.push(c);
        at_field_start = false;
      }
    }
  }

  if in_quotes {
    return Err(RowError::UnterminatedQuote);
  }
  fields.push(field);
  Ok(fields)
}

// ─── Field conversion ────────────────────────────────────────────────────────

fn parse_int(column: &'static str, raw: &str) -> Result<i64, RowError> {
  raw.trim().parse().map_err(|_| RowError::InvalidInteger {
    column,
    value: raw.to_owned(),
  })
}

fn millis_to_dt(column: &'static str, ms: i64) -> Result<DateTime<Utc>, RowError> {
  DateTime::from_timestamp_millis(ms).ok_or(RowError::TimestampOutOfRange { column, value: ms })
}

fn optional_int(column: &'static str, raw: &str) -> Result<Option<i64>, RowError> {
  if raw.trim() == NULL_SENTINEL {
    return Ok(None);
  }
  parse_int(column, raw).map(Some)
}

fn optional_dt(column: &'static str, raw: &str) -> Result<Option<DateTime<Utc>>, RowError> {
  optional_int(column, raw)?
    .map(|ms| millis_to_dt(column, ms))
    .transpose()
}

fn required_dt(column: &'static str, raw: &str) -> Result<DateTime<Utc>, RowError> {
  optional_dt(column, raw)?.ok_or(RowError::MissingRequired { column })
}

// ─── Row → Record ────────────────────────────────────────────────────────────

/// Build a record from exactly [`COLUMNS`]`.len()` fields.
///
/// No field is read unless the count matches, so a short or long row can
/// never be partially interpreted.
pub fn parse_row<S: AsRef<str>>(fields: &[S]) -> Result<PlainRecord, RowError> {
  let [id, first, last, email, created, deleted, merged, parent] = fields else {
    return Err(RowError::FieldCount {
      expected: COLUMNS.len(),
      found:    fields.len(),
    });
  };

  Ok(Record {
    id:             parse_int("id", id.as_ref())?,
    first_name:     first.as_ref().to_owned(),
    last_name:      last.as_ref().to_owned(),
    email:          PlainEmail::new(email.as_ref()),
    created_at:     required_dt("created_at", created.as_ref())?,
    deleted_at:     optional_dt("deleted_at", deleted.as_ref())?,
    merged_at:      optional_dt("merged_at", merged.as_ref())?,
    parent_user_id: optional_int("parent_user_id", parent.as_ref())?,
  })
}
