//! Record codec for Ferry.
//!
//! Converts input-file rows into [`PlainRecord`](ferry_core::record::PlainRecord)s
//! and records to and from the binary wire form exchanged between producer
//! and consumer. Pure synchronous; no I/O.
//!
//! # Quick start
//!
//! ```no_run
//! use ferry_codec::{parse_line, wire};
//!
//! let record = parse_line("42,Jane,Doe,jane@x.com,1700000000000,-1,-1,-1").unwrap();
//! let bytes = wire::encode(&record).unwrap();
//! assert_eq!(wire::decode::<ferry_core::record::PlainEmail>(&bytes).unwrap(), record);
//! ```

pub mod error;
mod row;
pub mod wire;

pub use error::{Error, Result, RowError};
pub use row::{COLUMNS, NULL_SENTINEL, is_comment, parse_row, split_row};

use ferry_core::record::PlainRecord;

/// Split and parse one data line in a single step.
pub fn parse_line(line: &str) -> Result<PlainRecord, RowError> {
  let fields = split_row(line)?;
  parse_row(&fields)
}
