//! [`Producer`] reads the input file and publishes one wire message per
//! well-formed row.

use std::{path::Path, sync::Arc};

use ferry_codec::{COLUMNS, RowError, is_comment, parse_row, split_row, wire};
use ferry_core::{broker::Broker, record::PlainRecord};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::{Error, Result};

/// Outcome of one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
  pub published: u64,
  /// Data rows that could not be parsed and were left out.
  pub skipped:   u64,
}

pub struct Producer<B> {
  broker: Arc<B>,
}

fn is_blank(line: &str) -> bool { line.trim().is_empty() }

fn parse_data_row(line: &str, expected: usize) -> Result<PlainRecord, RowError> {
  let fields = split_row(line)?;
  if fields.len() != expected {
    return Err(RowError::FieldCount { expected, found: fields.len() });
  }
  parse_row(&fields)
}

impl<B: Broker> Producer<B> {
  pub fn new(broker: Arc<B>) -> Self { Self { broker } }

  /// Open `path` and [`ingest`](Self::ingest) it.
  pub async fn ingest_path(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
    let path = path.as_ref();
    tracing::info!(path = %path.display(), "reading input");
    let file = tokio::fs::File::open(path).await?;
    self.ingest(BufReader::new(file)).await
  }

  /// Publish every record in `reader`.
  ///
  /// Comment and blank lines are ignored. The first remaining line is the
  /// header and must have one column per record field. Rows that fail to
  /// parse are skipped with a warning; encode and publish failures abort the
  /// run.
  ///
  /// A header with any other column count aborts with
  /// [`Error::InvalidHeader`] before anything is published.
  pub async fn ingest<R: AsyncBufRead + Unpin>(&self, reader: R) -> Result<IngestReport> {
    let mut lines = reader.lines();
    let mut line_no: u64 = 0;

    let header = loop {
      let Some(line) = lines.next_line().await? else {
        return Err(Error::EmptyInput);
      };
      line_no += 1;
      if !is_comment(&line) && !is_blank(&line) {
        break line;
      }
    };
    let expected = split_row(&header).map_err(ferry_codec::Error::from)?.len();
    if expected != COLUMNS.len() {
      return Err(Error::InvalidHeader { expected: COLUMNS.len(), found: expected });
    }

    let mut report = IngestReport::default();
    while let Some(line) = lines.next_line().await? {
      line_no += 1;
      if is_comment(&line) || is_blank(&line) {
        continue;
      }

      let record = match parse_data_row(&line, expected) {
        Ok(record) => record,
        Err(e) => {
          tracing::warn!(line = line_no, error = %e, "skipping malformed row");
          report.skipped += 1;
          continue;
        }
      };

      let payload = wire::encode(&record)?;
      self.broker.publish(payload, wire::CONTENT_TYPE).await.map_err(Error::broker)?;
      tracing::debug!(id = record.id, "published record");
      report.published += 1;
    }

    tracing::info!(
      published = report.published,
      skipped = report.skipped,
      "ingestion complete"
    );
    Ok(report)
  }
}
