//! Binary wire form of a [`Record`], used only between producer and consumer
//! and as the cache value format. Not a public contract.

use bytes::Bytes;
use ferry_core::record::Record;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Content-type tag attached to every published wire message.
pub const CONTENT_TYPE: &str = "application/x-ferry-record+bincode";

fn config() -> bincode::config::Configuration { bincode::config::standard() }

pub fn encode<E: Serialize>(record: &Record<E>) -> Result<Bytes> {
  Ok(bincode::serde::encode_to_vec(record, config())?.into())
}

/// Decode exactly one record from `bytes`.
pub fn decode<E: DeserializeOwned>(bytes: &[u8]) -> Result<Record<E>> {
  let (record, read) = bincode::serde::decode_from_slice(bytes, config())?;
  if read != bytes.len() {
    return Err(Error::TrailingBytes(bytes.len() - read));
  }
  Ok(record)
}
