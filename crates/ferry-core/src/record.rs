//! Record: the single entity carried through the pipeline.
//!
//! A record is parameterised over the representation of its `email` field.
//! [`PlainRecord`] is what the producer builds and what readers receive;
//! [`SealedRecord`] is the only form the store and cache ever see. The one
//! encryption pass between the two is [`Record::seal`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, cipher::Encryptor};

// ─── Email representations ───────────────────────────────────────────────────

/// An email address in plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlainEmail(String);

impl PlainEmail {
  pub fn new(address: impl Into<String>) -> Self { Self(address.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

/// An email address as produced by [`Encryptor::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedEmail(String);

impl SealedEmail {
  /// Wrap ciphertext read back from a store. The value is not verified
  /// until [`Record::open`] is called.
  pub fn from_ciphertext(ciphertext: impl Into<String>) -> Self { Self(ciphertext.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A user record. `id` is the primary key and never changes once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<E = PlainEmail> {
  pub id:             i64,
  pub first_name:     String,
  pub last_name:      String,
  pub email:          E,
  pub created_at:     DateTime<Utc>,
  pub deleted_at:     Option<DateTime<Utc>>,
  pub merged_at:      Option<DateTime<Utc>>,
  /// Weak reference to another record's `id`; no ownership, no cascade.
  pub parent_user_id: Option<i64>,
}

pub type PlainRecord = Record<PlainEmail>;
pub type SealedRecord = Record<SealedEmail>;

impl<E> Record<E> {
  fn with_email<F>(self, email: F) -> Record<F> {
    Record {
      id: self.id,
      first_name: self.first_name,
      last_name: self.last_name,
      email,
      created_at: self.created_at,
      deleted_at: self.deleted_at,
      merged_at: self.merged_at,
      parent_user_id: self.parent_user_id,
    }
  }
}

impl Record<PlainEmail> {
  /// Encrypt the email field, consuming the plaintext record.
  pub fn seal(self, encryptor: &Encryptor) -> Result<SealedRecord> {
    let sealed = SealedEmail(encryptor.encrypt(self.email.as_str())?);
    Ok(self.with_email(sealed))
  }
}

impl Record<SealedEmail> {
  /// Decrypt the email field for hand-off to a reader.
  pub fn open(self, encryptor: &Encryptor) -> Result<PlainRecord> {
    let plain = PlainEmail(encryptor.decrypt(self.email.as_str())?);
    Ok(self.with_email(plain))
  }
}
