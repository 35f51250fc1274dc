//! Error types for `ferry-core`.

use thiserror::Error;

/// Failures of the field-level [`Encryptor`](crate::cipher::Encryptor).
#[derive(Debug, Error)]
pub enum Error {
  #[error("encryption failed")]
  Encrypt,

  #[error("ciphertext is not valid base64: {0}")]
  Encoding(#[from] base64::DecodeError),

  #[error("ciphertext too short: {len} bytes, need at least {min}")]
  TooShort { len: usize, min: usize },

  /// The authentication tag did not verify (tampered, truncated, or sealed
  /// under a different key).
  #[error("ciphertext failed authentication")]
  Authentication,

  #[error("decrypted plaintext is not valid UTF-8")]
  InvalidUtf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
