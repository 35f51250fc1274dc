//! Field-level authenticated encryption for personally identifiable data.
//!
//! The key is derived once from a shared secret (SHA-256) and handed to an
//! [`Encryptor`] by value; nothing here reads ambient configuration.
//!
//! Output layout, rendered as standard base64:
//!
//! ```text
//! [ nonce (12) ][ ciphertext (n) ][ tag (16) ]
//! ```

use std::fmt;

use aes_gcm::{
  Aes256Gcm, Key, Nonce,
  aead::{Aead, KeyInit},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

// ─── Key ─────────────────────────────────────────────────────────────────────

/// A 256-bit key derived from the process-wide secret.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
  /// Derive the key as `SHA-256(secret)`.
  pub fn derive(secret: &str) -> Self {
    Self(Sha256::digest(secret.as_bytes()).into())
  }
}

impl fmt::Debug for EncryptionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("EncryptionKey(<redacted>)")
  }
}

// ─── Encryptor ───────────────────────────────────────────────────────────────

/// AES-256-GCM encryptor for single text fields.
///
/// Every call to [`encrypt`](Self::encrypt) draws a fresh random nonce, so
/// the same plaintext never produces the same ciphertext twice.
#[derive(Clone)]
pub struct Encryptor {
  cipher: Aes256Gcm,
}

impl Encryptor {
  pub fn new(key: &EncryptionKey) -> Self {
    Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)) }
  }

  /// Convenience for `Encryptor::new(&EncryptionKey::derive(secret))`.
  pub fn from_secret(secret: &str) -> Self { Self::new(&EncryptionKey::derive(secret)) }

  /// Encrypt `plaintext` and render `nonce || ciphertext` as base64.
  pub fn encrypt(&self, plaintext: &str) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = self
      .cipher
      .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
      .map_err(|_| Error::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(B64.encode(out))
  }

  /// Reverse [`encrypt`](Self::encrypt), verifying the authentication tag.
  pub fn decrypt(&self, encoded: &str) -> Result<String> {
    let raw = B64.decode(encoded)?;
    if raw.len() < NONCE_LEN {
      return Err(Error::TooShort { len: raw.len(), min: NONCE_LEN });
    }

    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    let plain = self
      .cipher
      .decrypt(Nonce::from_slice(nonce), sealed)
      .map_err(|_| Error::Authentication)?;

    Ok(String::from_utf8(plain)?)
  }
}

impl fmt::Debug for Encryptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Encryptor").finish_non_exhaustive()
  }
}
