//! Key inputs and derived key material.
//!
//! - [`Salt`]: the random per-file value stored in place of the magic.
//! - [`KeySecret`]: what the caller hands over, a passphrase or a raw key.
//! - [`KeyMaterial`]: the derived `(encryption key, HMAC key)` pair.
//!
//! Secrets are zeroised on drop and their `Debug` output is redacted.

use super::error::{CodecError, CodecResult};
use super::header::MAGIC;
use super::params::KEY_LEN;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const SALT_LEN: usize = 16;

/// Random value used for key derivation, stored at offset 0 of an
/// encrypted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Salt(bytes)
    }

    /// Draw a fresh salt from the OS RNG. A salt equal to the plaintext
    /// magic would make the file sniff as unencrypted, so it is redrawn.
    pub fn generate() -> CodecResult<Self> {
        let mut bytes = [0u8; SALT_LEN];
        loop {
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|_| CodecError::Provider("system RNG unavailable"))?;
            if &bytes != MAGIC {
                return Ok(Salt(bytes));
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

/// Key input supplied by the caller.
#[derive(Clone)]
pub enum KeySecret {
    /// Stretched with PBKDF2 using the file's iteration count.
    Passphrase(Zeroizing<Vec<u8>>),
    /// Used directly as the encryption key.
    Raw(Zeroizing<[u8; KEY_LEN]>),
}

impl KeySecret {
    pub fn passphrase(passphrase: impl AsRef<[u8]>) -> CodecResult<Self> {
        let bytes = passphrase.as_ref();
        if bytes.is_empty() {
            return Err(CodecError::InvalidKey("key must not be empty"));
        }
        Ok(KeySecret::Passphrase(Zeroizing::new(bytes.to_vec())))
    }

    pub fn raw(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CodecError::InvalidKey("raw keys must be exactly 32 bytes"));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(KeySecret::Raw(key))
    }

    /// Parse the textual form used by key statements and the CLI.
    ///
    /// `x'<64 hex digits>'` is a raw key, anything else a passphrase.
    pub fn parse(text: &str) -> CodecResult<Self> {
        match hex_literal_body(text) {
            Some(body) => {
                let bytes = Zeroizing::new(
                    hex::decode(body).map_err(|_| CodecError::InvalidKey("malformed hex key"))?,
                );
                KeySecret::raw(&bytes)
            }
            None => KeySecret::passphrase(text),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, KeySecret::Raw(_))
    }
}

fn hex_literal_body(text: &str) -> Option<&str> {
    let rest = text
        .strip_prefix("x'")
        .or_else(|| text.strip_prefix("X'"))?;
    rest.strip_suffix('\'')
}

impl fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySecret::Passphrase(_) => f.write_str("KeySecret::Passphrase(<redacted>)"),
            KeySecret::Raw(_) => f.write_str("KeySecret::Raw(<redacted>)"),
        }
    }
}

/// Derived key pair for one open file.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    encryption_key: [u8; KEY_LEN],
    hmac_key: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn new(encryption_key: [u8; KEY_LEN], hmac_key: [u8; KEY_LEN]) -> Self {
        KeyMaterial {
            encryption_key,
            hmac_key,
        }
    }

    pub(crate) fn encryption_key(&self) -> &[u8; KEY_LEN] {
        &self.encryption_key
    }

    pub(crate) fn hmac_key(&self) -> &[u8; KEY_LEN] {
        &self.hmac_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("encryption_key", &"<redacted>")
            .field("hmac_key", &"<redacted>")
            .finish()
    }
}
