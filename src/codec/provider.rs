//! Cipher provider capability.
//!
//! The codec never calls a primitive library directly; it goes through a
//! [`CipherProvider`] handed to the [`KeyManager`](super::KeyManager) at
//! construction. [`RustCryptoProvider`] is the stock implementation.

use super::error::{CodecError, CodecResult};
use super::key::{KeyMaterial, KeySecret, Salt};
use super::params::{CipherSuite, KEY_LEN, MAX_TAG_LEN};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// XOR mask applied to the salt when deriving the HMAC key.
pub const HMAC_SALT_MASK: u8 = 0x3a;
/// PBKDF2 rounds used to stretch the encryption key into the HMAC key.
pub const HMAC_KEY_ITERATIONS: u32 = 2;

pub trait CipherProvider: Send + Sync {
    fn supports(&self, suite: CipherSuite) -> bool;

    /// Derive the key pair for a file from the caller's secret.
    fn derive_key(
        &self,
        suite: CipherSuite,
        secret: &KeySecret,
        salt: &Salt,
        iterations: u32,
    ) -> CodecResult<KeyMaterial>;

    /// Encrypt `data` in place. Length-preserving.
    fn encrypt(&self, suite: CipherSuite, key: &[u8], iv: &[u8], data: &mut [u8])
        -> CodecResult<()>;

    /// Inverse of [`encrypt`](Self::encrypt).
    fn decrypt(&self, suite: CipherSuite, key: &[u8], iv: &[u8], data: &mut [u8])
        -> CodecResult<()>;

    /// MAC the concatenation of `parts` into `out` (`suite.tag_len()` bytes).
    fn authenticate(
        &self,
        suite: CipherSuite,
        key: &[u8],
        parts: &[&[u8]],
        out: &mut [u8],
    ) -> CodecResult<()>;

    /// Recompute the MAC and compare it with `tag` in constant time.
    fn verify(
        &self,
        suite: CipherSuite,
        key: &[u8],
        parts: &[&[u8]],
        tag: &[u8],
    ) -> CodecResult<bool> {
        let len = suite.tag_len();
        if tag.len() != len {
            return Ok(false);
        }
        let mut expected = [0u8; MAX_TAG_LEN];
        self.authenticate(suite, key, parts, &mut expected[..len])?;
        Ok(bool::from(expected[..len].ct_eq(tag)))
    }
}

/// AES-256-CTR with HMAC-SHA256/512 and PBKDF2, on the RustCrypto crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    fn pbkdf2(suite: CipherSuite, password: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) {
        match suite {
            CipherSuite::Aes256CtrHmacSha256 => pbkdf2_hmac::<Sha256>(password, salt, rounds, out),
            CipherSuite::Aes256CtrHmacSha512 => pbkdf2_hmac::<Sha512>(password, salt, rounds, out),
        }
    }

    fn apply_keystream(key: &[u8], iv: &[u8], data: &mut [u8]) -> CodecResult<()> {
        let mut cipher = Aes256Ctr::new_from_slices(key, iv)
            .map_err(|_| CodecError::Provider("invalid AES key or IV length"))?;
        cipher
            .try_apply_keystream(data)
            .map_err(|_| CodecError::Provider("keystream exhausted"))
    }
}

fn finish_mac<M: Mac>(mut mac: M, parts: &[&[u8]], out: &mut [u8]) -> CodecResult<()> {
    for part in parts {
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    if out.len() > tag.len() {
        return Err(CodecError::Provider("requested tag longer than MAC output"));
    }
    out.copy_from_slice(&tag[..out.len()]);
    Ok(())
}

impl CipherProvider for RustCryptoProvider {
    fn supports(&self, _suite: CipherSuite) -> bool {
        true
    }

    fn derive_key(
        &self,
        suite: CipherSuite,
        secret: &KeySecret,
        salt: &Salt,
        iterations: u32,
    ) -> CodecResult<KeyMaterial> {
        if iterations == 0 {
            return Err(CodecError::Provider("iteration count must be positive"));
        }

        let mut enc = Zeroizing::new([0u8; KEY_LEN]);
        match secret {
            KeySecret::Passphrase(passphrase) => {
                Self::pbkdf2(suite, passphrase, salt.as_bytes(), iterations, &mut enc[..])
            }
            KeySecret::Raw(raw) => enc.copy_from_slice(&raw[..]),
        }

        let mut mac_salt = *salt.as_bytes();
        for b in mac_salt.iter_mut() {
            *b ^= HMAC_SALT_MASK;
        }
        let mut mac = Zeroizing::new([0u8; KEY_LEN]);
        Self::pbkdf2(suite, &enc[..], &mac_salt, HMAC_KEY_ITERATIONS, &mut mac[..]);

        Ok(KeyMaterial::new(*enc, *mac))
    }

    fn encrypt(
        &self,
        _suite: CipherSuite,
        key: &[u8],
        iv: &[u8],
        data: &mut [u8],
    ) -> CodecResult<()> {
        Self::apply_keystream(key, iv, data)
    }

    fn decrypt(
        &self,
        _suite: CipherSuite,
        key: &[u8],
        iv: &[u8],
        data: &mut [u8],
    ) -> CodecResult<()> {
        Self::apply_keystream(key, iv, data)
    }

    fn authenticate(
        &self,
        suite: CipherSuite,
        key: &[u8],
        parts: &[&[u8]],
        out: &mut [u8],
    ) -> CodecResult<()> {
        let bad_key = |_| CodecError::Provider("invalid HMAC key length");
        match suite {
            CipherSuite::Aes256CtrHmacSha256 => finish_mac(
                <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(bad_key)?,
                parts,
                out,
            ),
            CipherSuite::Aes256CtrHmacSha512 => finish_mac(
                <Hmac<Sha512> as Mac>::new_from_slice(key).map_err(bad_key)?,
                parts,
                out,
            ),
        }
    }
}
