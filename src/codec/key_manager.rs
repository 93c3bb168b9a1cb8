//! Key lifecycle for one open file.

use super::error::{CodecError, CodecResult};
use super::header::FileKind;
use super::iv::{IvSource, RandomIv};
use super::key::{KeySecret, Salt};
use super::page_codec::PageCodec;
use super::params::CodecParams;
use super::provider::{CipherProvider, RustCryptoProvider};
use crate::storage::page::PageId;
use log::{debug, warn};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Derives, validates and holds the key material of one file handle.
///
/// The active key lives inside the installed [`PageCodec`]; dropping the codec
/// zeroes it. A failed `set_key` leaves the previous state in place.
pub struct KeyManager {
    provider: Arc<dyn CipherProvider>,
    iv_source: Arc<dyn IvSource>,
    /// Parameters used when the file is still empty.
    defaults: CodecParams,
    active: Option<PageCodec>,
}

impl KeyManager {
    pub fn new(
        provider: Arc<dyn CipherProvider>,
        iv_source: Arc<dyn IvSource>,
        defaults: CodecParams,
    ) -> Self {
        KeyManager {
            provider,
            iv_source,
            defaults,
            active: None,
        }
    }

    /// RustCrypto primitives with random IVs.
    pub fn standard(defaults: CodecParams) -> Self {
        Self::new(Arc::new(RustCryptoProvider), Arc::new(RandomIv), defaults)
    }

    pub fn defaults(&self) -> &CodecParams {
        &self.defaults
    }

    pub fn set_defaults(&mut self, defaults: CodecParams) {
        self.defaults = defaults;
    }

    pub fn is_keyed(&self) -> bool {
        self.active.is_some()
    }

    pub fn codec(&self) -> Option<&PageCodec> {
        self.active.as_ref()
    }

    /// Install a key for `file`.
    ///
    /// - empty file: a fresh salt is drawn and the defaults are pinned;
    /// - encrypted file: the stored salt and parameters are used and
    ///   `page_one` (the raw first page) is decrypted as a probe;
    /// - plaintext file: refused, see [`CodecError::PlaintextDatabase`].
    pub fn set_key(
        &mut self,
        file: &FileKind,
        secret: &KeySecret,
        page_one: Option<&[u8]>,
    ) -> CodecResult<()> {
        let codec = match file {
            FileKind::Empty => self.derive_codec(secret, self.defaults)?,
            FileKind::Plaintext(_) => return Err(CodecError::PlaintextDatabase),
            FileKind::Encrypted { salt, params } => {
                let codec = self.build(secret, salt.clone(), *params)?;
                let raw = page_one.ok_or(CodecError::BufferSize {
                    expected: params.page_size,
                    actual: 0,
                })?;
                let mut probe = Zeroizing::new(raw.to_vec());
                match codec.decrypt(PageId::FIRST, &mut probe) {
                    Ok(()) => {}
                    Err(CodecError::IntegrityError) => {
                        warn!("key rejected: page 1 failed authentication");
                        return Err(CodecError::WrongKey);
                    }
                    Err(e) => return Err(e),
                }
                codec
            }
        };
        debug!(
            "key installed ({}, {} KDF iterations)",
            codec.params().suite,
            codec.params().kdf_iterations
        );
        self.active = Some(codec);
        Ok(())
    }

    /// Build the codec a rekey of `file` should switch to: same page layout,
    /// fresh salt, key derived from `secret`.
    pub fn rekey(&self, file: &FileKind, secret: &KeySecret) -> CodecResult<PageCodec> {
        let params = match file {
            FileKind::Empty => self.defaults,
            FileKind::Plaintext(params) | FileKind::Encrypted { params, .. } => *params,
        };
        self.derive_codec(secret, params)
    }

    /// Derive a codec under a freshly generated salt.
    pub fn derive_codec(&self, secret: &KeySecret, params: CodecParams) -> CodecResult<PageCodec> {
        self.build(secret, Salt::generate()?, params)
    }

    fn build(&self, secret: &KeySecret, salt: Salt, params: CodecParams) -> CodecResult<PageCodec> {
        // Reject bad parameters before paying for the KDF.
        params.validate_for_encryption()?;
        let key = self
            .provider
            .derive_key(params.suite, secret, &salt, params.kdf_iterations)?;
        PageCodec::new(
            self.provider.clone(),
            self.iv_source.clone(),
            key,
            salt,
            params,
        )
    }

    /// Make `codec` the active state, returning the previous one.
    pub fn install(&mut self, codec: PageCodec) -> Option<PageCodec> {
        self.active.replace(codec)
    }

    /// Drop the active key. The key material is zeroed as the codec drops.
    pub fn clear_key(&mut self) {
        if self.active.take().is_some() {
            debug!("key cleared");
        }
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("defaults", &self.defaults)
            .field("keyed", &self.is_keyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::header::FileHeader;
    use anyhow::Result;

    fn defaults() -> CodecParams {
        CodecParams {
            kdf_iterations: 1000,
            ..CodecParams::default()
        }
    }

    fn secret(s: &str) -> KeySecret {
        KeySecret::parse(s).unwrap()
    }

    /// An encrypted page 1 and the file kind a sniffer would report for it.
    fn sealed_file(key: &str) -> Result<(FileKind, Vec<u8>)> {
        let mut keys = KeyManager::standard(defaults());
        keys.set_key(&FileKind::Empty, &secret(key), None)?;
        let codec = keys.codec().unwrap();

        let mut page = vec![0x01u8; 4096];
        codec.encrypt(PageId::FIRST, &mut page)?;
        let kind = FileKind::from(FileHeader::parse(&page)?);
        Ok((kind, page))
    }

    #[test]
    fn test_set_key_on_empty_file() -> Result<()> {
        let mut keys = KeyManager::standard(defaults());
        assert!(!keys.is_keyed());
        keys.set_key(&FileKind::Empty, &secret("alpha"), None)?;
        assert!(keys.is_keyed());
        assert_eq!(keys.codec().unwrap().params(), &defaults());
        Ok(())
    }

    #[test]
    fn test_set_key_probe_accepts_right_key() -> Result<()> {
        let (kind, page) = sealed_file("alpha")?;
        let mut keys = KeyManager::standard(defaults());
        keys.set_key(&kind, &secret("alpha"), Some(&page))?;
        assert!(keys.is_keyed());
        Ok(())
    }

    #[test]
    fn test_wrong_key_keeps_previous_state() -> Result<()> {
        let (kind, page) = sealed_file("alpha")?;
        let mut keys = KeyManager::standard(defaults());

        assert_eq!(
            keys.set_key(&kind, &secret("beta"), Some(&page)),
            Err(CodecError::WrongKey)
        );
        assert!(!keys.is_keyed());

        keys.set_key(&kind, &secret("alpha"), Some(&page))?;
        let salt = keys.codec().unwrap().salt().clone();
        assert_eq!(
            keys.set_key(&kind, &secret("beta"), Some(&page)),
            Err(CodecError::WrongKey)
        );
        assert_eq!(keys.codec().unwrap().salt(), &salt);
        Ok(())
    }

    #[test]
    fn test_plaintext_file_refuses_set_key() {
        let mut keys = KeyManager::standard(defaults());
        assert_eq!(
            keys.set_key(&FileKind::Plaintext(defaults()), &secret("alpha"), None),
            Err(CodecError::PlaintextDatabase)
        );
    }

    #[test]
    fn test_bad_defaults_rejected_before_kdf() {
        let mut keys = KeyManager::standard(CodecParams {
            reserve_bytes: 16,
            ..defaults()
        });
        assert!(matches!(
            keys.set_key(&FileKind::Empty, &secret("alpha"), None),
            Err(CodecError::UnsupportedParameters { .. })
        ));
    }

    #[test]
    fn test_rekey_draws_fresh_salt() -> Result<()> {
        let (kind, page) = sealed_file("alpha")?;
        let mut keys = KeyManager::standard(defaults());
        keys.set_key(&kind, &secret("alpha"), Some(&page))?;

        let next = keys.rekey(&kind, &secret("beta"))?;
        assert_ne!(next.salt(), keys.codec().unwrap().salt());
        assert_eq!(next.params(), keys.codec().unwrap().params());

        let old = keys.install(next);
        assert!(old.is_some());
        Ok(())
    }

    #[test]
    fn test_clear_key() -> Result<()> {
        let mut keys = KeyManager::standard(defaults());
        keys.set_key(&FileKind::Empty, &secret("alpha"), None)?;
        keys.clear_key();
        assert!(!keys.is_keyed());
        assert!(keys.codec().is_none());
        Ok(())
    }
}
