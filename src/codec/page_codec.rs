//! Per-page encryption and authentication.
//!
//! ```text
//!  ┌──────────────────────────────── page_size ───────────────────────────────┐
//!  │ payload (page_size - reserve_bytes)               │ IV │ tag │ padding   │
//!  └───────────────────────────────────────────────────┴────┴─────┴───────────┘
//! ```
//!
//! The payload is encrypted in place with AES-256-CTR under a fresh IV. The
//! tag covers `IV ‖ ciphertext ‖ be_u32(page) ‖ padding`, and for page 1 also
//! the plaintext file header, so moving a page to another slot, flipping any
//! bit or editing the header is detected on the next read.

use super::error::{CodecError, CodecResult};
use super::header::{FileHeader, FILE_HEADER_SIZE, MAGIC};
use super::iv::IvSource;
use super::key::{KeyMaterial, Salt, SALT_LEN};
use super::params::{CodecParams, IV_LEN};
use super::provider::CipherProvider;
use crate::storage::page::PageId;
use std::fmt;
use std::sync::Arc;

pub struct PageCodec {
    provider: Arc<dyn CipherProvider>,
    iv_source: Arc<dyn IvSource>,
    key: KeyMaterial,
    salt: Salt,
    params: CodecParams,
}

impl PageCodec {
    pub fn new(
        provider: Arc<dyn CipherProvider>,
        iv_source: Arc<dyn IvSource>,
        key: KeyMaterial,
        salt: Salt,
        params: CodecParams,
    ) -> CodecResult<Self> {
        params.validate_for_encryption()?;
        if !provider.supports(params.suite) {
            return Err(CodecError::UnsupportedParameters {
                page_size: params.page_size,
                reserve_bytes: params.reserve_bytes,
                reason: "cipher suite not supported by provider",
            });
        }
        Ok(PageCodec {
            provider,
            iv_source,
            key,
            salt,
            params,
        })
    }

    pub fn params(&self) -> &CodecParams {
        &self.params
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Header this codec stamps on page 1.
    pub fn header(&self) -> FileHeader {
        FileHeader::encrypted(self.salt.clone(), self.params)
    }

    fn check_len(&self, buf: &[u8]) -> CodecResult<()> {
        if buf.len() != self.params.page_size {
            return Err(CodecError::BufferSize {
                expected: self.params.page_size,
                actual: buf.len(),
            });
        }
        Ok(())
    }

    /// Encrypt a full page in place.
    ///
    /// `buf[..payload_bytes]` holds the plaintext payload; the reserve region
    /// is overwritten. For page 1 the file header is written over the first
    /// 32 bytes and left in plaintext.
    pub fn encrypt(&self, page: PageId, buf: &mut [u8]) -> CodecResult<()> {
        self.check_len(buf)?;
        let suite = self.params.suite;

        let (payload, reserve) = buf.split_at_mut(self.params.payload_bytes());
        if page.is_first() {
            self.header().write_to(payload);
        }
        reserve.fill(0);
        let (iv, rest) = reserve.split_at_mut(IV_LEN);
        let (tag, padding) = rest.split_at_mut(suite.tag_len());
        let (header, body) = payload.split_at_mut(body_offset(page));

        self.iv_source.fill_iv(page, iv)?;
        self.provider
            .encrypt(suite, self.key.encryption_key(), iv, body)?;

        let page_no = page.0.to_be_bytes();
        self.provider.authenticate(
            suite,
            self.key.hmac_key(),
            &[&*iv, &*body, &page_no[..], &*padding, &*header],
            tag,
        )
    }

    /// Authenticate and decrypt a full page in place.
    ///
    /// On success the payload is plaintext, page 1 shows the magic at offset
    /// 0 and the reserve region is zeroed. On a tag mismatch the buffer is
    /// left untouched and [`CodecError::IntegrityError`] is returned.
    pub fn decrypt(&self, page: PageId, buf: &mut [u8]) -> CodecResult<()> {
        self.check_len(buf)?;
        let suite = self.params.suite;

        let (payload, reserve) = buf.split_at_mut(self.params.payload_bytes());
        let (iv, rest) = reserve.split_at_mut(IV_LEN);
        let (tag, padding) = rest.split_at_mut(suite.tag_len());
        let (header, body) = payload.split_at_mut(body_offset(page));

        let page_no = page.0.to_be_bytes();
        let authentic = self.provider.verify(
            suite,
            self.key.hmac_key(),
            &[&*iv, &*body, &page_no[..], &*padding, &*header],
            tag,
        )?;
        if !authentic {
            return Err(CodecError::IntegrityError);
        }

        self.provider
            .decrypt(suite, self.key.encryption_key(), iv, body)?;
        if page.is_first() {
            header[..SALT_LEN].copy_from_slice(MAGIC);
        }
        reserve.fill(0);
        Ok(())
    }
}

fn body_offset(page: PageId) -> usize {
    if page.is_first() {
        FILE_HEADER_SIZE
    } else {
        0
    }
}

impl fmt::Debug for PageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCodec")
            .field("params", &self.params)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::iv::{RandomIv, SequentialIv};
    use crate::codec::params::CipherSuite;
    use crate::codec::provider::RustCryptoProvider;
    use anyhow::Result;

    fn params(page_size: usize, suite: CipherSuite) -> CodecParams {
        CodecParams {
            page_size,
            reserve_bytes: suite.min_reserve(),
            kdf_iterations: 1000,
            suite,
        }
    }

    fn codec_with(params: CodecParams, key: [u8; 32]) -> PageCodec {
        PageCodec::new(
            Arc::new(RustCryptoProvider),
            Arc::new(RandomIv),
            KeyMaterial::new(key, [0x77; 32]),
            Salt::from_bytes([0x5c; 16]),
            params,
        )
        .unwrap()
    }

    fn codec(params: CodecParams) -> PageCodec {
        codec_with(params, [0x11; 32])
    }

    fn patterned(params: &CodecParams, seed: u8) -> Vec<u8> {
        let mut page = vec![0u8; params.page_size];
        for (i, b) in page[..params.payload_bytes()].iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(31).wrapping_add(seed);
        }
        page
    }

    #[test]
    fn test_round_trip_all_page_sizes() -> Result<()> {
        for suite in [
            CipherSuite::Aes256CtrHmacSha256,
            CipherSuite::Aes256CtrHmacSha512,
        ] {
            let mut page_size = 1024;
            while page_size <= 65536 {
                let params = params(page_size, suite);
                let codec = codec(params);
                for page in [PageId(1), PageId(2), PageId(u32::MAX)] {
                    let original = patterned(&params, page.0 as u8);
                    let mut buf = original.clone();

                    codec.encrypt(page, &mut buf)?;
                    assert_eq!(buf.len(), page_size);
                    codec.decrypt(page, &mut buf)?;
                    assert_eq!(buf.len(), page_size);

                    let start = if page.is_first() { FILE_HEADER_SIZE } else { 0 };
                    assert_eq!(
                        &buf[start..params.payload_bytes()],
                        &original[start..params.payload_bytes()]
                    );
                    assert!(buf[params.payload_bytes()..].iter().all(|&b| b == 0));
                }
                page_size *= 2;
            }
        }
        Ok(())
    }

    #[test]
    fn test_ciphertext_hides_payload() -> Result<()> {
        let params = params(4096, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);

        let mut buf = vec![0u8; 4096];
        buf[..params.payload_bytes()].fill(0x01);
        codec.encrypt(PageId(2), &mut buf)?;

        let ones = buf[..params.payload_bytes()]
            .iter()
            .filter(|&&b| b == 0x01)
            .count();
        assert!(ones < 100, "payload looks unencrypted: {} bytes of 0x01", ones);
        Ok(())
    }

    #[test]
    fn test_fresh_iv_per_write() -> Result<()> {
        let params = params(1024, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);
        let original = patterned(&params, 3);

        let mut a = original.clone();
        let mut b = original.clone();
        codec.encrypt(PageId(5), &mut a)?;
        codec.encrypt(PageId(5), &mut b)?;
        assert_ne!(a, b);
        assert_ne!(&a[params.payload_bytes()..][..IV_LEN], &b[params.payload_bytes()..][..IV_LEN]);
        Ok(())
    }

    #[test]
    fn test_sequential_iv_is_reproducible() -> Result<()> {
        let params = params(1024, CipherSuite::Aes256CtrHmacSha256);
        let make = || {
            PageCodec::new(
                Arc::new(RustCryptoProvider),
                Arc::new(SequentialIv::new()),
                KeyMaterial::new([4; 32], [5; 32]),
                Salt::from_bytes([6; 16]),
                params,
            )
            .unwrap()
        };
        let original = patterned(&params, 9);
        let mut a = original.clone();
        let mut b = original.clone();
        make().encrypt(PageId(3), &mut a)?;
        make().encrypt(PageId(3), &mut b)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_single_bit_flip_detected_everywhere() -> Result<()> {
        let params = params(1024, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);

        for page in [PageId(1), PageId(7)] {
            let mut sealed = patterned(&params, 1);
            codec.encrypt(page, &mut sealed)?;

            // One bit per byte, rotating through bit positions, covers
            // header, ciphertext, IV, tag and padding.
            for i in 0..sealed.len() {
                let mut tampered = sealed.clone();
                tampered[i] ^= 1 << (i % 8);
                assert_eq!(
                    codec.decrypt(page, &mut tampered),
                    Err(CodecError::IntegrityError),
                    "flip at byte {} of page {} went unnoticed",
                    i,
                    page
                );
                assert_eq!(tampered[i], sealed[i] ^ (1 << (i % 8)));
            }
        }
        Ok(())
    }

    #[test]
    fn test_page_number_is_bound() -> Result<()> {
        let params = params(2048, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);

        let mut buf = patterned(&params, 0);
        codec.encrypt(PageId(3), &mut buf)?;
        assert_eq!(
            codec.decrypt(PageId(4), &mut buf.clone()),
            Err(CodecError::IntegrityError)
        );
        codec.decrypt(PageId(3), &mut buf)?;
        Ok(())
    }

    #[test]
    fn test_wrong_key_rejected() -> Result<()> {
        let params = params(4096, CipherSuite::Aes256CtrHmacSha512);
        let alpha = codec_with(params, [0xaa; 32]);
        let beta = PageCodec::new(
            Arc::new(RustCryptoProvider),
            Arc::new(RandomIv),
            KeyMaterial::new([0xaa; 32], [0x78; 32]),
            Salt::from_bytes([0x5c; 16]),
            params,
        )?;

        let mut buf = patterned(&params, 0);
        alpha.encrypt(PageId(2), &mut buf)?;
        assert_eq!(
            beta.decrypt(PageId(2), &mut buf),
            Err(CodecError::IntegrityError)
        );
        Ok(())
    }

    #[test]
    fn test_zero_page_fails_authentication() {
        let params = params(4096, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);
        let mut zeros = vec![0u8; 4096];
        assert_eq!(
            codec.decrypt(PageId(2), &mut zeros),
            Err(CodecError::IntegrityError)
        );
    }

    #[test]
    fn test_page_one_header_stays_plaintext() -> Result<()> {
        let params = params(4096, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);

        let mut buf = vec![0x01u8; 4096];
        codec.encrypt(PageId::FIRST, &mut buf)?;
        assert_eq!(&buf[..SALT_LEN], codec.salt().as_bytes());
        let on_disk = FileHeader::parse(&buf)?;
        assert_eq!(on_disk, codec.header());

        codec.decrypt(PageId::FIRST, &mut buf)?;
        assert_eq!(&buf[..SALT_LEN], MAGIC);
        assert_eq!(&buf[16..20], &4096u32.to_be_bytes());
        assert!(buf[FILE_HEADER_SIZE..params.payload_bytes()]
            .iter()
            .all(|&b| b == 0x01));
        Ok(())
    }

    #[test]
    fn test_wrong_buffer_size() {
        let params = params(4096, CipherSuite::Aes256CtrHmacSha256);
        let codec = codec(params);
        let mut short = vec![0u8; 4048];
        assert_eq!(
            codec.encrypt(PageId(2), &mut short),
            Err(CodecError::BufferSize {
                expected: 4096,
                actual: 4048
            })
        );
    }

    #[test]
    fn test_rejects_reserve_too_small() {
        let result = PageCodec::new(
            Arc::new(RustCryptoProvider),
            Arc::new(RandomIv),
            KeyMaterial::new([0; 32], [0; 32]),
            Salt::from_bytes([1; 16]),
            CodecParams {
                reserve_bytes: 32,
                ..CodecParams::default()
            },
        );
        assert!(matches!(
            result,
            Err(CodecError::UnsupportedParameters { .. })
        ));
    }
}
