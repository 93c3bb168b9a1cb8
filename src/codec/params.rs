//! Per-file codec parameters.
//!
//! Page size, reserve size, KDF iteration count and cipher suite are pinned
//! when a file is created and recorded in plaintext in the file header, so a
//! later open can rebuild the key derivation without guessing.

use super::error::{CodecError, CodecResult};
use std::fmt;
use std::str::FromStr;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 65536;
/// Minimum usable bytes per page left to the engine.
pub const MIN_PAYLOAD_BYTES: usize = 480;
/// Reserve bytes are recorded in a single header byte.
pub const MAX_RESERVE_BYTES: usize = 255;
/// Length of the per-page IV stored at the start of the reserve region.
pub const IV_LEN: usize = 16;
/// Length of the derived encryption and HMAC keys.
pub const KEY_LEN: usize = 32;
/// Largest tag produced by any suite.
pub const MAX_TAG_LEN: usize = 64;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_RESERVE_BYTES: usize = 48;
pub const DEFAULT_KDF_ITERATIONS: u32 = 256_000;

/// Cipher + MAC combination used for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// AES-256-CTR, HMAC-SHA256 tags, PBKDF2-HMAC-SHA256.
    Aes256CtrHmacSha256,
    /// AES-256-CTR, HMAC-SHA512 tags, PBKDF2-HMAC-SHA512.
    Aes256CtrHmacSha512,
}

impl CipherSuite {
    pub fn id(self) -> u8 {
        match self {
            CipherSuite::Aes256CtrHmacSha256 => 1,
            CipherSuite::Aes256CtrHmacSha512 => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(CipherSuite::Aes256CtrHmacSha256),
            2 => Some(CipherSuite::Aes256CtrHmacSha512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes256CtrHmacSha256 => "aes-256-ctr-hmac-sha256",
            CipherSuite::Aes256CtrHmacSha512 => "aes-256-ctr-hmac-sha512",
        }
    }

    pub fn tag_len(self) -> usize {
        match self {
            CipherSuite::Aes256CtrHmacSha256 => 32,
            CipherSuite::Aes256CtrHmacSha512 => 64,
        }
    }

    /// Reserve bytes needed to hold the IV and the tag.
    pub fn min_reserve(self) -> usize {
        IV_LEN + self.tag_len()
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-ctr-hmac-sha256" | "sha256" => Ok(CipherSuite::Aes256CtrHmacSha256),
            "aes-256-ctr-hmac-sha512" | "sha512" => Ok(CipherSuite::Aes256CtrHmacSha512),
            other => Err(CodecError::UnknownCipher(other.to_string())),
        }
    }
}

/// Layout and derivation parameters of one database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub page_size: usize,
    pub reserve_bytes: usize,
    pub kdf_iterations: u32,
    pub suite: CipherSuite,
}

impl Default for CodecParams {
    fn default() -> Self {
        CodecParams {
            page_size: DEFAULT_PAGE_SIZE,
            reserve_bytes: DEFAULT_RESERVE_BYTES,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            suite: CipherSuite::Aes256CtrHmacSha256,
        }
    }
}

impl CodecParams {
    /// Bytes of every page visible above the codec.
    pub fn payload_bytes(&self) -> usize {
        self.page_size - self.reserve_bytes
    }

    /// Check the page geometry. Holds for plaintext files too, since the
    /// reserve region is carved out whether or not the file is encrypted.
    pub fn validate_layout(&self) -> CodecResult<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(self.unsupported("page size must be a power of two in 512..=65536"));
        }
        if self.reserve_bytes > MAX_RESERVE_BYTES {
            return Err(self.unsupported("reserve bytes must fit in one byte"));
        }
        if self.reserve_bytes >= self.page_size
            || self.page_size - self.reserve_bytes < MIN_PAYLOAD_BYTES
        {
            return Err(self.unsupported("insufficient payload bytes per page"));
        }
        Ok(())
    }

    /// Check the geometry and that the reserve can carry IV + tag.
    pub fn validate_for_encryption(&self) -> CodecResult<()> {
        self.validate_layout()?;
        if self.reserve_bytes < self.suite.min_reserve() {
            return Err(self.unsupported("reserve bytes too small for IV and tag"));
        }
        if self.kdf_iterations == 0 {
            return Err(self.unsupported("kdf iteration count must be positive"));
        }
        Ok(())
    }

    fn unsupported(&self, reason: &'static str) -> CodecError {
        CodecError::UnsupportedParameters {
            page_size: self.page_size,
            reserve_bytes: self.reserve_bytes,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = CodecParams::default();
        assert!(params.validate_for_encryption().is_ok());
        assert_eq!(params.payload_bytes(), 4048);
    }

    #[test]
    fn test_page_size_must_be_power_of_two() {
        let params = CodecParams {
            page_size: 3000,
            ..CodecParams::default()
        };
        assert!(matches!(
            params.validate_layout(),
            Err(CodecError::UnsupportedParameters { page_size: 3000, .. })
        ));

        for page_size in [256, 131072] {
            let params = CodecParams {
                page_size,
                ..CodecParams::default()
            };
            assert!(params.validate_layout().is_err());
        }
    }

    #[test]
    fn test_payload_too_small() {
        // 512 - 48 = 464 < 480
        let params = CodecParams {
            page_size: 512,
            reserve_bytes: 48,
            ..CodecParams::default()
        };
        let err = params.validate_for_encryption().unwrap_err();
        assert!(err.to_string().contains("insufficient payload"));

        let params = CodecParams {
            page_size: 512,
            reserve_bytes: 32,
            ..CodecParams::default()
        };
        assert!(params.validate_layout().is_ok());
    }

    #[test]
    fn test_reserve_too_small_for_suite() {
        let params = CodecParams {
            reserve_bytes: 48,
            suite: CipherSuite::Aes256CtrHmacSha512,
            ..CodecParams::default()
        };
        assert!(params.validate_layout().is_ok());
        assert!(params.validate_for_encryption().is_err());

        let params = CodecParams {
            reserve_bytes: 80,
            ..params
        };
        assert!(params.validate_for_encryption().is_ok());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let params = CodecParams {
            kdf_iterations: 0,
            ..CodecParams::default()
        };
        assert!(params.validate_for_encryption().is_err());
    }

    #[test]
    fn test_suite_ids_and_names() {
        for suite in [
            CipherSuite::Aes256CtrHmacSha256,
            CipherSuite::Aes256CtrHmacSha512,
        ] {
            assert_eq!(CipherSuite::from_id(suite.id()), Some(suite));
            assert_eq!(suite.name().parse::<CipherSuite>().unwrap(), suite);
        }
        assert_eq!(CipherSuite::from_id(0), None);
        assert!("rot13".parse::<CipherSuite>().is_err());
    }
}
