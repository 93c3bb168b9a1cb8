//! File header layout and the open-time sniffer.
//!
//! The first 32 bytes of page 1 belong to the file header:
//!
//! ```text
//!  0               16      20  21  22  23      28      32
//!  ┌───────────────┬───────┬───┬───┬───┬───────┬───────┐
//!  │ magic | salt  │ psize │ r │ c │ v │ iter  │ zero  │
//!  └───────────────┴───────┴───┴───┴───┴───────┴───────┘
//! ```
//!
//! A plaintext file starts with [`MAGIC`]; an encrypted file stores its random
//! salt there instead so the ciphertext has no attacker-known prefix. Bytes
//! 16..32 (page size, reserve, cipher id, format version, flags, KDF
//! iterations) stay in plaintext either way so the key derivation can be
//! rebuilt before any key is known.

use super::error::{CodecError, CodecResult};
use super::key::{Salt, SALT_LEN};
use super::params::{CipherSuite, CodecParams};
use byteorder::{BigEndian, ByteOrder};

/// Magic string of a plaintext database.
pub const MAGIC: &[u8; 16] = b"sealdb format 1\0";
/// Size of the engine file header at the start of page 1.
pub const FILE_HEADER_SIZE: usize = 32;
/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

const PAGE_SIZE_OFFSET: usize = 16;
const RESERVE_OFFSET: usize = 20;
const CIPHER_OFFSET: usize = 21;
const VERSION_OFFSET: usize = 22;
const FLAGS_OFFSET: usize = 23;
const ITERATIONS_OFFSET: usize = 24;

/// Decoded file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// `Some` for an encrypted file.
    pub salt: Option<Salt>,
    pub params: CodecParams,
}

impl FileHeader {
    pub fn plaintext(params: CodecParams) -> Self {
        FileHeader { salt: None, params }
    }

    pub fn encrypted(salt: Salt, params: CodecParams) -> Self {
        FileHeader {
            salt: Some(salt),
            params,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.salt.is_some()
    }

    /// Write the header into `buf[..FILE_HEADER_SIZE]`.
    pub fn write_to(&self, buf: &mut [u8]) {
        match &self.salt {
            Some(salt) => buf[..SALT_LEN].copy_from_slice(salt.as_bytes()),
            None => buf[..SALT_LEN].copy_from_slice(MAGIC),
        }
        write_params(&self.params, &mut buf[PAGE_SIZE_OFFSET..FILE_HEADER_SIZE]);
    }

    /// Parse a header from the first bytes of a file.
    pub fn parse(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(CodecError::BufferSize {
                expected: FILE_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let params = read_params(&buf[PAGE_SIZE_OFFSET..FILE_HEADER_SIZE])?;
        if &buf[..SALT_LEN] == MAGIC {
            params.validate_layout()?;
            Ok(FileHeader::plaintext(params))
        } else {
            params.validate_for_encryption()?;
            let mut salt = [0u8; SALT_LEN];
            salt.copy_from_slice(&buf[..SALT_LEN]);
            Ok(FileHeader::encrypted(Salt::from_bytes(salt), params))
        }
    }
}

/// Encode parameters into the 16-byte plaintext parameter block.
pub(crate) fn write_params(params: &CodecParams, out: &mut [u8]) {
    let base = PAGE_SIZE_OFFSET;
    BigEndian::write_u32(
        &mut out[PAGE_SIZE_OFFSET - base..RESERVE_OFFSET - base],
        params.page_size as u32,
    );
    out[RESERVE_OFFSET - base] = params.reserve_bytes as u8;
    out[CIPHER_OFFSET - base] = params.suite.id();
    out[VERSION_OFFSET - base] = FORMAT_VERSION;
    out[FLAGS_OFFSET - base] = 0;
    BigEndian::write_u32(
        &mut out[ITERATIONS_OFFSET - base..ITERATIONS_OFFSET - base + 4],
        params.kdf_iterations,
    );
    out[ITERATIONS_OFFSET - base + 4..FILE_HEADER_SIZE - base].fill(0);
}

fn read_params(block: &[u8]) -> CodecResult<CodecParams> {
    let base = PAGE_SIZE_OFFSET;
    let page_size = BigEndian::read_u32(&block[..4]) as usize;
    let reserve_bytes = block[RESERVE_OFFSET - base] as usize;
    let unsupported = |reason| CodecError::UnsupportedParameters {
        page_size,
        reserve_bytes,
        reason,
    };

    if block[VERSION_OFFSET - base] != FORMAT_VERSION {
        return Err(unsupported("unknown file format version"));
    }
    let suite = CipherSuite::from_id(block[CIPHER_OFFSET - base])
        .ok_or_else(|| unsupported("unknown cipher suite id"))?;
    let kdf_iterations =
        BigEndian::read_u32(&block[ITERATIONS_OFFSET - base..ITERATIONS_OFFSET - base + 4]);

    Ok(CodecParams {
        page_size,
        reserve_bytes,
        kdf_iterations,
        suite,
    })
}

/// What the sniffer found at the start of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Zero-length file: nothing pinned yet.
    Empty,
    Plaintext(CodecParams),
    Encrypted { salt: Salt, params: CodecParams },
}

impl FileKind {
    pub fn params(&self) -> Option<&CodecParams> {
        match self {
            FileKind::Empty => None,
            FileKind::Plaintext(params) => Some(params),
            FileKind::Encrypted { params, .. } => Some(params),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, FileKind::Encrypted { .. })
    }
}

impl From<FileHeader> for FileKind {
    fn from(header: FileHeader) -> Self {
        match header.salt {
            Some(salt) => FileKind::Encrypted {
                salt,
                params: header.params,
            },
            None => FileKind::Plaintext(header.params),
        }
    }
}

/// Classifies a file from its leading bytes.
pub struct HeaderSniffer;

impl HeaderSniffer {
    /// Number of leading bytes the sniffer needs.
    pub const PROBE_LEN: usize = FILE_HEADER_SIZE;

    /// `prefix` holds the first bytes of the file; an empty slice means an
    /// empty file. A non-empty prefix shorter than the header is rejected.
    pub fn sniff(prefix: &[u8]) -> CodecResult<FileKind> {
        if prefix.is_empty() {
            return Ok(FileKind::Empty);
        }
        FileHeader::parse(prefix).map(FileKind::from)
    }
}
