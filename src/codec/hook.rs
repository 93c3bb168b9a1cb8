//! The pager-facing side of the codec.
//!
//! [`CodecHook`] sits between the pager and the disk: the pager hands it the
//! engine-visible payload of a page on write and the raw on-disk bytes on
//! read. Which transformation applies depends on the [`CodecMode`].

use super::error::{CodecError, CodecResult};
use super::header::{FileHeader, FileKind, FILE_HEADER_SIZE};
use super::key::KeySecret;
use super::key_manager::KeyManager;
use super::page_codec::PageCodec;
use super::params::CodecParams;
use crate::storage::page::PageId;
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// Empty or plaintext file without a key: pages pass through untouched.
    Passthrough,
    /// Encrypted file, no key yet: all page I/O fails with `KeyRequired`.
    Armed,
    Keyed,
    /// A rekey is rewriting the file.
    Rekeying,
}

#[derive(Debug)]
pub struct CodecHook {
    keys: KeyManager,
    file: FileKind,
    rekeying: bool,
    scratch: Vec<u8>,
}

impl CodecHook {
    pub fn new(keys: KeyManager, file: FileKind) -> Self {
        CodecHook {
            keys,
            file,
            rekeying: false,
            scratch: Vec::new(),
        }
    }

    pub fn mode(&self) -> CodecMode {
        if self.rekeying {
            CodecMode::Rekeying
        } else if self.keys.is_keyed() {
            CodecMode::Keyed
        } else if self.file.is_encrypted() {
            CodecMode::Armed
        } else {
            CodecMode::Passthrough
        }
    }

    pub fn file_kind(&self) -> &FileKind {
        &self.file
    }

    pub fn codec(&self) -> Option<&PageCodec> {
        self.keys.codec()
    }

    /// Parameters in force: the active key's, else the file's, else the
    /// defaults a new file would get.
    pub fn params(&self) -> CodecParams {
        match (self.keys.codec(), self.file.params()) {
            (Some(codec), _) => *codec.params(),
            (None, Some(params)) => *params,
            (None, None) => *self.keys.defaults(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.params().page_size
    }

    pub fn payload_bytes(&self) -> usize {
        self.params().payload_bytes()
    }

    /// Change the parameters a new file is created with. Only possible
    /// while the file is empty and unkeyed.
    pub fn set_defaults(&mut self, params: CodecParams) -> CodecResult<()> {
        if self.file != FileKind::Empty || self.keys.is_keyed() {
            return Err(CodecError::UnsupportedParameters {
                page_size: params.page_size,
                reserve_bytes: params.reserve_bytes,
                reason: "parameters are fixed once a key is set or page 1 is written",
            });
        }
        params.validate_layout()?;
        self.keys.set_defaults(params);
        Ok(())
    }

    /// `page_one` is the raw first page of the file, if it has one.
    pub fn set_key(&mut self, secret: &KeySecret, page_one: Option<&[u8]>) -> CodecResult<()> {
        if self.rekeying {
            return Err(CodecError::Provider("rekey in progress"));
        }
        self.keys.set_key(&self.file, secret, page_one)
    }

    /// Drop the active key. On an encrypted file the hook goes back to
    /// [`CodecMode::Armed`] rather than passing pages through, so page I/O
    /// fails with [`CodecError::KeyRequired`] until a key is set again.
    pub fn clear_key(&mut self) {
        self.keys.clear_key();
    }

    /// The first [`FILE_HEADER_SIZE`] bytes of page 1 as callers see them:
    /// the magic followed by the parameter block, whether or not the file
    /// is encrypted.
    pub fn page_one_header(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut header = [0u8; FILE_HEADER_SIZE];
        FileHeader::plaintext(self.params()).write_to(&mut header);
        header
    }

    /// Turn the engine payload of `page` into the bytes to write.
    ///
    /// The returned slice is exactly one page long and borrows the hook's
    /// scratch buffer.
    pub fn on_page_write(&mut self, page: PageId, payload: &[u8]) -> CodecResult<&[u8]> {
        if self.mode() == CodecMode::Armed {
            return Err(CodecError::KeyRequired);
        }
        let params = self.params();
        self.scratch.resize(params.page_size, 0);
        seal_page(self.keys.codec(), &params, page, payload, &mut self.scratch)?;

        if page.is_first() {
            self.file = match self.keys.codec() {
                Some(codec) => FileKind::from(codec.header()),
                None => FileKind::Plaintext(params),
            };
        }
        Ok(&self.scratch)
    }

    /// Turn the raw on-disk bytes of `page` into plaintext, in place.
    pub fn on_page_read(&self, page: PageId, raw: &mut [u8]) -> CodecResult<()> {
        if self.mode() == CodecMode::Armed {
            return Err(CodecError::KeyRequired);
        }
        let page_size = self.page_size();
        if raw.len() != page_size {
            return Err(CodecError::BufferSize {
                expected: page_size,
                actual: raw.len(),
            });
        }
        open_page(self.keys.codec(), page, raw)
    }

    /// Derive the state a rekey switches to (`None` decrypts the file) and
    /// enter [`CodecMode::Rekeying`].
    pub fn begin_rekey(&mut self, secret: Option<&KeySecret>) -> CodecResult<Option<PageCodec>> {
        match self.mode() {
            CodecMode::Armed => return Err(CodecError::KeyRequired),
            CodecMode::Rekeying => return Err(CodecError::Provider("rekey in progress")),
            CodecMode::Passthrough | CodecMode::Keyed => {}
        }
        let next = match secret {
            Some(secret) => Some(self.keys.rekey(&self.file, secret)?),
            None => None,
        };
        info!(
            "rekey started: {} -> {}",
            describe(self.keys.is_keyed()),
            describe(next.is_some())
        );
        self.rekeying = true;
        Ok(next)
    }

    /// Install the state prepared by [`begin_rekey`](Self::begin_rekey) once
    /// the rewritten file is in place.
    pub fn finish_rekey(&mut self, next: Option<PageCodec>, file_has_pages: bool) {
        let params = self.params();
        self.file = match (&next, file_has_pages) {
            (_, false) => FileKind::Empty,
            (Some(codec), true) => FileKind::from(codec.header()),
            (None, true) => FileKind::Plaintext(params),
        };
        match next {
            Some(codec) => {
                self.keys.install(codec);
            }
            None => self.keys.clear_key(),
        }
        self.rekeying = false;
        info!("rekey committed");
    }

    /// Leave the previous state active.
    pub fn abort_rekey(&mut self) {
        self.rekeying = false;
    }
}

fn describe(keyed: bool) -> &'static str {
    if keyed {
        "encrypted"
    } else {
        "plaintext"
    }
}

/// Build the on-disk form of `page` from its payload into `out`.
///
/// `codec == None` writes the page in plaintext, with the plaintext file
/// header on page 1.
pub(crate) fn seal_page(
    codec: Option<&PageCodec>,
    params: &CodecParams,
    page: PageId,
    payload: &[u8],
    out: &mut [u8],
) -> CodecResult<()> {
    let payload_bytes = params.payload_bytes();
    if payload.len() != payload_bytes {
        return Err(CodecError::BufferSize {
            expected: payload_bytes,
            actual: payload.len(),
        });
    }
    if out.len() != params.page_size {
        return Err(CodecError::BufferSize {
            expected: params.page_size,
            actual: out.len(),
        });
    }
    out[..payload_bytes].copy_from_slice(payload);
    out[payload_bytes..].fill(0);

    match codec {
        Some(codec) => codec.encrypt(page, out),
        None => {
            if page.is_first() {
                FileHeader::plaintext(*params).write_to(out);
            }
            Ok(())
        }
    }
}

/// Decode a raw page in place. Tag mismatches surface as
/// [`CodecError::PageCorruption`] naming the page.
pub(crate) fn open_page(codec: Option<&PageCodec>, page: PageId, raw: &mut [u8]) -> CodecResult<()> {
    match codec {
        Some(codec) => codec.decrypt(page, raw).map_err(|e| match e {
            CodecError::IntegrityError => CodecError::PageCorruption(page),
            other => other,
        }),
        None => Ok(()),
    }
}
