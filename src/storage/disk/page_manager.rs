use super::shadow::{self, ShadowFile};
use crate::codec::hook::{open_page, seal_page};
use crate::codec::{
    CodecError, CodecHook, CodecMode, CodecParams, FileKind, HeaderSniffer, KeyManager,
    KeySecret, PageCodec, FILE_HEADER_SIZE,
};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Page-granular file I/O with the codec hook on every read and write.
///
/// Callers see pages of `payload_bytes()` bytes numbered from 1; the reserve
/// region and the on-disk encoding are handled by the hook.
pub struct PageManager {
    path: PathBuf,
    file: File,
    hook: CodecHook,
}

impl PageManager {
    pub fn create(path: &Path, keys: KeyManager) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        shadow::discard_stale(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            hook: CodecHook::new(keys, FileKind::Empty),
        })
    }

    pub fn open(path: &Path, keys: KeyManager) -> StorageResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        shadow::discard_stale(path)?;

        let len = file.metadata()?.len();
        let kind = if len == 0 {
            FileKind::Empty
        } else {
            if len < FILE_HEADER_SIZE as u64 {
                return Err(StorageError::InvalidHeader(format!(
                    "file is {} bytes, shorter than the header",
                    len
                )));
            }
            let mut prefix = [0u8; HeaderSniffer::PROBE_LEN];
            file.read_exact(&mut prefix)?;
            let kind = HeaderSniffer::sniff(&prefix)?;
            if let Some(params) = kind.params() {
                if len % params.page_size as u64 != 0 {
                    return Err(StorageError::InvalidHeader(format!(
                        "file size {} is not a multiple of the page size {}",
                        len, params.page_size
                    )));
                }
            }
            kind
        };
        debug!(
            "opened {:?}: {}",
            path,
            match &kind {
                FileKind::Empty => "empty",
                FileKind::Plaintext(_) => "plaintext",
                FileKind::Encrypted { .. } => "encrypted",
            }
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            hook: CodecHook::new(keys, kind),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hook(&self) -> &CodecHook {
        &self.hook
    }

    pub fn codec_mode(&self) -> CodecMode {
        self.hook.mode()
    }

    pub fn params(&self) -> CodecParams {
        self.hook.params()
    }

    pub fn page_size(&self) -> usize {
        self.hook.page_size()
    }

    /// Bytes of each page visible to callers.
    pub fn payload_bytes(&self) -> usize {
        self.hook.payload_bytes()
    }

    /// Bytes 0..32 of page 1 as [`read_page`](Self::read_page) returns them.
    pub fn page_one_header(&self) -> [u8; FILE_HEADER_SIZE] {
        self.hook.page_one_header()
    }

    /// Choose the layout of a file that has no pages yet.
    pub fn set_defaults(&mut self, params: CodecParams) -> StorageResult<()> {
        if self.num_pages()? > 0 {
            return Err(CodecError::UnsupportedParameters {
                page_size: params.page_size,
                reserve_bytes: params.reserve_bytes,
                reason: "parameters are fixed once a key is set or page 1 is written",
            }
            .into());
        }
        self.hook.set_defaults(params)?;
        Ok(())
    }

    pub fn set_key(&mut self, secret: &KeySecret) -> StorageResult<()> {
        let page_one = if self.num_pages()? > 0 {
            let mut raw = vec![0u8; self.page_size()];
            self.read_raw(PageId::FIRST, &mut raw)?;
            Some(raw)
        } else {
            None
        };
        self.hook.set_key(secret, page_one.as_deref())?;
        Ok(())
    }

    pub fn clear_key(&mut self) {
        self.hook.clear_key();
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        let payload_bytes = self.payload_bytes();
        if buf.len() != payload_bytes {
            return Err(StorageError::BufferSize {
                expected: payload_bytes,
                actual: buf.len(),
            });
        }
        if self.hook.mode() == CodecMode::Armed {
            return Err(CodecError::KeyRequired.into());
        }

        let mut raw = Zeroizing::new(vec![0u8; self.page_size()]);
        self.read_raw(page_id, &mut raw)?;
        self.hook.on_page_read(page_id, &mut raw)?;
        buf.copy_from_slice(&raw[..payload_bytes]);
        Ok(())
    }

    /// Write the payload of `page_id`. The page must exist or directly
    /// follow the last page; files never contain holes.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        let payload_bytes = self.payload_bytes();
        if data.len() != payload_bytes {
            return Err(StorageError::BufferSize {
                expected: payload_bytes,
                actual: data.len(),
            });
        }
        if page_id.0 == 0 {
            return Err(StorageError::InvalidPageId);
        }
        let num_pages = self.num_pages()?;
        if page_id.0 > num_pages + 1 {
            return Err(StorageError::PageOutOfRange {
                page: page_id,
                num_pages,
            });
        }

        let offset = Self::page_offset(page_id, self.page_size());
        let sealed = self.hook.on_page_write(page_id, data)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(sealed)?;
        self.file.sync_all()?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size() as u64) as u32)
    }

    /// Append a zero-filled page and return its id.
    pub fn allocate_page(&mut self) -> StorageResult<PageId> {
        let new_page_id = PageId(self.num_pages()? + 1);
        let zeros = vec![0u8; self.payload_bytes()];
        self.write_page(new_page_id, &zeros)?;
        Ok(new_page_id)
    }

    /// Authenticate every page. Returns the pages that failed.
    pub fn integrity_check(&mut self) -> StorageResult<Vec<PageId>> {
        if self.hook.mode() == CodecMode::Armed {
            return Err(CodecError::KeyRequired.into());
        }
        let mut corrupt = Vec::new();
        let mut raw = Zeroizing::new(vec![0u8; self.page_size()]);
        for n in 1..=self.num_pages()? {
            let page_id = PageId(n);
            self.read_raw(page_id, &mut raw)?;
            match self.hook.on_page_read(page_id, &mut raw) {
                Ok(()) => {}
                Err(CodecError::PageCorruption(page)) => {
                    warn!("page {} failed authentication", page);
                    corrupt.push(page);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(corrupt)
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Re-encode the whole file under `secret`, or in plaintext for `None`.
    pub fn rekey(&mut self, secret: Option<&KeySecret>) -> StorageResult<()> {
        self.rekey_with(secret, |_| true)
    }

    /// Like [`rekey`](Self::rekey), consulting `checkpoint` before each page.
    /// A `false` answer abandons the rekey with
    /// [`CodecError::RekeyAborted`] and leaves the file under its old key.
    pub fn rekey_with<F>(&mut self, secret: Option<&KeySecret>, mut checkpoint: F) -> StorageResult<()>
    where
        F: FnMut(PageId) -> bool,
    {
        if secret.is_none() && self.hook.mode() == CodecMode::Passthrough {
            debug!("rekey to plaintext on an unencrypted file: nothing to do");
            return Ok(());
        }

        let next = self.hook.begin_rekey(secret)?;
        match self.rewrite(next.as_ref(), &mut checkpoint) {
            Ok(has_pages) => {
                self.hook.finish_rekey(next, has_pages);
                Ok(())
            }
            Err(e) => {
                self.hook.abort_rekey();
                warn!("rekey abandoned: {}", e);
                Err(e)
            }
        }
    }

    /// Copy every page into the shadow file re-encoded for `next` and swap
    /// it in. Returns whether the file has any pages.
    fn rewrite(
        &mut self,
        next: Option<&PageCodec>,
        checkpoint: &mut dyn FnMut(PageId) -> bool,
    ) -> StorageResult<bool> {
        let total = self.num_pages()?;
        if total == 0 {
            return Ok(false);
        }

        let old_params = self.hook.params();
        let new_params = next.map_or(old_params, |codec| *codec.params());
        let payload_bytes = old_params.payload_bytes();

        let mut shadow = ShadowFile::create(&self.path)?;
        let mut raw = Zeroizing::new(vec![0u8; old_params.page_size]);
        let mut sealed = vec![0u8; new_params.page_size];

        for n in 1..=total {
            let page_id = PageId(n);
            if !checkpoint(page_id) {
                return Err(CodecError::RekeyAborted {
                    pages_rewritten: n - 1,
                    total_pages: total,
                }
                .into());
            }
            self.read_raw(page_id, &mut raw)?;
            open_page(self.hook.codec(), page_id, &mut raw)?;
            seal_page(next, &new_params, page_id, &raw[..payload_bytes], &mut sealed)?;
            shadow.append(&sealed)?;
        }

        self.file = shadow.commit(&self.path)?;
        info!("rekey rewrote {} pages of {:?}", total, self.path);
        Ok(true)
    }

    fn read_raw(&mut self, page_id: PageId, raw: &mut [u8]) -> StorageResult<()> {
        if page_id.0 == 0 {
            return Err(StorageError::InvalidPageId);
        }
        if page_id.0 > self.num_pages()? {
            return Err(StorageError::PageNotFound(page_id));
        }
        let offset = Self::page_offset(page_id, raw.len());
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(raw)?;
        Ok(())
    }

    fn page_offset(page_id: PageId, page_size: usize) -> u64 {
        (page_id.0 as u64 - 1) * page_size as u64
    }
}
