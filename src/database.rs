use crate::codec::{CodecMode, CodecParams, KeyManager, KeySecret};
use crate::sql::{CipherParameter, ParameterName, Parser, Statement};
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::PageManager;
use crate::storage::{PageId, PageReadGuard, PageWriteGuard};
use anyhow::{bail, Context, Result};
use log::info;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_CACHE_FRAMES: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct DatabaseConfig {
    /// Layout and KDF settings for a file that has no pages yet.
    pub codec: CodecParams,
    pub cache_frames: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            codec: CodecParams::default(),
            cache_frames: DEFAULT_CACHE_FRAMES,
        }
    }
}

/// Snapshot of a database's codec state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherStatus {
    pub mode: CodecMode,
    pub encrypted: bool,
    pub params: CodecParams,
    pub num_pages: u32,
}

impl fmt::Display for CipherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.encrypted, self.mode) {
            (false, _) => "plaintext",
            (true, CodecMode::Armed) => "encrypted (locked)",
            (true, _) => "encrypted",
        };
        writeln!(f, "state:        {}", state)?;
        writeln!(f, "pages:        {}", self.num_pages)?;
        writeln!(f, "page size:    {}", self.params.page_size)?;
        writeln!(f, "reserve:      {}", self.params.reserve_bytes)?;
        if self.encrypted {
            writeln!(f, "cipher:       {}", self.params.suite)?;
            write!(f, "kdf iter:     {}", self.params.kdf_iterations)?;
        } else {
            write!(f, "payload:      {}", self.params.payload_bytes())?;
        }
        Ok(())
    }
}

/// Result of [`Database::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteResult {
    Done,
    /// Pages that failed authentication; empty when the file is intact.
    IntegrityCheck(Vec<PageId>),
    Status(CipherStatus),
    Parameter { name: &'static str, value: String },
}

/// High-level database interface over the page store and its codec
pub struct Database {
    path: PathBuf,
    buffer_pool: BufferPoolManager,
}

impl Database {
    /// Create a new database at the specified path
    pub fn create(path: &Path) -> Result<Self> {
        Self::create_with(path, DatabaseConfig::default())
    }

    pub fn create_with(path: &Path, config: DatabaseConfig) -> Result<Self> {
        // Check if database already exists
        if path.exists() {
            bail!("Database file already exists at {:?}", path);
        }

        let page_manager = PageManager::create(path, KeyManager::standard(config.codec))
            .with_context(|| format!("Failed to create database at {:?}", path))?;
        Ok(Self::with_page_manager(path, page_manager, config))
    }

    /// Open an existing database. An encrypted file stays locked until
    /// [`set_key`](Self::set_key) succeeds.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, DatabaseConfig::default())
    }

    pub fn open_with(path: &Path, config: DatabaseConfig) -> Result<Self> {
        // Check if database exists
        if !path.exists() {
            bail!("Database file does not exist at {:?}", path);
        }

        let page_manager = PageManager::open(path, KeyManager::standard(config.codec))
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        Ok(Self::with_page_manager(path, page_manager, config))
    }

    fn with_page_manager(path: &Path, page_manager: PageManager, config: DatabaseConfig) -> Self {
        let replacer = Box::new(LruReplacer::new(config.cache_frames));
        Self {
            path: path.to_path_buf(),
            buffer_pool: BufferPoolManager::new(page_manager, replacer, config.cache_frames),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    // Key management

    pub fn set_key(&mut self, secret: &KeySecret) -> Result<()> {
        self.buffer_pool
            .with_page_manager(|pm| pm.set_key(secret))
            .context("Failed to set key")?;
        info!("key accepted for {:?}", self.path);
        Ok(())
    }

    /// Apply `secret` unless the file is plaintext and already has pages,
    /// which a key cannot open. Returns whether the key was applied.
    pub fn unlock(&mut self, secret: &KeySecret) -> Result<bool> {
        let status = self.status()?;
        if !status.encrypted && status.num_pages > 0 {
            return Ok(false);
        }
        self.set_key(secret)?;
        Ok(true)
    }

    /// Re-encode the file under `secret`; `None` decrypts it in place.
    pub fn rekey(&mut self, secret: Option<&KeySecret>) -> Result<()> {
        self.rekey_with(secret, |_| true)
    }

    /// Like [`rekey`](Self::rekey); `checkpoint` is asked before each page
    /// and can abandon the rekey by returning `false`.
    pub fn rekey_with<F>(&mut self, secret: Option<&KeySecret>, checkpoint: F) -> Result<()>
    where
        F: FnMut(PageId) -> bool,
    {
        self.quiesce().context("Cannot rekey")?;
        self.buffer_pool
            .with_page_manager(|pm| pm.rekey_with(secret, checkpoint))
            .context("Rekey failed")?;
        Ok(())
    }

    /// Forget the key. Dirty pages are written first and the cache is
    /// emptied so no plaintext outlives the key.
    ///
    /// An encrypted file is locked again afterwards, not opened in
    /// plaintext: page access fails with `KeyRequired` until
    /// [`set_key`](Self::set_key) succeeds.
    pub fn clear_key(&mut self) -> Result<()> {
        self.quiesce().context("Cannot clear key")?;
        self.buffer_pool.with_page_manager(|pm| pm.clear_key());
        Ok(())
    }

    /// Write back and drop every cached page.
    fn quiesce(&self) -> Result<()> {
        self.buffer_pool.flush_all()?;
        self.buffer_pool.discard_all()?;
        Ok(())
    }

    pub fn status(&self) -> Result<CipherStatus> {
        let status = self.buffer_pool.with_page_manager(|pm| -> Result<_> {
            Ok(CipherStatus {
                mode: pm.codec_mode(),
                encrypted: pm.hook().file_kind().is_encrypted() || pm.hook().codec().is_some(),
                params: pm.params(),
                num_pages: pm.num_pages()?,
            })
        })?;
        Ok(status)
    }

    /// Authenticate every page on disk. Returns the corrupt ones.
    pub fn integrity_check(&self) -> Result<Vec<PageId>> {
        self.buffer_pool.flush_all()?;
        let corrupt = self
            .buffer_pool
            .with_page_manager(|pm| pm.integrity_check())?;
        Ok(corrupt)
    }

    /// Change the parameters of a database that has no pages yet.
    pub fn set_parameter(&mut self, parameter: CipherParameter) -> Result<()> {
        self.buffer_pool
            .with_page_manager(|pm| {
                let mut params = pm.params();
                match parameter {
                    CipherParameter::KdfIterations(n) => params.kdf_iterations = n,
                    CipherParameter::PageSize(n) => params.page_size = n,
                    CipherParameter::ReserveBytes(n) => params.reserve_bytes = n,
                    CipherParameter::Cipher(suite) => params.suite = suite,
                }
                pm.set_defaults(params)
            })
            .context("Failed to change cipher parameter")?;
        Ok(())
    }

    pub fn parameter(&self, name: ParameterName) -> String {
        let params = self.buffer_pool.with_page_manager(|pm| pm.params());
        match name {
            ParameterName::KdfIterations => params.kdf_iterations.to_string(),
            ParameterName::PageSize => params.page_size.to_string(),
            ParameterName::ReserveBytes => params.reserve_bytes.to_string(),
            ParameterName::Cipher => params.suite.to_string(),
        }
    }

    /// Execute a single key statement
    pub fn execute(&mut self, sql: &str) -> Result<ExecuteResult> {
        let statement = Parser::new(sql)?.parse()?;
        let result = match statement {
            Statement::SetKey(secret) => {
                self.set_key(&secret)?;
                ExecuteResult::Done
            }
            Statement::Rekey(secret) => {
                self.rekey(secret.as_ref())?;
                ExecuteResult::Done
            }
            Statement::ClearKey => {
                self.clear_key()?;
                ExecuteResult::Done
            }
            Statement::IntegrityCheck => ExecuteResult::IntegrityCheck(self.integrity_check()?),
            Statement::CipherStatus => ExecuteResult::Status(self.status()?),
            Statement::SetParameter(parameter) => {
                self.set_parameter(parameter)?;
                ExecuteResult::Done
            }
            Statement::ShowParameter(name) => ExecuteResult::Parameter {
                name: name.pragma(),
                value: self.parameter(name),
            },
        };
        Ok(result)
    }

    // Pages

    /// Bytes of each page available to callers.
    pub fn payload_bytes(&self) -> usize {
        self.buffer_pool.payload_bytes()
    }

    pub fn num_pages(&self) -> Result<u32> {
        Ok(self.buffer_pool.with_page_manager(|pm| pm.num_pages())?)
    }

    /// Append a zeroed page.
    pub fn allocate_page(&self) -> Result<PageId> {
        let (page_id, _guard) = self.buffer_pool.new_page()?;
        Ok(page_id)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard> {
        Ok(self.buffer_pool.fetch_page(page_id)?)
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard> {
        Ok(self.buffer_pool.fetch_page_write(page_id)?)
    }

    /// Copy of the payload of `page_id`.
    pub fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        Ok(self.fetch_page(page_id)?.to_vec())
    }

    /// Replace the payload of `page_id`, appending it if it is the page
    /// right after the last one.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let payload_bytes = self.payload_bytes();
        if data.len() != payload_bytes {
            bail!(
                "Page data is {} bytes, expected {}",
                data.len(),
                payload_bytes
            );
        }
        let num_pages = self.num_pages()?;
        let mut guard = if page_id.0 == num_pages + 1 {
            self.buffer_pool.new_page()?.1
        } else {
            self.fetch_page_write(page_id)?
        };
        guard.copy_from_slice(data);
        Ok(())
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::storage::StorageError;
    use tempfile::tempdir;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            codec: CodecParams {
                kdf_iterations: 1000,
                ..CodecParams::default()
            },
            cache_frames: 8,
        }
    }

    fn codec_error(err: &anyhow::Error) -> Option<&CodecError> {
        err.downcast_ref::<StorageError>()
            .and_then(|e| e.codec_error())
    }

    #[test]
    fn test_create_database() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        let db = Database::create_with(&db_path, config())?;
        assert!(db_path.exists());
        assert_eq!(db.num_pages()?, 0);
        assert_eq!(db.payload_bytes(), 4048);

        Ok(())
    }

    #[test]
    fn test_create_duplicate_database() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        // Create first database
        let _db = Database::create_with(&db_path, config())?;

        // Try to create again - should fail
        let result = Database::create_with(&db_path, config());
        assert!(result.is_err());
        let err_msg = result.err().unwrap().to_string();
        assert!(err_msg.contains("already exists"));

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_database() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("nonexistent.db");

        let result = Database::open(&db_path);
        assert!(result.is_err());
        let err_msg = result.err().unwrap().to_string();
        assert!(err_msg.contains("does not exist"));

        Ok(())
    }

    #[test]
    fn test_pages_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        {
            let mut db = Database::create_with(&db_path, config())?;
            db.set_key(&KeySecret::passphrase("alpha")?)?;
            let first = db.allocate_page()?;
            let second = db.allocate_page()?;
            assert_eq!(first, PageId(1));
            assert_eq!(second, PageId(2));
            db.write_page(second, &vec![0x5a; db.payload_bytes()])?;
        }

        {
            let mut db = Database::open_with(&db_path, config())?;
            assert!(db.read_page(PageId(2)).is_err());
            db.set_key(&KeySecret::passphrase("alpha")?)?;
            assert_eq!(db.read_page(PageId(2))?, vec![0x5a; db.payload_bytes()]);
        }

        Ok(())
    }

    #[test]
    fn test_write_page_appends_or_replaces() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::create_with(&dir.path().join("test.db"), config())?;
        let payload = db.payload_bytes();

        db.write_page(PageId(1), &vec![1; payload])?;
        db.write_page(PageId(2), &vec![2; payload])?;
        db.write_page(PageId(2), &vec![3; payload])?;
        assert_eq!(db.num_pages()?, 2);
        assert_eq!(db.read_page(PageId(2))?, vec![3; payload]);

        assert!(db.write_page(PageId(5), &vec![0; payload]).is_err());
        assert!(db.write_page(PageId(3), &[0; 16]).is_err());

        Ok(())
    }

    #[test]
    fn test_wrong_key_through_facade() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        {
            let mut db = Database::create_with(&db_path, config())?;
            db.execute("SET KEY 'alpha'")?;
            db.allocate_page()?;
        }

        let mut db = Database::open_with(&db_path, config())?;
        let err = db.execute("SET KEY 'beta'").unwrap_err();
        assert!(matches!(codec_error(&err), Some(CodecError::WrongKey)));
        db.execute("SET KEY 'alpha'")?;
        db.read_page(PageId(1))?;

        Ok(())
    }

    #[test]
    fn test_clear_key_drops_cached_pages() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::create_with(&dir.path().join("test.db"), config())?;
        db.set_key(&KeySecret::passphrase("alpha")?)?;
        let page = db.allocate_page()?;
        db.read_page(page)?;

        db.clear_key()?;
        let err = db.read_page(page).unwrap_err();
        assert!(matches!(codec_error(&err), Some(CodecError::KeyRequired)));

        Ok(())
    }

    #[test]
    fn test_rekey_refused_while_pinned() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::create_with(&dir.path().join("test.db"), config())?;
        let page = db.allocate_page()?;
        let guard = db.fetch_page(page)?;

        let err = db
            .rekey(Some(&KeySecret::passphrase("alpha")?))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::PagesPinned(1))
        ));
        assert!(!db.status()?.encrypted);
        drop(guard);

        db.rekey(Some(&KeySecret::passphrase("alpha")?))?;
        assert!(db.status()?.encrypted);

        Ok(())
    }

    #[test]
    fn test_execute_statements() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::create_with(&dir.path().join("test.db"), config())?;

        db.execute("PRAGMA cipher_page_size = 8192")?;
        db.execute("PRAGMA cipher = 'aes-256-ctr-hmac-sha512'")?;
        db.execute("PRAGMA cipher_reserve_size = 80")?;
        assert_eq!(
            db.execute("PRAGMA cipher_page_size")?,
            ExecuteResult::Parameter {
                name: "cipher_page_size",
                value: "8192".to_string()
            }
        );

        db.execute("SET KEY 'alpha'")?;
        db.allocate_page()?;
        // Parameters are fixed once the file has pages
        assert!(db.execute("PRAGMA kdf_iter = 5000").is_err());

        match db.execute("PRAGMA cipher_status")? {
            ExecuteResult::Status(status) => {
                assert!(status.encrypted);
                assert_eq!(status.mode, CodecMode::Keyed);
                assert_eq!(status.params.page_size, 8192);
                assert_eq!(status.num_pages, 1);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(
            db.execute("PRAGMA cipher_integrity_check")?,
            ExecuteResult::IntegrityCheck(vec![])
        );

        db.execute("REKEY ''")?;
        assert!(!db.status()?.encrypted);
        assert!(db.execute("SELECT 1").is_err());

        Ok(())
    }

    #[test]
    fn test_unlock() -> Result<()> {
        let dir = tempdir()?;

        // A new database takes the key
        let mut db = Database::create_with(&dir.path().join("new.db"), config())?;
        assert!(db.unlock(&KeySecret::passphrase("alpha")?)?);
        assert!(db.status()?.encrypted);

        // A plaintext database with pages is left as it is
        let plain_path = dir.path().join("plain.db");
        {
            let db = Database::create_with(&plain_path, config())?;
            db.allocate_page()?;
        }
        let mut db = Database::open_with(&plain_path, config())?;
        assert!(!db.unlock(&KeySecret::passphrase("alpha")?)?);
        assert_eq!(db.status()?.mode, CodecMode::Passthrough);
        db.read_page(PageId(1))?;

        // A wrong key for an encrypted database is still an error
        let enc_path = dir.path().join("enc.db");
        {
            let mut db = Database::create_with(&enc_path, config())?;
            db.set_key(&KeySecret::passphrase("alpha")?)?;
            db.allocate_page()?;
        }
        let mut db = Database::open_with(&enc_path, config())?;
        let err = db.unlock(&KeySecret::passphrase("beta")?).unwrap_err();
        assert!(matches!(codec_error(&err), Some(CodecError::WrongKey)));
        assert!(db.unlock(&KeySecret::passphrase("alpha")?)?);

        Ok(())
    }

    #[test]
    fn test_page_one_reads_header_from_cache() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::create_with(&dir.path().join("test.db"), config())?;
        db.set_key(&KeySecret::passphrase("alpha")?)?;

        db.write_page(PageId(1), &vec![0x01; db.payload_bytes()])?;
        let cached = db.read_page(PageId(1))?;
        assert_eq!(&cached[..16], crate::codec::MAGIC);
        assert!(cached[32..].iter().all(|&b| b == 0x01));

        db.flush()?;
        db.clear_key()?;
        db.set_key(&KeySecret::passphrase("alpha")?)?;
        assert_eq!(db.read_page(PageId(1))?, cached);

        Ok(())
    }
}
