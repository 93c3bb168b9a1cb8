//! Staging file for rekey.
//!
//! A rekey writes the re-encoded database to `<db>-rekey`, syncs it and
//! renames it over the database. Until the rename the original file is never
//! touched, so a crash at any point leaves either the old or the new file in
//! place. A leftover shadow file is garbage and is removed on open.

use log::warn;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const SHADOW_SUFFIX: &str = "-rekey";

pub fn shadow_path(db_path: &Path) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push(SHADOW_SUFFIX);
    PathBuf::from(name)
}

/// Remove the shadow file of an interrupted rekey. Returns whether one
/// existed.
pub fn discard_stale(db_path: &Path) -> io::Result<bool> {
    let path = shadow_path(db_path);
    match fs::remove_file(&path) {
        Ok(()) => {
            warn!("removed stale rekey file {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Pages are appended in order; the file is deleted on drop unless
/// committed.
pub struct ShadowFile {
    path: PathBuf,
    file: File,
    committed: bool,
}

impl ShadowFile {
    pub fn create(db_path: &Path) -> io::Result<Self> {
        let path = shadow_path(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(ShadowFile {
            path,
            file,
            committed: false,
        })
    }

    pub fn append(&mut self, page: &[u8]) -> io::Result<()> {
        self.file.write_all(page)
    }

    /// Sync the shadow and atomically move it over `db_path`.
    ///
    /// Returns a handle to the renamed file, opened before the rename, so
    /// once this succeeds there is nothing left that can fail and leave the
    /// caller holding the replaced database.
    pub fn commit(mut self, db_path: &Path) -> io::Result<File> {
        self.file.sync_all()?;
        let file = self.file.try_clone()?;
        fs::rename(&self.path, db_path)?;
        self.committed = true;
        // Persist the rename itself. Not every platform can open a
        // directory for syncing.
        if let Some(dir) = db_path.parent() {
            match File::open(dir).and_then(|dir| dir.sync_all()) {
                Ok(()) => {}
                Err(e) => warn!("could not sync directory {:?} after rekey: {}", dir, e),
            }
        }
        Ok(file)
    }
}

impl Drop for ShadowFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}
