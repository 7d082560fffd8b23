use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::{PersistentStorageError, Result};

pub const LOCK_FILE_NAME: &str = "offlinemetrics.lock";

/// Exclusive advisory lock on a storage directory, held for the process lifetime.
///
/// The lock file carries the holder's pid so a second instance can say who owns the
/// directory. The OS drops the lock if the process dies.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: Option<File>,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim();
            return Err(PersistentStorageError::Locked {
                dir: dir.to_path_buf(),
                holder: if holder.is_empty() {
                    "unknown".to_string()
                } else {
                    holder.to_string()
                },
            });
        }

        let pid = std::process::id();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(pid.to_string().as_bytes())?;
        file.sync_all()?;
        info!(target = "dir_lock", lock = %path.display(), pid, "acquired storage directory lock");

        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clear the pid and unlock. The file stays so every instance locks the same inode.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.set_len(0) {
                warn!(target = "dir_lock", lock = %self.path.display(), error = %e, "failed to clear lock file");
            }
            if let Err(e) = FileExt::unlock(&file) {
                warn!(target = "dir_lock", lock = %self.path.display(), error = %e, "failed to unlock storage directory");
            }
            info!(target = "dir_lock", lock = %self.path.display(), "released storage directory lock");
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}
