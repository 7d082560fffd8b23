use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistentStorageError>;

#[derive(Debug, Error)]
pub enum PersistentStorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("offline file {path} is truncated ({len} bytes, header needs {header})")]
    Truncated {
        path: PathBuf,
        len: u64,
        header: usize,
    },

    #[error("offline file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("storage directory {dir} is locked by another instance (pid {holder})")]
    Locked { dir: PathBuf, holder: String },

    #[error("entry of {0} bytes does not fit in an i32 length prefix")]
    EntryTooLarge(usize),
}
