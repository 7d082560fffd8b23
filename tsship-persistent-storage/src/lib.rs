mod errors;
pub use errors::{PersistentStorageError, Result};

// gzip sniffing and (de)compression of offline blobs
pub mod compression;

// Durable FIFO file: [i32 count][[i32 len][payload]]*
pub mod offline_file;
pub use offline_file::{ExtractedEntry, OfflineFile, HEADER_SIZE};

mod dir_lock;
pub use dir_lock::DirLock;

// File lifecycle, rolling, recovery and drain orchestration
pub mod persistence_manager;
pub use persistence_manager::{PersistenceConfig, PersistenceManager};

pub mod persistent_metrics;

// Unit tests
#[cfg(test)]
mod compression_test;
