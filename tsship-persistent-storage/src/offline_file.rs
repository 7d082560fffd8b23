use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::compression;
use crate::errors::{PersistentStorageError, Result};

/// Size of the file header: `[i32 BE entryCount]`.
pub const HEADER_SIZE: usize = 4;
/// Size of each entry's length prefix: `[i32 BE byteLength]`.
pub const LEN_PREFIX_SIZE: usize = 4;

pub const FILE_PREFIX: &str = "offlinemetrics";
pub const FILE_SUFFIX: &str = ".dat";
pub const ENTRY_SUFFIX: &str = ".entry";
pub(crate) const COMPACT_SUFFIX: &str = ".compact";

/// `offlinemetrics<N>.dat`
pub fn file_name(index: u64) -> String {
    format!("{}{}{}", FILE_PREFIX, index, FILE_SUFFIX)
}

/// Parse `N` back out of `offlinemetrics<N>.dat`.
pub fn parse_index(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

/// One entry pulled off the front of an offline file, parked in its own file so it can be
/// sent independently and deleted once delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    pub path: PathBuf,
    pub len: u64,
}

impl ExtractedEntry {
    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Durable FIFO of compressed blobs in a single file.
///
/// Layout
/// - `[i32 BE entryCount]` header followed by `[i32 BE len][payload]` entries.
/// - Appends write the entry, fsync, then rewrite the header, so a crash can at worst leave
///   an uncounted tail that `open` trims away.
/// - Extraction copies the surviving tail into `<path>.compact` and renames it over the
///   original, so the file on disk is always either the old or the new version.
#[derive(Debug)]
pub struct OfflineFile {
    path: PathBuf,
    index: u64,
    // serializes appends and extractions on this file
    io_lock: Mutex<()>,
    entry_count: AtomicI32,
    size: AtomicU64,
    extracted_seq: AtomicU64,
}

impl OfflineFile {
    /// Create a new, empty offline file. Fails if the path already exists.
    pub async fn create(dir: &Path, index: u64) -> Result<Self> {
        let path = dir.join(file_name(index));
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        f.write_all(&0i32.to_be_bytes()).await?;
        f.sync_all().await?;
        debug!(target = "offline_file", file = %path.display(), index, "created offline file");
        Ok(Self::with_state(path, index, 0, HEADER_SIZE as u64))
    }

    /// Open an existing offline file and reconcile its header with the entries on disk.
    ///
    /// Files shorter than the header are reported as `Truncated`. A torn trailing entry is
    /// cut off and the header lowered when it claims more entries than are complete.
    pub async fn open(path: PathBuf, index: u64) -> Result<Self> {
        let mut f = OpenOptions::new().read(true).write(true).open(&path).await?;
        let file_len = f.metadata().await?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(PersistentStorageError::Truncated {
                path,
                len: file_len,
                header: HEADER_SIZE,
            });
        }

        let mut header = [0u8; HEADER_SIZE];
        f.read_exact(&mut header).await?;
        let claimed = i32::from_be_bytes(header);
        if claimed < 0 {
            return Err(PersistentStorageError::Corrupt {
                path,
                reason: format!("negative entry count {}", claimed),
            });
        }

        let mut reader = BufReader::new(f);
        let mut pos = HEADER_SIZE as u64;
        let mut complete: i32 = 0;
        let mut prefix = [0u8; LEN_PREFIX_SIZE];
        while complete < claimed && pos + LEN_PREFIX_SIZE as u64 <= file_len {
            reader.read_exact(&mut prefix).await?;
            let len = i32::from_be_bytes(prefix);
            if len < 0 {
                break;
            }
            let next = pos + LEN_PREFIX_SIZE as u64 + len as u64;
            if next > file_len {
                break;
            }
            reader.seek(SeekFrom::Start(next)).await?;
            pos = next;
            complete += 1;
        }

        let mut f = reader.into_inner();
        if complete < claimed {
            warn!(target = "offline_file", file = %path.display(), claimed, complete, "header claims more entries than are complete; lowering count");
            f.seek(SeekFrom::Start(0)).await?;
            f.write_all(&complete.to_be_bytes()).await?;
        }
        if pos < file_len {
            warn!(target = "offline_file", file = %path.display(), valid_len = pos, file_len, "dropping torn tail of offline file");
            f.set_len(pos).await?;
        }
        if complete < claimed || pos < file_len {
            f.sync_all().await?;
        }

        debug!(target = "offline_file", file = %path.display(), index, entries = complete, size = pos, "opened offline file");
        Ok(Self::with_state(path, index, complete, pos))
    }

    fn with_state(path: PathBuf, index: u64, entry_count: i32, size: u64) -> Self {
        Self {
            path,
            index,
            io_lock: Mutex::new(()),
            entry_count: AtomicI32::new(entry_count),
            size: AtomicU64::new(size),
            extracted_seq: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Number of undrained entries, as recorded in the header.
    pub fn entry_count(&self) -> i32 {
        self.entry_count.load(Ordering::Acquire)
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// True when appending a payload of `payload_len` bytes would push the file past `max_size`.
    /// An empty file always accepts one entry so oversized blobs still land somewhere.
    pub fn would_overflow(&self, payload_len: usize, max_size: u64) -> bool {
        self.entry_count() > 0
            && self.size() + (LEN_PREFIX_SIZE + payload_len) as u64 > max_size
    }

    /// Append one blob (compressed first unless it already is) and return the new file size.
    pub async fn write(&self, blob: Vec<u8>) -> Result<u64> {
        let payload = compression::ensure_compressed(blob)?;
        let len = i32::try_from(payload.len())
            .map_err(|_| PersistentStorageError::EntryTooLarge(payload.len()))?;

        let _guard = self.io_lock.lock().await;
        let size = self.size.load(Ordering::Acquire);
        let count = self.entry_count.load(Ordering::Acquire);

        let mut f = OpenOptions::new().write(true).open(&self.path).await?;
        f.seek(SeekFrom::Start(size)).await?;
        let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&payload);
        f.write_all(&frame).await?;
        f.sync_data().await?;

        // entry is durable; now make it visible through the header
        f.seek(SeekFrom::Start(0)).await?;
        f.write_all(&(count + 1).to_be_bytes()).await?;
        f.sync_data().await?;

        let new_size = size + frame.len() as u64;
        self.size.store(new_size, Ordering::Release);
        self.entry_count.store(count + 1, Ordering::Release);
        Ok(new_size)
    }

    /// Remove the oldest `n` entries, parking each in its own file under `tmp_dir`.
    ///
    /// Returns the parked entries in FIFO order. Asking for zero entries, or extracting from
    /// an empty file, is a no-op.
    pub async fn extract(&self, n: usize, tmp_dir: &Path) -> Result<Vec<ExtractedEntry>> {
        let _guard = self.io_lock.lock().await;
        let count = self.entry_count.load(Ordering::Acquire);
        let size = self.size.load(Ordering::Acquire);
        let take = n.min(count.max(0) as usize);
        if take == 0 {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(File::open(&self.path).await?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64)).await?;

        let mut extracted = Vec::with_capacity(take);
        let mut consumed = HEADER_SIZE as u64;
        let mut prefix = [0u8; LEN_PREFIX_SIZE];
        for _ in 0..take {
            reader.read_exact(&mut prefix).await?;
            let len = i32::from_be_bytes(prefix);
            if len < 0 {
                return Err(PersistentStorageError::Corrupt {
                    path: self.path.clone(),
                    reason: format!("negative entry length {} at offset {}", len, consumed),
                });
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload).await?;
            consumed += (LEN_PREFIX_SIZE + payload.len()) as u64;

            let seq = self.extracted_seq.fetch_add(1, Ordering::AcqRel);
            let entry_path = tmp_dir.join(format!(
                "{}{}-{}{}",
                FILE_PREFIX, self.index, seq, ENTRY_SUFFIX
            ));
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&entry_path)
                .await?;
            out.write_all(&payload).await?;
            out.sync_all().await?;
            extracted.push(ExtractedEntry {
                path: entry_path,
                len: payload.len() as u64,
            });
        }

        // Compact: header with the lowered count, then the untouched tail, then rename over.
        let remaining_count = count - take as i32;
        let remaining_bytes = size.saturating_sub(consumed);
        let compact_path = self.compact_path();
        let compact = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&compact_path)
            .await?;
        let mut writer = BufWriter::new(compact);
        writer.write_all(&remaining_count.to_be_bytes()).await?;
        let mut tail = (&mut reader).take(remaining_bytes);
        let copied = tokio::io::copy(&mut tail, &mut writer).await?;
        if copied != remaining_bytes {
            return Err(PersistentStorageError::Corrupt {
                path: self.path.clone(),
                reason: format!("expected {} tail bytes, copied {}", remaining_bytes, copied),
            });
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);
        tokio::fs::rename(&compact_path, &self.path).await?;

        self.entry_count.store(remaining_count, Ordering::Release);
        self.size
            .store(HEADER_SIZE as u64 + remaining_bytes, Ordering::Release);
        debug!(target = "offline_file", file = %self.path.display(), extracted = take, remaining = remaining_count, "extracted entries");
        Ok(extracted)
    }

    /// Remove the file from disk. A file that is already gone counts as deleted.
    pub async fn delete(&self) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(target = "offline_file", file = %self.path.display(), "deleted offline file");
        Ok(())
    }

    fn compact_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(COMPACT_SUFFIX);
        PathBuf::from(name)
    }
}
