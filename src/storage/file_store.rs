//! File-backed page store.
//!
//! The [`FilePageStore`] handles all direct file operations:
//! - Appending page records
//! - Reading and verifying records
//! - Managing the database file

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::config::StoreConfig;
use crate::common::{Error, PageKind, PagePosition, Result};

use super::page_store::{check_header, check_payload, PageStore};
use super::record::RecordHeader;

/// Append-only page store over a single file.
///
/// # File Layout
/// Records are appended one after another. A page's position encodes the
/// byte offset of its record:
/// ```text
/// ┌────────┬─────────┬────────┬─────────┬─────┐
/// │ header │ payload │ header │ payload │ ... │
/// └────────┴─────────┴────────┴─────────┴─────┘
/// ```
///
/// # Thread Safety
/// The file handle sits behind a `Mutex`; every read and append is one
/// seek plus one transfer under that lock.
///
/// # Durability
/// With `StoreConfig::sync_on_write` (the default) every append is followed
/// by `fsync()`.
pub struct FilePageStore {
    file: Mutex<FileState>,
    config: StoreConfig,
    garbage: AtomicU64,
}

struct FileState {
    file: File,
    /// Current end of file, where the next record goes.
    len: u64,
}

impl FilePageStore {
    /// Create a new store file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        debug!(path = %path.as_ref().display(), "created page store");
        Ok(Self::from_file(file, 0, config))
    }

    /// Open an existing store file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();

        debug!(path = %path.as_ref().display(), len, "opened page store");
        Ok(Self::from_file(file, len, config))
    }

    /// Open an existing store file, or create it if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config)
        }
    }

    fn from_file(file: File, len: u64, config: StoreConfig) -> Self {
        Self {
            file: Mutex::new(FileState { file, len }),
            config,
            garbage: AtomicU64::new(0),
        }
    }

    /// Get the total size of the store file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file.lock().len
    }

    /// Flush file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().file.sync_all()?;
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn load_page(&self, pos: PagePosition) -> Result<Vec<u8>> {
        if !pos.is_saved() {
            return Err(Error::UnsavedPage);
        }

        let mut state = self.file.lock();
        let start = pos.offset();
        if start + RecordHeader::SIZE as u64 > state.len {
            return Err(Error::PageNotFound(pos));
        }

        state.file.seek(SeekFrom::Start(start))?;
        let mut header_bytes = [0u8; RecordHeader::SIZE];
        state.file.read_exact(&mut header_bytes)?;
        let header = RecordHeader::from_bytes(&header_bytes);

        let length = check_header(pos, &header)?;
        if start + (RecordHeader::SIZE + length) as u64 > state.len {
            return Err(Error::PageNotFound(pos));
        }

        let mut payload = vec![0u8; length];
        state.file.read_exact(&mut payload)?;
        drop(state);

        check_payload(pos, &header, &payload)?;
        trace!(%pos, len = length, "page loaded from file");
        Ok(payload)
    }

    fn write_page(
        &self,
        old_pos: PagePosition,
        kind: PageKind,
        payload: &[u8],
    ) -> Result<PagePosition> {
        let record = RecordHeader::encode_record(kind, payload);

        let pos = {
            let mut state = self.file.lock();
            let offset = state.len;
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.write_all(&record)?;
            if self.config.sync_on_write {
                state.file.sync_all()?;
            }
            state.len += record.len() as u64;
            PagePosition::new(offset, kind)
        };

        if old_pos.is_saved() {
            self.garbage.fetch_add(1, Ordering::Relaxed);
        }
        trace!(%pos, %old_pos, "page appended to file");
        Ok(pos)
    }

    fn mark_garbage(&self, pos: PagePosition) {
        if pos.is_saved() {
            self.garbage.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn garbage_count(&self) -> u64 {
        self.garbage.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_sync() -> StoreConfig {
        StoreConfig {
            sync_on_write: false,
        }
    }

    #[test]
    fn test_create_new_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = FilePageStore::create(&path, no_sync()).unwrap();
        assert_eq!(store.file_size(), 0);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        FilePageStore::create(&path, no_sync()).unwrap();
        assert!(FilePageStore::create(&path, no_sync()).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.db");

        assert!(FilePageStore::open(&path, no_sync()).is_err());
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = FilePageStore::create(&path, StoreConfig::default()).unwrap();

        let pos = store
            .write_page(PagePosition::UNSAVED, PageKind::Node, b"node bytes")
            .unwrap();
        assert_eq!(pos.kind(), Some(PageKind::Node));
        assert_eq!(store.load_page(pos).unwrap(), b"node bytes");
        assert_eq!(store.file_size(), (RecordHeader::SIZE + 10) as u64);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let pos = {
            let store = FilePageStore::create(&path, no_sync()).unwrap();
            let pos = store
                .write_page(PagePosition::UNSAVED, PageKind::Leaf, b"durable")
                .unwrap();
            store.sync().unwrap();
            pos
        };

        let store = FilePageStore::open(&path, no_sync()).unwrap();
        assert_eq!(store.load_page(pos).unwrap(), b"durable");

        // Appends continue after the existing records.
        let next = store
            .write_page(pos, PageKind::Leaf, b"durable v2")
            .unwrap();
        assert!(next.offset() > pos.offset());
        assert_eq!(store.garbage_count(), 1);
    }

    #[test]
    fn test_read_invalid_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = FilePageStore::create(&path, no_sync()).unwrap();

        let result = store.load_page(PagePosition::new(512, PageKind::Leaf));
        assert!(matches!(result, Err(Error::PageNotFound(_))));
    }

    #[test]
    fn test_corrupted_file_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let pos = {
            let store = FilePageStore::create(&path, no_sync()).unwrap();
            store
                .write_page(PagePosition::UNSAVED, PageKind::Leaf, b"abcdef")
                .unwrap()
        };

        // Flip a payload byte behind the store's back.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(RecordHeader::SIZE as u64 + 1)).unwrap();
            file.write_all(b"Z").unwrap();
        }

        let store = FilePageStore::open(&path, no_sync()).unwrap();
        assert!(matches!(
            store.load_page(pos),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_open_or_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let store = FilePageStore::open_or_create(&path, no_sync()).unwrap();
            store
                .write_page(PagePosition::UNSAVED, PageKind::Leaf, b"x")
                .unwrap();
        }

        let store = FilePageStore::open_or_create(&path, no_sync()).unwrap();
        assert_eq!(store.file_size(), (RecordHeader::SIZE + 1) as u64);
    }
}
