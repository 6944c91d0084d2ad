//! The page store interface and an in-memory implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::common::config::MAX_PAGE_PAYLOAD;
use crate::common::{Error, PageKind, PagePosition, Result};

use super::record::RecordHeader;

/// Storage collaborator of the page layer.
///
/// Stores are copy-on-write: a write never overwrites an existing record, it
/// appends a new one and returns its position. The old position is reported
/// so the store can account for it as garbage.
///
/// Implementations must be safe to call from every handler thread at once.
pub trait PageStore: Send + Sync {
    /// Read the payload of the page at `pos`.
    ///
    /// # Errors
    /// - `Error::UnsavedPage` if `pos` is [`PagePosition::UNSAVED`]
    /// - `Error::PageNotFound` if nothing was written at `pos`
    /// - `Error::ChecksumMismatch` / `Error::Corrupted` on integrity failures
    fn load_page(&self, pos: PagePosition) -> Result<Vec<u8>>;

    /// Write a page payload, superseding `old_pos` (which may be unsaved).
    fn write_page(&self, old_pos: PagePosition, kind: PageKind, data: &[u8])
        -> Result<PagePosition>;

    /// Record that the page at `pos` is no longer referenced. Unsaved
    /// positions are ignored.
    fn mark_garbage(&self, pos: PagePosition);

    /// Number of records superseded by later writes or marked as garbage.
    fn garbage_count(&self) -> u64;
}

/// Validate a record header read back from `pos` and return its payload length.
pub(crate) fn check_header(pos: PagePosition, header: &RecordHeader) -> Result<usize> {
    let expected = pos.kind().ok_or(Error::UnsavedPage)?;
    match header.kind() {
        Some(kind) if kind == expected => {}
        Some(kind) => {
            return Err(Error::Corrupted {
                pos,
                reason: format!("record kind {:?} does not match position", kind),
            })
        }
        None => {
            return Err(Error::Corrupted {
                pos,
                reason: format!("unknown record kind {}", header.kind_code),
            })
        }
    }
    let length = header.length as usize;
    if length > MAX_PAGE_PAYLOAD {
        return Err(Error::Corrupted {
            pos,
            reason: format!("payload length {} exceeds limit", length),
        });
    }
    Ok(length)
}

/// Verify the checksum of a loaded payload.
pub(crate) fn check_payload(pos: PagePosition, header: &RecordHeader, payload: &[u8]) -> Result<()> {
    let actual = header.actual_checksum(payload);
    if actual != header.checksum {
        return Err(Error::ChecksumMismatch {
            pos,
            expected: header.checksum,
            actual,
        });
    }
    Ok(())
}

/// A page store kept entirely in memory.
///
/// Records are laid out back to back in one growable buffer, exactly as the
/// file store lays them out on disk, so positions behave the same way.
///
/// # Example
/// ```
/// use handoffdb::common::{PageKind, PagePosition};
/// use handoffdb::storage::{MemoryPageStore, PageStore};
///
/// let store = MemoryPageStore::new();
/// let pos = store.write_page(PagePosition::UNSAVED, PageKind::Leaf, b"hi").unwrap();
/// assert_eq!(store.load_page(pos).unwrap(), b"hi");
/// ```
#[derive(Default)]
pub struct MemoryPageStore {
    data: RwLock<Vec<u8>>,
    garbage: AtomicU64,
}

impl MemoryPageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes written so far.
    pub fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    /// Flip one byte of the stored data. Test hook for corruption paths.
    #[cfg(test)]
    pub(crate) fn corrupt_byte(&self, offset: usize) {
        let mut data = self.data.write();
        data[offset] ^= 0xFF;
    }
}

impl PageStore for MemoryPageStore {
    fn load_page(&self, pos: PagePosition) -> Result<Vec<u8>> {
        if !pos.is_saved() {
            return Err(Error::UnsavedPage);
        }
        let data = self.data.read();
        let start = pos.offset() as usize;
        if start + RecordHeader::SIZE > data.len() {
            return Err(Error::PageNotFound(pos));
        }

        let header = RecordHeader::from_bytes(&data[start..]);
        let length = check_header(pos, &header)?;
        let payload_start = start + RecordHeader::SIZE;
        if payload_start + length > data.len() {
            return Err(Error::PageNotFound(pos));
        }

        let payload = &data[payload_start..payload_start + length];
        check_payload(pos, &header, payload)?;
        Ok(payload.to_vec())
    }

    fn write_page(
        &self,
        old_pos: PagePosition,
        kind: PageKind,
        payload: &[u8],
    ) -> Result<PagePosition> {
        let record = RecordHeader::encode_record(kind, payload);
        let pos = {
            let mut data = self.data.write();
            let pos = PagePosition::new(data.len() as u64, kind);
            data.extend_from_slice(&record);
            pos
        };
        if old_pos.is_saved() {
            self.garbage.fetch_add(1, Ordering::Relaxed);
        }
        trace!(%pos, %old_pos, len = payload.len(), "page written");
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
