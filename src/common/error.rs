//! Error types for HandoffDB.

use thiserror::Error;

use super::PagePosition;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in HandoffDB.
///
/// Lock contention is not in here. A contended `try_lock` is a control-flow
/// signal ("queued, wait for a wake"), never a fault.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the page store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No page record exists at the requested position.
    #[error("Page {0} not found")]
    PageNotFound(PagePosition),

    /// The stored checksum does not match the record contents.
    #[error("Checksum mismatch at {pos}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        pos: PagePosition,
        expected: u32,
        actual: u32,
    },

    /// The page bytes could not be decoded.
    #[error("Page {pos} is corrupted: {reason}")]
    Corrupted { pos: PagePosition, reason: String },

    /// The page has never been written, so it has no position to load from.
    #[error("Page has not been saved")]
    UnsavedPage,

    /// A node page cannot be encoded while one of its children is unsaved.
    #[error("Node page has an unsaved child")]
    UnsavedChild,

    /// The scheduler no longer accepts operations.
    #[error("Page operation scheduler is shut down")]
    SchedulerShutdown,

    /// The operation was dropped before it produced a result.
    #[error("Page operation was dropped before completing")]
    OperationDropped,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unlock was called by someone that does not hold the lock.
    #[error("Caller does not own this lock")]
    NotLockOwner,
}
