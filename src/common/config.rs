//! Configuration for HandoffDB.
//!
//! Constants describe the record format. The runtime structs configure the
//! handler pool and the file-backed page store.

use std::num::NonZeroUsize;
use std::thread;

/// Size of the record header in front of every stored page:
/// kind (1) + checksum (4) + payload length (4).
pub const RECORD_HEADER_SIZE: usize = 9;

/// Largest payload a single page record may carry (16MB).
///
/// Guards allocation when a corrupted length field is read back.
pub const MAX_PAGE_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default number of parks after which an operation is reported as starving.
pub const DEFAULT_CONTENTION_WARN_THRESHOLD: u32 = 64;

/// Environment variable overriding the number of handlers.
pub const HANDLER_COUNT_ENV: &str = "HANDOFFDB_HANDLERS";

/// Configuration of the page-operation scheduler.
///
/// # Example
/// ```
/// use handoffdb::common::config::SchedulerConfig;
///
/// let config = SchedulerConfig::default().with_handler_count(4);
/// assert_eq!(config.handler_count, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of handlers (one OS thread each). Fixed for the pool's lifetime.
    pub handler_count: usize,

    /// Prefix for worker thread names; the handler index is appended.
    pub thread_name_prefix: String,

    /// An operation parked more often than this is logged as starving.
    pub contention_warn_threshold: u32,
}

impl SchedulerConfig {
    /// Set the number of handlers.
    ///
    /// # Panics
    /// Panics if `handler_count` is 0.
    pub fn with_handler_count(mut self, handler_count: usize) -> Self {
        assert!(handler_count > 0, "handler_count must be > 0");
        self.handler_count = handler_count;
        self
    }

    /// Set the starvation warning threshold.
    pub fn with_contention_warn_threshold(mut self, threshold: u32) -> Self {
        self.contention_warn_threshold = threshold;
        self
    }

    /// Defaults, with the handler count taken from `HANDOFFDB_HANDLERS` when
    /// it holds a positive integer.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(HANDLER_COUNT_ENV)
            .ok()
            .and_then(|v| parse_handler_count(&v))
        {
            Some(n) => config.with_handler_count(n),
            None => config,
        }
    }
}

/// A positive handler count, or `None`.
fn parse_handler_count(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let handler_count = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            handler_count,
            thread_name_prefix: "page-handler-".to_string(),
            contention_warn_threshold: DEFAULT_CONTENTION_WARN_THRESHOLD,
        }
    }
}

/// Configuration of [`FilePageStore`](crate::storage::FilePageStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// `fsync` after every page write.
    pub sync_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}
