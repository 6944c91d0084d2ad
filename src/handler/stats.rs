//! Per-handler statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracked by one page-operation handler.
///
/// All fields are atomic: the owning worker bumps most of them, but lock
/// waits and wake-ups are recorded by other handlers touching this one.
///
/// # Memory Ordering
/// We use `Ordering::Relaxed` for all operations because counters are
/// independent of each other and of the lock protocol. Statistics are
/// eventually consistent.
///
/// # Example
/// ```
/// use handoffdb::HandlerStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = HandlerStats::new();
/// stats.operations_run.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().operations_run, 1);
/// ```
#[derive(Debug, Default)]
pub struct HandlerStats {
    /// Number of times an operation's `run` was invoked.
    pub operations_run: AtomicU64,

    /// Number of operations that finished.
    pub operations_completed: AtomicU64,

    /// Number of times an operation parked on a contended lock.
    pub operations_parked: AtomicU64,

    /// Number of other handlers that registered on this handler's wait-list.
    pub lock_waits: AtomicU64,

    /// Number of wake messages this handler sent to waiters.
    pub wakeups_sent: AtomicU64,

    /// Number of wake messages this handler received.
    pub wakeups_received: AtomicU64,
}

impl HandlerStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            operations_run: self.operations_run.load(Ordering::Relaxed),
            operations_completed: self.operations_completed.load(Ordering::Relaxed),
            operations_parked: self.operations_parked.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            wakeups_sent: self.wakeups_sent.load(Ordering::Relaxed),
            wakeups_received: self.wakeups_received.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.operations_run.store(0, Ordering::Relaxed);
        self.operations_completed.store(0, Ordering::Relaxed);
        self.operations_parked.store(0, Ordering::Relaxed);
        self.lock_waits.store(0, Ordering::Relaxed);
        self.wakeups_sent.store(0, Ordering::Relaxed);
        self.wakeups_received.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of handler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStatsSnapshot {
    pub operations_run: u64,
    pub operations_completed: u64,
    pub operations_parked: u64,
    pub lock_waits: u64,
    pub wakeups_sent: u64,
    pub wakeups_received: u64,
}

impl HandlerStatsSnapshot {
    /// Fraction of runs that ended parked (0.0 to 1.0).
    pub fn park_rate(&self) -> f64 {
        if self.operations_run == 0 {
            0.0
        } else {
            self.operations_parked as f64 / self.operations_run as f64
        }
    }

    /// Sum two snapshots, e.g. to aggregate over a whole pool.
    pub fn merge(self, other: HandlerStatsSnapshot) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            operations_run: self.operations_run + other.operations_run,
            operations_completed: self.operations_completed + other.operations_completed,
            operations_parked: self.operations_parked + other.operations_parked,
            lock_waits: self.lock_waits + other.lock_waits,
            wakeups_sent: self.wakeups_sent + other.wakeups_sent,
            wakeups_received: self.wakeups_received + other.wakeups_received,
        }
    }
}

impl fmt::Display for HandlerStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ run: {}, completed: {}, parked: {}, waits: {}, wakeups: {}/{}, park_rate: {:.2}% }}",
            self.operations_run,
            self.operations_completed,
            self.operations_parked,
            self.lock_waits,
            self.wakeups_sent,
            self.wakeups_received,
            self.park_rate() * 100.0
        )
    }
}
