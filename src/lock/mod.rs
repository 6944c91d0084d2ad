//! Row-level locking for transactions.
//!
//! # Components
//! - [`LockOwner`] - A transaction's claim over a row ([`RowLockOwner`]) or
//!   the free sentinel ([`NullLockOwner`])
//! - [`OwnerRef`] / [`WaitingSessions`] - A row's owner slot and its FIFO
//! - [`RowLock`] - Lock, unlock with one-at-a-time handoff, MVCC reads
//! - [`Session`] / [`Transaction`] - Identities from the transaction layer

mod lock_owner;
mod row_lock;
mod session;

pub use lock_owner::{
    LockOwner, NullLockOwner, OwnerRef, RowLockOwner, WaitingSessions, WaitingSessionsRef,
};
pub use row_lock::{RowLock, RowLockStatus};
pub use session::{Session, Transaction};
