//! Row lock with FIFO handoff.
//!
//! Unlike page references, which wake every waiter and let them race, a
//! row hands itself to one waiter at a time in registration order:
//!
//! ```text
//!   unlock(T1) ──▶ pop head S2 ──▶ reserve row for S2 ──▶ S2.resume()
//!                                     │
//!          S4 try_lock (barging) ─────┘ queued behind S3
//! ```

use std::sync::Arc;

use tracing::{debug, trace};

use crate::common::{Error, Result, SessionId, TransactionId};

use super::lock_owner::{
    LockOwner, NullLockOwner, OwnerRef, RowLockOwner, WaitingSessions, WaitingSessionsRef,
};
use super::session::{Session, Transaction};

/// Outcome of [`RowLock::try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLockStatus {
    /// The transaction now holds the row.
    Acquired,
    /// The transaction already held the row.
    Reentrant,
    /// The session was queued; wait for [`Session::wait_resumed`] and retry.
    Waiting,
}

/// Exclusive lock over one row.
///
/// # Example
/// ```
/// use handoffdb::common::{SessionId, TransactionId};
/// use handoffdb::lock::{RowLock, RowLockStatus, Session, Transaction};
///
/// let row = RowLock::new();
/// let s1 = Session::new(SessionId(1));
/// let t1 = Transaction::new(TransactionId(1), s1.clone());
///
/// assert_eq!(row.try_lock(&s1, &t1, Some(b"v0".to_vec())), RowLockStatus::Acquired);
/// row.unlock(&t1).unwrap();
/// ```
pub struct RowLock {
    owner: OwnerRef,
    waiting: WaitingSessionsRef,
}

impl RowLock {
    pub fn new() -> Self {
        Self {
            owner: OwnerRef::new(),
            waiting: Arc::new(WaitingSessions::new()),
        }
    }

    /// Try to lock the row for `transaction`, run by `session`.
    ///
    /// `old_value` is the row value before the transaction touches it; other
    /// readers see it until the lock is released.
    pub fn try_lock(
        &self,
        session: &Arc<Session>,
        transaction: &Transaction,
        old_value: Option<Vec<u8>>,
    ) -> RowLockStatus {
        loop {
            let current = {
                let mut slot = self.owner.lock();
                match slot.transaction() {
                    Some(t) if t.id() == transaction.id() => return RowLockStatus::Reentrant,
                    Some(_) => Arc::clone(&slot),
                    None => {
                        if !self.waiting.claim(session) {
                            trace!(session = session.id().0, "row reserved for another session");
                            return RowLockStatus::Waiting;
                        }
                        *slot = Arc::new(RowLockOwner::new(
                            transaction.clone(),
                            old_value,
                            Arc::clone(&self.waiting),
                        ));
                        trace!(txn = transaction.id().0, "row locked");
                        return RowLockStatus::Acquired;
                    }
                }
            };

            // Registration re-checks that `current` still owns the row.
            if current.add_waiting_session(session, &self.owner) {
                trace!(session = session.id().0, "session waiting for row");
                return RowLockStatus::Waiting;
            }
        }
    }

    /// Release the row and hand it to the longest waiting session.
    ///
    /// # Errors
    /// `Error::NotLockOwner` if `transaction` does not hold the row.
    pub fn unlock(&self, transaction: &Transaction) -> Result<()> {
        let next = {
            let mut slot = self.owner.lock();
            if !slot
                .transaction()
                .is_some_and(|t| t.id() == transaction.id())
            {
                return Err(Error::NotLockOwner);
            }
            *slot = Arc::new(NullLockOwner);
            self.waiting.hand_off()
        };

        if let Some(session) = next {
            debug!(txn = transaction.id().0, next = session.id().0, "row handed off");
            session.resume();
        }
        Ok(())
    }

    /// `session` stops waiting for this row.
    ///
    /// If the row had already been handed to it, the next waiter gets it.
    pub fn abandon(&self, session: &Session) {
        let next = {
            let _slot = self.owner.lock();
            self.waiting.abandon(session.id())
        };
        session.clear_waiting();
        if let Some(next) = next {
            debug!(from = session.id().0, to = next.id().0, "row reservation passed on");
            next.resume();
        }
    }

    /// Current owner; the sentinel when free.
    pub fn owner(&self) -> Arc<dyn LockOwner> {
        self.owner.get()
    }

    /// Transaction holding the row.
    pub fn owner_transaction(&self) -> Option<TransactionId> {
        self.owner.get().transaction().map(Transaction::id)
    }

    /// Sessions queued on this row, head first.
    pub fn waiting_sessions(&self) -> Vec<SessionId> {
        self.waiting.session_ids()
    }

    /// Value of the row as `reader` must see it.
    ///
    /// The owner sees `current`; everyone else sees the owner's old value
    /// while the row is locked.
    pub fn visible_value(&self, reader: &Transaction, current: Option<&[u8]>) -> Option<Vec<u8>> {
        let owner = self.owner.get();
        match owner.transaction() {
            Some(t) if t.id() != reader.id() => owner.old_value().map(<[u8]>::to_vec),
            _ => current.map(<[u8]>::to_vec),
        }
    }
}

impl Default for RowLock {
    fn default() -> Self {
        Self::new()
    }
}
