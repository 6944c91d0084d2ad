//! Row lock owners.
//!
//! A row's owner slot ([`OwnerRef`]) always holds some [`LockOwner`]: the
//! [`NullLockOwner`] sentinel while the row is free, a [`RowLockOwner`]
//! while a transaction holds it. Every owner of the same row shares one
//! [`WaitingSessions`] queue.
//!
//! Lock order: the owner slot first, then the waiting queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::common::SessionId;

use super::session::{Session, Transaction};

/// Shared handle to a row's waiting queue.
pub type WaitingSessionsRef = Arc<WaitingSessions>;

/// A transaction's claim over a row, or the absence of one.
///
/// The default methods describe the sentinel: no transaction, no old value,
/// nobody can wait on it.
pub trait LockOwner: Send + Sync {
    /// Transaction holding the row.
    fn transaction(&self) -> Option<&Transaction> {
        None
    }

    /// Value the row had before the owning transaction changed it. Readers
    /// other than the owner see this value. `None` if the row did not exist.
    fn old_value(&self) -> Option<&[u8]> {
        None
    }

    /// Queue `session` until this owner releases the row.
    ///
    /// Returns `false` if nothing can be waited for: the sentinel, or an
    /// owner that no longer holds `owner_ref`.
    fn add_waiting_session(&self, _session: &Arc<Session>, _owner_ref: &OwnerRef) -> bool {
        false
    }

    /// The row's waiting queue.
    fn waiting_sessions_ref(&self) -> Option<&WaitingSessionsRef> {
        None
    }
}

/// The "no lock" owner.
#[derive(Debug, Default)]
pub struct NullLockOwner;

impl LockOwner for NullLockOwner {}

/// A transaction holding a row.
pub struct RowLockOwner {
    transaction: Transaction,
    old_value: Option<Vec<u8>>,
    waiting: WaitingSessionsRef,
}

impl RowLockOwner {
    pub fn new(
        transaction: Transaction,
        old_value: Option<Vec<u8>>,
        waiting: WaitingSessionsRef,
    ) -> Self {
        Self {
            transaction,
            old_value,
            waiting,
        }
    }
}

impl LockOwner for RowLockOwner {
    fn transaction(&self) -> Option<&Transaction> {
        Some(&self.transaction)
    }

    fn old_value(&self) -> Option<&[u8]> {
        self.old_value.as_deref()
    }

    fn add_waiting_session(&self, session: &Arc<Session>, owner_ref: &OwnerRef) -> bool {
        let slot = owner_ref.lock();
        if !points_at(&slot, self) {
            return false;
        }
        session.mark_waiting();
        self.waiting.push(session);
        true
    }

    fn waiting_sessions_ref(&self) -> Option<&WaitingSessionsRef> {
        Some(&self.waiting)
    }
}

impl fmt::Debug for RowLockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLockOwner")
            .field("transaction", &self.transaction.id())
            .field("has_old_value", &self.old_value.is_some())
            .finish()
    }
}

/// Whether `slot` holds exactly `owner`. Compares addresses only.
fn points_at(slot: &Arc<dyn LockOwner>, owner: &dyn LockOwner) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(slot), owner as *const _)
}

/// A row's owner slot.
pub struct OwnerRef {
    slot: Mutex<Arc<dyn LockOwner>>,
}

impl OwnerRef {
    /// A free slot.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Arc::new(NullLockOwner)),
        }
    }

    /// The current owner.
    pub fn get(&self) -> Arc<dyn LockOwner> {
        Arc::clone(&self.slot.lock())
    }

    /// Install `new` if the slot still holds `expected`.
    pub fn compare_and_set(&self, expected: &Arc<dyn LockOwner>, new: Arc<dyn LockOwner>) -> bool {
        let mut slot = self.slot.lock();
        if !points_at(&slot, expected.as_ref()) {
            return false;
        }
        *slot = new;
        true
    }

    /// Whether the row is free.
    pub fn is_free(&self) -> bool {
        self.slot.lock().transaction().is_none()
    }

    /// Whether `transaction` holds the row.
    pub fn is_held_by(&self, transaction: &Transaction) -> bool {
        self.slot
            .lock()
            .transaction()
            .is_some_and(|t| t.id() == transaction.id())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Arc<dyn LockOwner>> {
        self.slot.lock()
    }
}

impl Default for WaitingSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for OwnerRef {
    fn default() -> Self {
        Self::new()
    }
}

struct WaitingState {
    queue: VecDeque<Arc<Session>>,
    /// Session the free row was handed to and that has not taken it yet.
    reserved: Option<SessionId>,
}

/// FIFO of sessions waiting for a row.
pub struct WaitingSessions {
    state: Mutex<WaitingState>,
}

impl WaitingSessions {
    pub fn new() -> Self {
        WaitingSessions {
            state: Mutex::new(WaitingState {
                queue: VecDeque::new(),
                reserved: None,
            }),
        }
    }

    /// Append `session` unless it is already queued.
    pub fn push(&self, session: &Arc<Session>) {
        let mut state = self.state.lock();
        if !state.queue.iter().any(|s| s.id() == session.id()) {
            state.queue.push_back(Arc::clone(session));
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Queued session ids, head first.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.state.lock().queue.iter().map(|s| s.id()).collect()
    }

    pub fn reserved(&self) -> Option<SessionId> {
        self.state.lock().reserved
    }

    /// Pop the head waiter and reserve the row for it.
    pub(crate) fn hand_off(&self) -> Option<Arc<Session>> {
        let mut state = self.state.lock();
        let next = state.queue.pop_front();
        state.reserved = next.as_ref().map(|s| s.id());
        next
    }

    /// Decide whether `session` may take the free row.
    ///
    /// Succeeds when the row is unreserved or reserved for `session`.
    /// Otherwise `session` is queued behind the current waiters.
    pub(crate) fn claim(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock();
        match state.reserved {
            Some(id) if id != session.id() => {
                if !state.queue.iter().any(|s| s.id() == session.id()) {
                    state.queue.push_back(Arc::clone(session));
                }
                session.mark_waiting();
                false
            }
            _ => {
                state.reserved = None;
                state.queue.retain(|s| s.id() != session.id());
                true
            }
        }
    }

    /// Remove `session` from the queue. If the row was reserved for it, the
    /// reservation passes to the next waiter, who is returned.
    pub(crate) fn abandon(&self, session: SessionId) -> Option<Arc<Session>> {
        let mut state = self.state.lock();
        state.queue.retain(|s| s.id() != session);
        if state.reserved != Some(session) {
            return None;
        }
        let next = state.queue.pop_front();
        state.reserved = next.as_ref().map(|s| s.id());
        next
    }
}
