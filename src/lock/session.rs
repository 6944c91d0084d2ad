//! Sessions and transactions as seen by the row-lock layer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::common::{SessionId, TransactionId};

/// A client session that can wait for a row lock.
///
/// Waiting is signalled through a one-slot resume channel, so a resume
/// that arrives before the session starts waiting is not lost.
pub struct Session {
    id: SessionId,
    waiting: AtomicBool,
    resume_tx: Sender<()>,
    resume_rx: Receiver<()>,
}

impl Session {
    pub fn new(id: SessionId) -> Arc<Session> {
        let (resume_tx, resume_rx) = channel::bounded(1);
        Arc::new(Session {
            id,
            waiting: AtomicBool::new(false),
            resume_tx,
            resume_rx,
        })
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session is queued on a row lock.
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    pub(crate) fn mark_waiting(&self) {
        self.waiting.store(true, Ordering::Release);
    }

    pub(crate) fn clear_waiting(&self) {
        self.waiting.store(false, Ordering::Release);
    }

    /// Signal that the lock this session waited for was handed to it.
    pub fn resume(&self) {
        self.clear_waiting();
        // Full means a resume is already pending; one is enough.
        let _ = self.resume_tx.try_send(());
    }

    /// Block until resumed or `timeout` passes. Returns whether resumed.
    pub fn wait_resumed(&self, timeout: Duration) -> bool {
        self.resume_rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending resume without blocking.
    pub fn take_resumed(&self) -> bool {
        self.resume_rx.try_recv().is_ok()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

/// A transaction and the session running it.
#[derive(Clone)]
pub struct Transaction {
    id: TransactionId,
    session: Arc<Session>,
}

impl Transaction {
    pub fn new(id: TransactionId, session: Arc<Session>) -> Self {
        Self { id, session }
    }

    #[inline]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("session", &self.session.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_before_wait_is_kept() {
        let session = Session::new(SessionId(1));
        session.mark_waiting();
        assert!(session.is_waiting());

        session.resume();
        session.resume();
        assert!(!session.is_waiting());
        assert!(session.wait_resumed(Duration::from_millis(10)));
        // Both resumes collapsed into one.
        assert!(!session.take_resumed());
    }

    #[test]
    fn test_wait_times_out() {
        let session = Session::new(SessionId(2));
        assert!(!session.wait_resumed(Duration::from_millis(5)));
    }

    #[test]
    fn test_transaction_accessors() {
        let session = Session::new(SessionId(3));
        let txn = Transaction::new(TransactionId(30), session.clone());
        assert_eq!(txn.id(), TransactionId(30));
        assert_eq!(txn.session().id(), SessionId(3));
    }
}
