//! Page operations: the units of work handlers run.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use crate::btree::{LockAttempt, PageReference};
use crate::common::{Error, Result};

use super::handler::PageOperationHandler;

/// Outcome of one `run` of a [`PageOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// The operation is finished and is dropped by the handler.
    Completed,
    /// Run again later; goes to the back of the handler's run queue.
    Yield,
    /// A `try_lock` failed and registered this handler as a waiter. The
    /// operation sleeps until the lock holder wakes this handler.
    ///
    /// Only return this after a failed `try_lock`, otherwise nothing will
    /// ever wake the operation.
    Parked,
}

/// Work executed by a [`PageOperationHandler`].
///
/// # Contract
/// - `run` must not block the thread on a lock; contended locks are handled
///   by returning [`OperationStatus::Parked`].
/// - Page locks acquired during `run` must be released before it returns.
///   Lock ownership belongs to the handler, so a lock left held would be
///   silently shared with every other operation on the same handler.
/// - When several references are locked, take them parent before child and
///   left before right. The lock primitive has no deadlock detection.
pub trait PageOperation: Send {
    /// Attempt the operation on behalf of `handler`.
    fn run(&mut self, handler: &PageOperationHandler) -> OperationStatus;

    /// Name used in logs.
    fn name(&self) -> &str {
        "page-operation"
    }
}

impl<F> PageOperation for F
where
    F: FnMut(&PageOperationHandler) -> OperationStatus + Send,
{
    fn run(&mut self, handler: &PageOperationHandler) -> OperationStatus {
        self(handler)
    }
}

/// Lock a set of references, mutate under the locks, reply with the result.
///
/// This is the generic "descend and mutate" unit. References are locked in
/// the order given. If any of them is contended, everything acquired so far
/// is released and the operation parks; it starts over from the first
/// reference when woken. Locks are released on every exit path, including
/// an `Err` from the action or a panic inside it.
pub struct WriteOperation<T, F> {
    name: String,
    refs: Vec<Arc<PageReference>>,
    action: F,
    reply: Option<Sender<Result<T>>>,
}

impl<T, F> WriteOperation<T, F>
where
    T: Send,
    F: FnMut(&PageOperationHandler, &[Arc<PageReference>]) -> Result<T> + Send,
{
    /// Build the operation and the handle its result arrives on.
    pub fn new(refs: Vec<Arc<PageReference>>, action: F) -> (Self, OperationHandle<T>) {
        let (tx, rx) = channel::bounded(1);
        let op = Self {
            name: "write".to_string(),
            refs,
            action,
            reply: Some(tx),
        };
        (op, OperationHandle { rx })
    }

    /// Set the name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, F> PageOperation for WriteOperation<T, F>
where
    T: Send,
    F: FnMut(&PageOperationHandler, &[Arc<PageReference>]) -> Result<T> + Send,
{
    fn run(&mut self, handler: &PageOperationHandler) -> OperationStatus {
        let mut guards = Vec::with_capacity(self.refs.len());
        for reference in &self.refs {
            match reference.try_acquire(handler) {
                LockAttempt::Acquired(guard) | LockAttempt::Reentrant(guard) => guards.push(guard),
                LockAttempt::Queued => {
                    trace!(op = %self.name, handler = %handler.id(), "write parked");
                    return OperationStatus::Parked;
                }
            }
        }

        let result = (self.action)(handler, &self.refs);
        drop(guards);

        if let Some(reply) = self.reply.take() {
            // The caller may have dropped its handle; the work is done anyway.
            let _ = reply.send(result);
        }
        OperationStatus::Completed
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Receiving end of an operation's result.
pub struct OperationHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> OperationHandle<T> {
    /// Block until the operation completes.
    ///
    /// # Errors
    /// The operation's own error, or `Error::OperationDropped` if it was
    /// discarded (scheduler shutdown, panic) before replying.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| Error::OperationDropped)?
    }

    /// Wait at most `timeout`. `None` means still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::OperationDropped)),
        }
    }

    /// Result if already available, without waiting.
    pub fn try_result(&self) -> Option<Result<T>> {
        self.wait_timeout(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Page;
    use crate::common::HandlerId;
    use crate::handler::{HandlerMessage, HandlerRegistry};

    #[test]
    fn test_write_operation_runs_and_replies() {
        let (registry, _inboxes) = HandlerRegistry::new(1, "h");
        let handler = registry.handler(HandlerId::new(0)).unwrap();
        let reference = Arc::new(PageReference::from_page(Page::new_leaf(vec![], vec![])));

        let (mut op, handle) = WriteOperation::new(vec![reference.clone()], |h, refs| {
            assert_eq!(refs[0].lock_owner(), Some(h.key()));
            Ok(7)
        });

        assert_eq!(op.run(&handler), OperationStatus::Completed);
        assert_eq!(handle.wait().unwrap(), 7);
        assert!(!reference.is_locked());
    }

    #[test]
    fn test_write_operation_parks_and_releases_partial_locks() {
        let (registry, _inboxes) = HandlerRegistry::new(2, "h");
        let h0 = registry.handler(HandlerId::new(0)).unwrap();
        let h1 = registry.handler(HandlerId::new(1)).unwrap();

        let left = Arc::new(PageReference::new());
        let right = Arc::new(PageReference::new());
        assert!(right.try_lock(&h1));

        let (mut op, handle) = WriteOperation::new(vec![left.clone(), right.clone()], |_, _| Ok(()));
        assert_eq!(op.run(&h0), OperationStatus::Parked);

        // The left lock was given back while parked.
        assert!(!left.is_locked());
        assert_eq!(h1.waiting_handler_count(), 1);
        assert!(handle.try_result().is_none());

        right.unlock(&h1);
        assert_eq!(op.run(&h0), OperationStatus::Completed);
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_write_operation_error_still_unlocks() {
        let (registry, _inboxes) = HandlerRegistry::new(1, "h");
        let handler = registry.handler(HandlerId::new(0)).unwrap();
        let reference = Arc::new(PageReference::new());

        let (mut op, handle) =
            WriteOperation::new(vec![reference.clone()], |_, _| -> Result<()> {
                Err(Error::UnsavedPage)
            });

        assert_eq!(op.run(&handler), OperationStatus::Completed);
        assert!(matches!(handle.wait(), Err(Error::UnsavedPage)));
        assert!(!reference.is_locked());
    }

    #[test]
    fn test_named_write_operation() {
        let (op, _handle) =
            WriteOperation::new(vec![Arc::new(PageReference::new())], |_, _| Ok(()));
        assert_eq!(op.name(), "write");

        let op = op.named("split-leaf");
        assert_eq!(op.name(), "split-leaf");
        assert_eq!(format!("{:?}", HandlerMessage::Run(Box::new(op))), "Run(split-leaf)");
    }

    #[test]
    fn test_dropped_operation_reports_dropped() {
        let reference = Arc::new(PageReference::new());
        let (op, handle) = WriteOperation::new(vec![reference], |_, _| Ok(()));
        drop(op);
        assert!(matches!(handle.wait(), Err(Error::OperationDropped)));
    }

    #[test]
    fn test_closure_operation() {
        let (registry, _inboxes) = HandlerRegistry::new(1, "h");
        let handler = registry.handler(HandlerId::new(0)).unwrap();

        let mut runs = 0;
        let mut op = |_: &PageOperationHandler| {
            runs += 1;
            if runs < 2 {
                OperationStatus::Yield
            } else {
                OperationStatus::Completed
            }
        };
        assert_eq!(PageOperation::run(&mut op, &handler), OperationStatus::Yield);
        assert_eq!(PageOperation::run(&mut op, &handler), OperationStatus::Completed);
        assert_eq!(op.name(), "page-operation");
    }
}
