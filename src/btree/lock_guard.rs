//! RAII guards for page reference locks.
//!
//! - [`PageLockGuard`] - Releases the lock when dropped, if it took it
//! - [`LockAttempt`] - Outcome of [`PageReference::try_acquire`]
//!
//! A guard from a re-entrant acquisition does not release anything, so a
//! handler can lock the same reference at several levels of one descent
//! and only the outermost guard unlocks.

use std::ops::Deref;

use crate::handler::PageOperationHandler;

use super::page_reference::PageReference;

/// Outcome of a guarded lock attempt.
#[must_use = "a queued attempt means the operation must park"]
pub enum LockAttempt<'a> {
    /// The lock was free and is now held.
    Acquired(PageLockGuard<'a>),
    /// The handler already held the lock.
    Reentrant(PageLockGuard<'a>),
    /// The lock is held elsewhere and the handler was queued on its owner.
    Queued,
}

impl<'a> LockAttempt<'a> {
    #[inline]
    pub fn is_queued(&self) -> bool {
        matches!(self, LockAttempt::Queued)
    }

    /// The guard, or `None` when queued.
    pub fn into_guard(self) -> Option<PageLockGuard<'a>> {
        match self {
            LockAttempt::Acquired(guard) | LockAttempt::Reentrant(guard) => Some(guard),
            LockAttempt::Queued => None,
        }
    }
}

/// Guard for a locked page reference.
///
/// Dereferences to the [`PageReference`]. Dropping it unlocks the reference
/// (waking the owner's waiters) only when this guard did the acquiring.
///
/// # Example
/// ```
/// use handoffdb::btree::PageReference;
/// use handoffdb::handler::HandlerRegistry;
///
/// let (registry, _inboxes) = HandlerRegistry::new(1, "h");
/// let handlers = registry.handlers();
/// let handler = &handlers[0];
/// let reference = PageReference::new();
///
/// if let Some(guard) = reference.try_acquire(handler).into_guard() {
///     guard.set_data_structure_changed(true);
/// } // unlocked here
/// assert!(!reference.is_locked());
/// ```
pub struct PageLockGuard<'a> {
    reference: &'a PageReference,
    handler: &'a PageOperationHandler,
    release: bool,
}

impl<'a> PageLockGuard<'a> {
    /// Called by `PageReference::try_acquire()`.
    pub(crate) fn new(
        reference: &'a PageReference,
        handler: &'a PageOperationHandler,
        release: bool,
    ) -> Self {
        Self {
            reference,
            handler,
            release,
        }
    }

    /// The handler holding the lock.
    #[inline]
    pub fn handler(&self) -> &PageOperationHandler {
        self.handler
    }

    /// Whether this guard nests inside an outer acquisition.
    #[inline]
    pub fn is_reentrant(&self) -> bool {
        !self.release
    }
}

impl Deref for PageLockGuard<'_> {
    type Target = PageReference;

    #[inline]
    fn deref(&self) -> &PageReference {
        self.reference
    }
}

impl Drop for PageLockGuard<'_> {
    fn drop(&mut self) {
        if self.release {
            self.reference.unlock(self.handler);
        }
    }
}
