//! Page-operation handlers and the table that connects them.
//!
//! A [`PageOperationHandler`] is one scheduling context of the fixed pool.
//! Besides running operations it is the unit of lock ownership: a page
//! reference is locked *by a handler*, and handlers that lose the race
//! register on the winner's wait-list instead of on the reference.
//!
//! ```text
//!   HandlerRegistry (fixed, shared by every handler)
//!   ┌───────────────┬───────────────┬───────────────┐
//!   │ slot 0        │ slot 1        │ slot 2        │
//!   │ wait-list ────┼─▶ [1, 2]      │               │
//!   │ inbox (tx)    │ inbox (tx)    │ inbox (tx)    │
//!   └───────────────┴───────────────┴───────────────┘
//! ```
//!
//! Releasing a lock drains the former owner's wait-list and drops a
//! [`HandlerMessage::Wake`] into each waiter's inbox. Waiters then retry
//! their own `try_lock`; nobody blocks a thread.
//!
//! Every registry gets a process-unique id, so a [`HandlerKey`] names one
//! handler across all pools. Keys of other registries are resolved through
//! a process-wide directory of live registries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::common::{Error, HandlerId, HandlerKey, Result};

use super::operation::PageOperation;
use super::stats::HandlerStats;

/// Message delivered to a handler's inbox.
pub enum HandlerMessage {
    /// Run a newly submitted operation.
    Run(Box<dyn PageOperation>),
    /// A lock this handler waited for was released: retry parked operations.
    Wake,
    /// Stop the worker loop.
    Shutdown,
}

impl fmt::Debug for HandlerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerMessage::Run(op) => write!(f, "Run({})", op.name()),
            HandlerMessage::Wake => write!(f, "Wake"),
            HandlerMessage::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Shared state of one handler.
struct HandlerSlot {
    name: String,
    /// Handlers blocked on a lock this handler holds.
    waiting: SegQueue<HandlerKey>,
    /// Set while a `Wake` sits unprocessed in `inbox`.
    wake_pending: AtomicBool,
    inbox: Sender<HandlerMessage>,
    stats: HandlerStats,
}

static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(0);

/// Live registries by id. Holds weak entries only; a registry removes
/// itself when dropped.
static DIRECTORY: RwLock<BTreeMap<u32, Weak<HandlerRegistry>>> =
    parking_lot::const_rwlock(BTreeMap::new());

/// Fixed table of handlers, keyed by [`HandlerId`].
///
/// The registry owns each handler's wait-list and inbox sender. Handler
/// handles reach their peers through it, so a lock slot only has to store
/// a packed [`HandlerKey`].
pub struct HandlerRegistry {
    id: u32,
    slots: Vec<HandlerSlot>,
}

impl HandlerRegistry {
    /// Build a registry with `count` handlers named `{prefix}{index}`.
    ///
    /// Returns the inbox receivers in handler order; whoever drives the
    /// handlers (normally a [`HandlerWorker`](super::HandlerWorker)) owns them.
    ///
    /// # Panics
    /// Panics if `count` is 0. [`PageOperationScheduler::new`] checks this
    /// first and returns an error instead.
    ///
    /// [`PageOperationScheduler::new`]: super::PageOperationScheduler::new
    pub fn new(count: usize, prefix: &str) -> (Arc<Self>, Vec<Receiver<HandlerMessage>>) {
        assert!(count > 0, "handler count must be > 0");
        let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);

        let mut slots = Vec::with_capacity(count);
        let mut inboxes = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = channel::unbounded();
            slots.push(HandlerSlot {
                name: format!("{}{}", prefix, index),
                waiting: SegQueue::new(),
                wake_pending: AtomicBool::new(false),
                inbox: tx,
                stats: HandlerStats::new(),
            });
            inboxes.push(rx);
        }

        let registry = Arc::new(Self { id, slots });
        DIRECTORY.write().insert(id, Arc::downgrade(&registry));
        (registry, inboxes)
    }

    /// Process-unique id of this registry.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Key of this registry's handler `handler`.
    #[inline]
    pub fn key_of(&self, handler: HandlerId) -> HandlerKey {
        HandlerKey::new(self.id, handler)
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false: a registry has at least one handler.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handle for the handler named by `key`, in whichever live registry
    /// it belongs to.
    pub fn resolve(self: &Arc<Self>, key: HandlerKey) -> Option<PageOperationHandler> {
        if key.registry == self.id {
            return self.handler(key.handler);
        }
        // Upgrade outside the directory lock: dropping the last strong
        // reference runs `Drop`, which takes the write lock.
        let weak = DIRECTORY.read().get(&key.registry).cloned()?;
        weak.upgrade()?.handler(key.handler)
    }

    /// Handle for the handler with `id`, if it exists.
    pub fn handler(self: &Arc<Self>, id: HandlerId) -> Option<PageOperationHandler> {
        if id.is_valid() && id.index() < self.slots.len() {
            Some(PageOperationHandler {
                id,
                registry: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Handles for every handler, in id order.
    pub fn handlers(self: &Arc<Self>) -> Vec<PageOperationHandler> {
        (0..self.slots.len() as u32)
            .map(|i| PageOperationHandler {
                id: HandlerId::new(i),
                registry: Arc::clone(self),
            })
            .collect()
    }

    #[inline]
    fn slot(&self, id: HandlerId) -> &HandlerSlot {
        &self.slots[id.index()]
    }
}

impl Drop for HandlerRegistry {
    fn drop(&mut self) {
        DIRECTORY.write().remove(&self.id);
    }
}

/// Handle to one handler of a [`HandlerRegistry`].
///
/// Cheap to clone. Two handles are equal when they name the same handler
/// of the same registry, that is when their [`key`](Self::key)s match.
#[derive(Clone)]
pub struct PageOperationHandler {
    id: HandlerId,
    registry: Arc<HandlerRegistry>,
}

impl PageOperationHandler {
    /// Identity of this handler.
    #[inline]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Process-wide identity, the value page references lock with.
    #[inline]
    pub fn key(&self) -> HandlerKey {
        self.registry.key_of(self.id)
    }

    /// Human-readable name (also the worker thread name).
    pub fn name(&self) -> &str {
        &self.slot().name
    }

    /// Statistics of this handler.
    pub fn stats(&self) -> &HandlerStats {
        &self.slot().stats
    }

    /// The registry this handler belongs to.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Handle for the handler named by `key`, possibly of another pool.
    ///
    /// `None` if the key names no live handler.
    pub fn resolve(&self, key: HandlerKey) -> Option<PageOperationHandler> {
        self.registry.resolve(key)
    }

    /// Register `other` as blocked on a lock this handler holds.
    ///
    /// `other` may belong to any registry. Safe to call from any number of
    /// handlers at once.
    pub fn add_waiting_handler(&self, other: &PageOperationHandler) {
        let other = other.key();
        let slot = self.slot();
        slot.waiting.push(other);
        slot.stats.lock_waits.fetch_add(1, Ordering::Relaxed);
        // Pairs with the fence in `wake_up_waiting_handlers`: either the
        // waiter's re-read of the lock sees the release, or the drain sees
        // the registration.
        fence(Ordering::SeqCst);
        trace!(owner = %self.key(), waiter = %other, "handler registered as waiter");
    }

    /// Drain the wait-list and send a wake to every waiter.
    ///
    /// A waiter whose previous wake has not been processed yet is skipped:
    /// that pending wake already covers everything it has parked.
    /// Returns the number of wake messages sent.
    pub fn wake_up_waiting_handlers(&self) -> usize {
        fence(Ordering::SeqCst);

        let slot = self.slot();
        let mut sent = 0;
        while let Some(waiter) = slot.waiting.pop() {
            let woken = if waiter.registry == self.registry.id {
                self.registry.wake(waiter.handler)
            } else {
                match self.registry.resolve(waiter) {
                    Some(handler) => handler.registry.wake(handler.id),
                    None => {
                        warn!(owner = %self.key(), waiter = %waiter, "waiter's pool is gone");
                        false
                    }
                }
            };
            if woken {
                sent += 1;
            }
        }
        if sent > 0 {
            slot.stats.wakeups_sent.fetch_add(sent as u64, Ordering::Relaxed);
            trace!(owner = %self.key(), woken = sent, "woke waiting handlers");
        }
        sent
    }

    /// Number of handlers currently registered on this handler's wait-list.
    pub fn waiting_handler_count(&self) -> usize {
        self.slot().waiting.len()
    }

    /// Queue an operation on this handler.
    ///
    /// # Errors
    /// `Error::SchedulerShutdown` if the handler's worker has gone away.
    pub fn submit(&self, op: Box<dyn PageOperation>) -> Result<()> {
        self.slot()
            .inbox
            .send(HandlerMessage::Run(op))
            .map_err(|_| Error::SchedulerShutdown)
    }

    /// Ask this handler's worker to stop.
    pub(crate) fn send_shutdown(&self) -> bool {
        self.slot().inbox.send(HandlerMessage::Shutdown).is_ok()
    }

    /// Called by the worker when it picks a `Wake` out of its inbox.
    pub(crate) fn clear_wake_pending(&self) {
        let slot = self.slot();
        slot.wake_pending.store(false, Ordering::SeqCst);
        slot.stats.wakeups_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn slot(&self) -> &HandlerSlot {
        self.registry.slot(self.id)
    }
}

impl HandlerRegistry {
    /// Deliver one wake to `id` unless one is already in flight.
    fn wake(&self, id: HandlerId) -> bool {
        let Some(slot) = self.slots.get(id.index()) else {
            return false;
        };
        if slot.wake_pending.swap(true, Ordering::SeqCst) {
            return false;
        }
        if slot.inbox.send(HandlerMessage::Wake).is_err() {
            // Worker is gone; nothing left to retry.
            slot.wake_pending.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }
}

impl PartialEq for PageOperationHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for PageOperationHandler {}

impl fmt::Debug for PageOperationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageOperationHandler")
            .field("key", &self.key())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::OperationStatus;

    fn registry(count: usize) -> (Arc<HandlerRegistry>, Vec<Receiver<HandlerMessage>>) {
        HandlerRegistry::new(count, "test-handler-")
    }

    #[test]
    fn test_registry_handlers() {
        let (registry, inboxes) = registry(3);
        assert_eq!(registry.len(), 3);
        assert_eq!(inboxes.len(), 3);

        let handlers = registry.handlers();
        assert_eq!(handlers[2].id(), HandlerId::new(2));
        assert_eq!(handlers[2].name(), "test-handler-2");
        assert!(registry.handler(HandlerId::new(3)).is_none());
        assert!(registry.handler(HandlerId::NONE).is_none());
    }

    #[test]
    fn test_wake_drains_wait_list() {
        let (registry, inboxes) = registry(3);
        let h0 = registry.handler(HandlerId::new(0)).unwrap();

        let handlers = registry.handlers();
        h0.add_waiting_handler(&handlers[1]);
        h0.add_waiting_handler(&handlers[2]);
        assert_eq!(h0.waiting_handler_count(), 2);

        assert_eq!(h0.wake_up_waiting_handlers(), 2);
        assert_eq!(h0.waiting_handler_count(), 0);

        assert!(matches!(inboxes[1].try_recv(), Ok(HandlerMessage::Wake)));
        assert!(matches!(inboxes[2].try_recv(), Ok(HandlerMessage::Wake)));
        assert!(inboxes[0].try_recv().is_err());

        let stats = h0.stats().snapshot();
        assert_eq!(stats.lock_waits, 2);
        assert_eq!(stats.wakeups_sent, 2);
    }

    #[test]
    fn test_wake_is_idempotent_while_pending() {
        let (registry, inboxes) = registry(2);
        let h0 = registry.handler(HandlerId::new(0)).unwrap();
        let h1 = registry.handler(HandlerId::new(1)).unwrap();

        // Registered twice, woken once.
        h0.add_waiting_handler(&h1);
        h0.add_waiting_handler(&h1);
        assert_eq!(h0.wake_up_waiting_handlers(), 1);
        assert_eq!(inboxes[1].len(), 1);

        // A second round while the first wake is unprocessed adds nothing.
        h0.add_waiting_handler(&h1);
        assert_eq!(h0.wake_up_waiting_handlers(), 0);
        assert_eq!(inboxes[1].len(), 1);

        // Once processed, the next wake goes through again.
        assert!(matches!(inboxes[1].try_recv(), Ok(HandlerMessage::Wake)));
        h1.clear_wake_pending();
        h0.add_waiting_handler(&h1);
        assert_eq!(h0.wake_up_waiting_handlers(), 1);
    }

    #[test]
    fn test_concurrent_registration() {
        use std::thread;

        let (registry, _inboxes) = registry(8);
        let owner = registry.handler(HandlerId::new(0)).unwrap();

        let mut handles = vec![];
        for waiter in registry.handlers().into_iter().skip(1) {
            let owner = owner.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    owner.add_waiting_handler(&waiter);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(owner.waiting_handler_count(), 700);
        // Seven distinct waiters, one wake each.
        assert_eq!(owner.wake_up_waiting_handlers(), 7);
    }

    #[test]
    fn test_submit_after_inbox_dropped() {
        let (registry, inboxes) = registry(1);
        drop(inboxes);
        let handler = registry.handler(HandlerId::new(0)).unwrap();

        let op = Box::new(|_: &PageOperationHandler| OperationStatus::Completed);
        assert!(matches!(handler.submit(op), Err(Error::SchedulerShutdown)));
    }

    #[test]
    fn test_handler_equality() {
        let (a, _ia) = registry(2);
        let (b, _ib) = registry(2);

        let a0 = a.handler(HandlerId::new(0)).unwrap();
        let b0 = b.handler(HandlerId::new(0)).unwrap();
        assert_eq!(a0, a.handler(HandlerId::new(0)).unwrap());
        assert_ne!(a0, a.handler(HandlerId::new(1)).unwrap());
        assert_ne!(a0, b0);
        assert_ne!(a0.key(), b0.key());
        assert!(Arc::ptr_eq(a0.registry(), &a));
    }

    #[test]
    fn test_resolve_across_registries() {
        let (a, _ia) = registry(1);
        let (b, _ib) = registry(4);
        let a0 = a.handler(HandlerId::new(0)).unwrap();
        let b3 = b.handler(HandlerId::new(3)).unwrap();

        assert_eq!(a0.resolve(b3.key()), Some(b3.clone()));
        assert_eq!(b3.resolve(a0.key()), Some(a0.clone()));
        // Index 3 exists in b but not in a.
        assert!(a0.resolve(a.key_of(HandlerId::new(3))).is_none());
        assert!(a0.resolve(HandlerKey::NONE).is_none());

        let gone = b3.key();
        drop(b3);
        drop(b);
        assert!(a0.resolve(gone).is_none());
    }

    #[test]
    fn test_wake_crosses_registries() {
        let (a, _ia) = registry(1);
        let (b, ib) = registry(2);
        let a0 = a.handler(HandlerId::new(0)).unwrap();
        let b1 = b.handler(HandlerId::new(1)).unwrap();

        a0.add_waiting_handler(&b1);
        assert_eq!(a0.wake_up_waiting_handlers(), 1);
        assert!(matches!(ib[1].try_recv(), Ok(HandlerMessage::Wake)));
        assert!(ib[0].try_recv().is_err());
    }
}
