//! The handler pool: one worker thread per handler.
//!
//! Each worker drains a private FIFO run queue. An operation that cannot
//! get a lock is moved to the worker's parked list and stays there until a
//! `Wake` arrives, at which point every parked operation goes back to the
//! end of the run queue. Contention never blocks a worker thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::btree::PageReference;
use crate::common::config::{SchedulerConfig, DEFAULT_CONTENTION_WARN_THRESHOLD};
use crate::common::{Error, HandlerId, Result};

use super::handler::{HandlerMessage, HandlerRegistry, PageOperationHandler};
use super::operation::{OperationHandle, OperationStatus, PageOperation, WriteOperation};
use super::stats::HandlerStatsSnapshot;

struct QueuedOperation {
    op: Box<dyn PageOperation>,
    parks: u32,
}

/// Event loop of one handler.
///
/// Normally owned by a scheduler thread via [`HandlerWorker::run`]. It can
/// also be driven by hand with [`HandlerWorker::poll`], which is how the
/// lock handoff is exercised deterministically in tests.
pub struct HandlerWorker {
    handler: PageOperationHandler,
    inbox: Receiver<HandlerMessage>,
    run_queue: VecDeque<QueuedOperation>,
    parked: Vec<QueuedOperation>,
    contention_warn_threshold: u32,
    shutdown: bool,
}

impl HandlerWorker {
    /// Create a worker for `handler`, consuming its inbox.
    pub fn new(handler: PageOperationHandler, inbox: Receiver<HandlerMessage>) -> Self {
        Self {
            handler,
            inbox,
            run_queue: VecDeque::new(),
            parked: Vec::new(),
            contention_warn_threshold: DEFAULT_CONTENTION_WARN_THRESHOLD,
            shutdown: false,
        }
    }

    /// Set the park count after which an operation is logged as starving.
    pub fn with_contention_warn_threshold(mut self, threshold: u32) -> Self {
        self.contention_warn_threshold = threshold;
        self
    }

    /// The handler this worker drives.
    pub fn handler(&self) -> &PageOperationHandler {
        &self.handler
    }

    /// Operations waiting to run.
    pub fn queued_count(&self) -> usize {
        self.run_queue.len()
    }

    /// Operations waiting for a wake.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Whether a `Shutdown` message was received.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    /// Run until shutdown or until every inbox sender is gone.
    pub fn run(mut self) {
        debug!(handler = %self.handler.id(), "handler worker started");
        while !self.shutdown {
            if self.run_queue.is_empty() {
                match self.inbox.recv() {
                    Ok(msg) => self.accept(msg),
                    Err(_) => break,
                }
            }
            self.drain_inbox();
            if self.shutdown {
                break;
            }
            self.run_next();
        }
        self.discard_remaining();
        debug!(handler = %self.handler.id(), "handler worker stopped");
    }

    /// Process everything currently available without blocking.
    ///
    /// Drains the inbox, then runs each operation that was queued at that
    /// point once. Returns the number of operations run.
    pub fn poll(&mut self) -> usize {
        self.drain_inbox();
        if self.shutdown {
            self.discard_remaining();
            return 0;
        }
        let n = self.run_queue.len();
        for _ in 0..n {
            self.run_next();
        }
        n
    }

    fn drain_inbox(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(msg) => self.accept(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn accept(&mut self, msg: HandlerMessage) {
        match msg {
            HandlerMessage::Run(op) => {
                trace!(handler = %self.handler.id(), op = op.name(), "operation queued");
                self.run_queue.push_back(QueuedOperation { op, parks: 0 });
            }
            HandlerMessage::Wake => {
                // Clear first so a release racing with this wake sends a new one.
                self.handler.clear_wake_pending();
                let resumed = self.parked.len();
                self.run_queue.extend(self.parked.drain(..));
                trace!(handler = %self.handler.id(), resumed, "handler woken");
            }
            HandlerMessage::Shutdown => self.shutdown = true,
        }
    }

    fn run_next(&mut self) {
        let Some(mut queued) = self.run_queue.pop_front() else {
            return;
        };

        self.handler
            .stats()
            .operations_run
            .fetch_add(1, Ordering::Relaxed);

        let handler = &self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| queued.op.run(handler)));

        match outcome {
            Ok(OperationStatus::Completed) => {
                handler
                    .stats()
                    .operations_completed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Ok(OperationStatus::Yield) => self.run_queue.push_back(queued),
            Ok(OperationStatus::Parked) => {
                queued.parks += 1;
                handler
                    .stats()
                    .operations_parked
                    .fetch_add(1, Ordering::Relaxed);
                if queued.parks == self.contention_warn_threshold {
                    warn!(
                        handler = %handler.id(),
                        op = queued.op.name(),
                        parks = queued.parks,
                        "page operation keeps losing lock races"
                    );
                }
                self.parked.push(queued);
            }
            Err(_) => {
                // Lock guards inside the operation were released during unwinding.
                error!(handler = %handler.id(), op = queued.op.name(), "page operation panicked");
            }
        }
    }

    fn discard_remaining(&mut self) {
        let dropped = self.run_queue.len() + self.parked.len();
        if dropped > 0 {
            warn!(handler = %self.handler.id(), dropped, "discarding unfinished page operations");
        }
        self.run_queue.clear();
        self.parked.clear();
    }
}

/// A fixed pool of page-operation handlers.
///
/// Built once at startup and shared by reference with everything that
/// submits B-tree work; there is no process-wide instance.
///
/// # Ordering
/// Operations submitted to the same handler start in submission order.
/// Across handlers, only the page locks order anything.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use handoffdb::btree::{Page, PageReference};
/// use handoffdb::common::config::SchedulerConfig;
/// use handoffdb::handler::PageOperationScheduler;
///
/// let scheduler = PageOperationScheduler::new(SchedulerConfig::default().with_handler_count(2)).unwrap();
/// let leaf = Arc::new(PageReference::from_page(Page::new_leaf(vec![], vec![])));
///
/// let handle = scheduler
///     .execute_write(vec![leaf.clone()], |_, refs| {
///         let page = Page::new_leaf(vec![b"k".to_vec()], vec![b"v".to_vec()]);
///         refs[0].replace_page(page);
///         Ok(())
///     })
///     .unwrap();
/// handle.wait().unwrap();
/// assert_eq!(leaf.memory_page().unwrap().key_count(), 1);
/// ```
pub struct PageOperationScheduler {
    registry: Arc<HandlerRegistry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    shut_down: AtomicBool,
    config: SchedulerConfig,
}

impl PageOperationScheduler {
    /// Start `config.handler_count` handler threads.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `config.handler_count` is 0
    /// - I/O error if a worker thread cannot be spawned; already started
    ///   workers are stopped again
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if config.handler_count == 0 {
            return Err(Error::InvalidConfig(
                "handler_count must be > 0".to_string(),
            ));
        }
        let (registry, inboxes) =
            HandlerRegistry::new(config.handler_count, &config.thread_name_prefix);

        let scheduler = Self {
            registry: Arc::clone(&registry),
            workers: Mutex::new(Vec::with_capacity(config.handler_count)),
            next: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            config,
        };

        for (handler, inbox) in registry.handlers().into_iter().zip(inboxes) {
            let name = handler.name().to_string();
            let worker = HandlerWorker::new(handler, inbox)
                .with_contention_warn_threshold(scheduler.config.contention_warn_threshold);
            let spawned = thread::Builder::new().name(name).spawn(move || worker.run());
            match spawned {
                Ok(join) => scheduler.workers.lock().push(join),
                Err(e) => {
                    scheduler.shutdown();
                    return Err(Error::Io(e));
                }
            }
        }

        debug!(handlers = scheduler.config.handler_count, "page operation scheduler started");
        Ok(scheduler)
    }

    /// Number of handlers in the pool.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Handle for the handler with `id`.
    pub fn handler(&self, id: HandlerId) -> Option<PageOperationHandler> {
        self.registry.handler(id)
    }

    /// The configuration the pool was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submit to the next handler in round-robin order.
    ///
    /// Returns the handler the operation went to.
    pub fn submit(&self, op: impl PageOperation + 'static) -> Result<HandlerId> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.registry.len();
        let id = HandlerId::new(index as u32);
        self.submit_to(id, op)?;
        Ok(id)
    }

    /// Submit to a specific handler.
    ///
    /// # Errors
    /// `Error::SchedulerShutdown` after shutdown or for an unknown handler.
    pub fn submit_to(&self, id: HandlerId, op: impl PageOperation + 'static) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::SchedulerShutdown);
        }
        let handler = self.registry.handler(id).ok_or(Error::SchedulerShutdown)?;
        handler.submit(Box::new(op))
    }

    /// Lock `refs` in order, run `action` under the locks, and return a
    /// handle to its result. See [`WriteOperation`].
    pub fn execute_write<T, F>(
        &self,
        refs: Vec<Arc<PageReference>>,
        action: F,
    ) -> Result<OperationHandle<T>>
    where
        T: Send + 'static,
        F: FnMut(&PageOperationHandler, &[Arc<PageReference>]) -> Result<T> + Send + 'static,
    {
        let (op, handle) = WriteOperation::new(refs, action);
        self.submit(op)?;
        Ok(handle)
    }

    /// Per-handler statistics, in handler order.
    pub fn stats_snapshot(&self) -> Vec<HandlerStatsSnapshot> {
        self.registry
            .handlers()
            .iter()
            .map(|h| h.stats().snapshot())
            .collect()
    }

    /// Statistics summed over all handlers.
    pub fn total_stats(&self) -> HandlerStatsSnapshot {
        self.stats_snapshot()
            .into_iter()
            .fold(HandlerStatsSnapshot::default(), HandlerStatsSnapshot::merge)
    }

    /// Stop every worker and wait for the threads to exit.
    ///
    /// Unfinished operations are dropped; their handles report
    /// `Error::OperationDropped`. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for handler in self.registry.handlers() {
            if !handler.send_shutdown() {
                warn!(handler = %handler.id(), "handler worker already gone");
            }
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                error!("handler worker thread panicked");
            }
        }
        debug!("page operation scheduler stopped");
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for PageOperationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
