//! Page-operation handlers.
//!
//! A fixed pool of handlers runs B-tree page operations. Lock contention
//! between them is turned into messages: a handler that loses a lock race
//! parks its operation and is woken by the holder on release.
//!
//! # Components
//! - [`PageOperationHandler`] - One scheduling context; owns a wait-list
//! - [`HandlerRegistry`] - The fixed table of handlers
//! - [`PageOperation`] / [`WriteOperation`] - Units of work
//! - [`HandlerWorker`] - Event loop of one handler
//! - [`PageOperationScheduler`] - The thread pool
//! - [`HandlerStats`] - Per-handler counters

#[allow(clippy::module_inception)]
mod handler;
mod operation;
mod scheduler;
mod stats;

pub use handler::{HandlerMessage, HandlerRegistry, PageOperationHandler};
pub use operation::{OperationHandle, OperationStatus, PageOperation, WriteOperation};
pub use scheduler::{HandlerWorker, PageOperationScheduler};
pub use stats::{HandlerStats, HandlerStatsSnapshot};
