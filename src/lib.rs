//! HandoffDB - B-tree page locking with handler-to-handler lock handoff.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           HandoffDB                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Row Locks (lock/)                           │   │
//! │  │   RowLock + LockOwner + FIFO handoff + MVCC old value    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Handler Pool (handler/)                        │   │
//! │  │   PageOperationScheduler → HandlerWorker (one thread)    │   │
//! │  │   park on contention, wake on release                    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Page Layer (btree/)                            │   │
//! │  │   PageReference (lock + flag) → Page (immutable)         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │     PageStore: MemoryPageStore | FilePageStore           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PagePosition, HandlerId, Error, config)
//! - [`storage`] - Copy-on-write page stores and the record format
//! - [`btree`] - Pages, page references and their lock protocol
//! - [`handler`] - Page-operation handlers and the scheduler
//! - [`lock`] - Transactional row locks
//!
//! # Quick Start
//! ```
//! use std::sync::Arc;
//! use handoffdb::btree::{Page, PageReference};
//! use handoffdb::common::config::SchedulerConfig;
//! use handoffdb::handler::PageOperationScheduler;
//! use handoffdb::storage::MemoryPageStore;
//!
//! let store = MemoryPageStore::new();
//! let scheduler = PageOperationScheduler::new(SchedulerConfig::default()).unwrap();
//! let root = Arc::new(PageReference::from_page(Page::new_leaf(vec![], vec![])));
//!
//! let handle = scheduler
//!     .execute_write(vec![root.clone()], |_, refs| {
//!         refs[0].replace_page(Page::new_leaf(vec![b"k".to_vec()], vec![b"v".to_vec()]));
//!         Ok(())
//!     })
//!     .unwrap();
//! handle.wait().unwrap();
//!
//! let pos = root.save(&store).unwrap();
//! assert!(handoffdb::is_leaf_page(pos));
//! ```

pub mod btree;
pub mod common;
pub mod handler;
pub mod lock;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{is_leaf_page, is_node_page, Error, HandlerId, HandlerKey, PageKind, PagePosition, Result};

pub use btree::{LockAttempt, Page, PageLockGuard, PageReference};
pub use handler::{
    HandlerStats, HandlerStatsSnapshot, PageOperation, PageOperationHandler,
    PageOperationScheduler,
};
pub use storage::{FilePageStore, MemoryPageStore, PageStore};
