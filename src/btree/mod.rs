//! B-tree page layer.
//!
//! Pages are immutable and replaced wholesale; concurrency is coordinated on
//! the references that point at them.
//!
//! # Components
//! - [`Page`] - A leaf or internal node with a write-once position
//! - [`PageReference`] - A parent's slot for a child, with the handler lock
//!   and the data-structure-changed flag
//! - [`PageLockGuard`] / [`LockAttempt`] - RAII access to the handler lock
//! - [`ShapeCache`] - Child boundary keys cached across a traversal

mod codec;
mod lock_guard;
mod page;
mod page_reference;
mod shape;

pub use lock_guard::{LockAttempt, PageLockGuard};
pub use page::{Page, PageContent};
pub use page_reference::{PageReference, PageState};
pub use shape::{ChildShape, ShapeCache};
