//! Storage layer - page stores and the record format.
//!
//! This module handles persistent storage:
//! - [`PageStore`] - The load/write interface the page layer consumes
//! - [`MemoryPageStore`] / [`FilePageStore`] - Implementations
//! - [`RecordHeader`] - Header in front of every stored page

mod file_store;
mod page_store;
mod record;

pub use file_store::FilePageStore;
pub use page_store::{MemoryPageStore, PageStore};
pub use record::RecordHeader;
