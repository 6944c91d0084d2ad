//! Common types and utilities shared across HandoffDB.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and runtime config
//! - Error types
//! - Identifiers (PagePosition, HandlerId, SessionId, TransactionId)

pub mod config;
pub mod error;
mod ids;
mod page_position;

pub use error::{Error, Result};
pub use ids::{HandlerId, HandlerKey, SessionId, TransactionId};
pub use page_position::{is_leaf_page, is_node_page, PageKind, PagePosition};
