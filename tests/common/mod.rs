//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;

use handoffdb::btree::Page;

static TRACING: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default: warn).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Leaf whose values are the keys upper-cased.
pub fn leaf(keys: &[&str]) -> Arc<Page> {
    Page::new_leaf(
        keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
        keys.iter().map(|k| k.to_uppercase().into_bytes()).collect(),
    )
}

/// Leaf with keys `0..n` encoded big-endian, so byte order matches numeric order.
pub fn numbered_leaf(range: std::ops::Range<u32>) -> Arc<Page> {
    let keys: Vec<Vec<u8>> = range.map(|i| i.to_be_bytes().to_vec()).collect();
    let values = keys.clone();
    Page::new_leaf(keys, values)
}
