//! Cached child shapes for traversals.
//!
//! A traversal that keeps boundary keys of children between steps must drop
//! them once the child's data-structure-changed flag is raised.
//! [`ShapeCache`] consumes the flag on every lookup and re-derives the shape
//! when it was set.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::common::Result;
use crate::storage::PageStore;

use super::page::Page;
use super::page_reference::PageReference;

/// Key count and boundary keys of a child page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildShape {
    pub key_count: usize,
    pub first_key: Option<Vec<u8>>,
    pub last_key: Option<Vec<u8>>,
}

impl ChildShape {
    pub fn of(page: &Page) -> Self {
        Self {
            key_count: page.key_count(),
            first_key: page.first_key().map(<[u8]>::to_vec),
            last_key: page.last_key().map(<[u8]>::to_vec),
        }
    }
}

/// Per-traversal cache of child shapes, keyed by reference identity.
#[derive(Default)]
pub struct ShapeCache {
    // Holding the Arc keeps the address from being reused by another reference.
    entries: HashMap<usize, (Arc<PageReference>, ChildShape)>,
    hits: u64,
    derivations: u64,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape of the child behind `reference`.
    ///
    /// Served from the cache unless the reference's data-structure-changed
    /// flag is set; reading the flag clears it. If loading the page fails
    /// the flag is raised again so the next lookup retries.
    pub fn shape_of(
        &mut self,
        reference: &Arc<PageReference>,
        store: &dyn PageStore,
    ) -> Result<ChildShape> {
        let key = Arc::as_ptr(reference) as usize;
        let changed = reference.take_data_structure_changed();

        if !changed {
            if let Some((_, shape)) = self.entries.get(&key) {
                self.hits += 1;
                return Ok(shape.clone());
            }
        } else {
            trace!(pos = %reference.pos(), "child shape invalidated");
        }

        let page = match reference.get_or_read_page(store) {
            Ok(page) => page,
            Err(e) => {
                self.entries.remove(&key);
                if changed {
                    reference.set_data_structure_changed(true);
                }
                return Err(e);
            }
        };

        let shape = ChildShape::of(&page);
        self.derivations += 1;
        self.entries
            .insert(key, (Arc::clone(reference), shape.clone()));
        Ok(shape)
    }

    /// Forget the shape of `reference`.
    pub fn invalidate(&mut self, reference: &Arc<PageReference>) {
        self.entries.remove(&(Arc::as_ptr(reference) as usize));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that derived the shape from the page.
    pub fn derivations(&self) -> u64 {
        self.derivations
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
