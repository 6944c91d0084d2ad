//! Page - one node of the B-tree.
//!
//! A [`Page`] is immutable once published. Inserts, splits and merges build
//! a new page and install it with [`PageReference::replace_page`]; the old
//! page is marked detached. A reader that captured the old page keeps a
//! consistent snapshot of it for as long as it holds the `Arc`.
//!
//! The only interior state is write-once: the position assigned by the
//! first save and the detached mark.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::common::{Error, PageKind, PagePosition, Result};
use crate::storage::PageStore;

use super::codec::{self, DecodedPage};
use super::page_reference::PageReference;

/// Entries of a page.
pub enum PageContent {
    /// Sorted keys with one value per key.
    Leaf {
        keys: Vec<Vec<u8>>,
        values: Vec<Vec<u8>>,
    },
    /// Separator keys with `keys.len() + 1` children.
    Node {
        keys: Vec<Vec<u8>>,
        children: Vec<Arc<PageReference>>,
    },
}

/// A B-tree page, leaf or internal.
///
/// # Example
/// ```
/// use handoffdb::btree::Page;
/// use handoffdb::common::PagePosition;
///
/// let page = Page::new_leaf(vec![b"a".to_vec()], vec![b"1".to_vec()]);
/// assert!(page.is_leaf());
/// assert_eq!(page.pos(), PagePosition::UNSAVED);
/// assert_eq!(page.first_key(), Some(&b"a"[..]));
/// ```
pub struct Page {
    content: PageContent,
    pos: AtomicU64,
    detached: AtomicBool,
}

impl Page {
    /// Create an unsaved leaf page.
    ///
    /// # Panics
    /// Panics if `keys` and `values` differ in length.
    pub fn new_leaf(keys: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Arc<Page> {
        assert_eq!(keys.len(), values.len(), "leaf needs one value per key");
        Self::with_content(PageContent::Leaf { keys, values }, PagePosition::UNSAVED)
    }

    /// Create an unsaved internal page.
    ///
    /// # Panics
    /// Panics unless there is exactly one more child than keys.
    pub fn new_node(keys: Vec<Vec<u8>>, children: Vec<Arc<PageReference>>) -> Arc<Page> {
        assert_eq!(
            children.len(),
            keys.len() + 1,
            "node needs one more child than keys"
        );
        Self::with_content(PageContent::Node { keys, children }, PagePosition::UNSAVED)
    }

    fn with_content(content: PageContent, pos: PagePosition) -> Arc<Page> {
        Arc::new(Page {
            content,
            pos: AtomicU64::new(pos.0),
            detached: AtomicBool::new(false),
        })
    }

    /// Parse the payload read from `pos`.
    ///
    /// Children of a node come back as unresolved references; nothing
    /// below this page is loaded.
    pub(crate) fn decode(pos: PagePosition, data: &[u8]) -> Result<Arc<Page>> {
        let content = match codec::decode(pos, data)? {
            DecodedPage::Leaf { keys, values } => PageContent::Leaf { keys, values },
            DecodedPage::Node { keys, children } => PageContent::Node {
                keys,
                children: children
                    .into_iter()
                    .map(|child| Arc::new(PageReference::from_pos(child)))
                    .collect(),
            },
        };
        Ok(Self::with_content(content, pos))
    }

    // ========================================================================
    // Shape
    // ========================================================================

    /// Leaf or node.
    #[inline]
    pub fn kind(&self) -> PageKind {
        match self.content {
            PageContent::Leaf { .. } => PageKind::Leaf,
            PageContent::Node { .. } => PageKind::Node,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.kind() == PageKind::Leaf
    }

    #[inline]
    pub fn is_node(&self) -> bool {
        self.kind() == PageKind::Node
    }

    /// Position of this page, `UNSAVED` until its first save.
    #[inline]
    pub fn pos(&self) -> PagePosition {
        PagePosition(self.pos.load(Ordering::Acquire))
    }

    pub fn content(&self) -> &PageContent {
        &self.content
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        match &self.content {
            PageContent::Leaf { keys, .. } | PageContent::Node { keys, .. } => keys,
        }
    }

    #[inline]
    pub fn key_count(&self) -> usize {
        self.keys().len()
    }

    pub fn first_key(&self) -> Option<&[u8]> {
        self.keys().first().map(Vec::as_slice)
    }

    pub fn last_key(&self) -> Option<&[u8]> {
        self.keys().last().map(Vec::as_slice)
    }

    /// Values of a leaf; `None` for a node.
    pub fn values(&self) -> Option<&[Vec<u8>]> {
        match &self.content {
            PageContent::Leaf { values, .. } => Some(values),
            PageContent::Node { .. } => None,
        }
    }

    /// Child references of a node; `None` for a leaf.
    pub fn children(&self) -> Option<&[Arc<PageReference>]> {
        match &self.content {
            PageContent::Node { children, .. } => Some(children),
            PageContent::Leaf { .. } => None,
        }
    }

    /// Value stored under `key` in a leaf.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match &self.content {
            PageContent::Leaf { keys, values } => keys
                .binary_search_by(|k| k.as_slice().cmp(key))
                .ok()
                .map(|i| values[i].as_slice()),
            PageContent::Node { .. } => None,
        }
    }

    /// Whether a newer page replaced this one in its reference.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Serialize the page.
    ///
    /// # Errors
    /// `Error::UnsavedChild` if a child of a node has no position yet.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match &self.content {
            PageContent::Leaf { keys, values } => Ok(codec::encode_leaf(keys, values)),
            PageContent::Node { keys, children } => {
                let positions = children
                    .iter()
                    .map(|child| {
                        let pos = child.pos();
                        if pos.is_saved() {
                            Ok(pos)
                        } else {
                            Err(Error::UnsavedChild)
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(codec::encode_node(keys, &positions))
            }
        }
    }

    /// Write this page (and, for a node, any unsaved children first).
    ///
    /// Saving an already saved page is a no-op returning its position.
    pub fn save(&self, store: &dyn PageStore) -> Result<PagePosition> {
        self.save_over(store, PagePosition::UNSAVED)
    }

    /// Save, reporting `old_pos` to the store as superseded.
    pub(crate) fn save_over(&self, store: &dyn PageStore, old_pos: PagePosition) -> Result<PagePosition> {
        let current = self.pos();
        if current.is_saved() {
            return Ok(current);
        }

        if let PageContent::Node { children, .. } = &self.content {
            for child in children {
                child.save(store)?;
            }
        }

        let bytes = self.encode()?;
        let pos = store.write_page(PagePosition::UNSAVED, self.kind(), &bytes)?;

        // Only the save that installs its position supersedes `old_pos`.
        match self
            .pos
            .compare_exchange(0, pos.0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                store.mark_garbage(old_pos);
                trace!(%pos, bytes = bytes.len(), "page saved");
                Ok(pos)
            }
            // Lost a race with a concurrent save; the other record wins and
            // ours is orphaned.
            Err(winner) => {
                store.mark_garbage(pos);
                trace!(orphan = %pos, winner = %PagePosition(winner), "concurrent save won");
                Ok(PagePosition(winner))
            }
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("kind", &self.kind())
            .field("pos", &self.pos())
            .field("keys", &self.key_count())
            .field("detached", &self.is_detached())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
