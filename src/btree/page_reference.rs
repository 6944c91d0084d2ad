//! PageReference - a parent's slot for one child page.
//!
//! Besides pointing at the child, the reference is the unit of locking for
//! structural operations on that child:
//! - the lock word holds the packed [`HandlerKey`] of the owning handler,
//!   unique across every handler pool of the process
//! - a contended `try_lock` registers the requester on the *owner's*
//!   wait-list, not on the reference
//! - `unlock` wakes everyone on the former owner's wait-list
//!
//! # Slot states
//! ```text
//!   Unresolved ──load_raw──▶ ResidentRaw ──parse──▶ ResidentParsed
//!        (pos only)            (pos + bytes)           (pos + Page)
//! ```
//! `replace_page` installs a new page in any state and detaches the old one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::common::{self, HandlerKey, PagePosition, Result};
use crate::handler::PageOperationHandler;
use crate::storage::PageStore;

use super::lock_guard::{LockAttempt, PageLockGuard};
use super::page::Page;

/// Residency of a reference's child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// No page and no position: a reference that was never filled.
    Empty,
    /// Position known, nothing loaded.
    Unresolved,
    /// Bytes loaded, not parsed.
    ResidentRaw,
    /// A parsed page is attached.
    ResidentParsed,
}

struct Slot {
    pos: PagePosition,
    page: Option<Arc<Page>>,
    raw: Option<Vec<u8>>,
    /// Last saved position replaced by an unsaved page.
    superseded: PagePosition,
}

/// A parent's pointer to one child page, with its lock.
///
/// # Thread Safety
/// The child slot sits behind a `parking_lot::RwLock` that is held only for
/// short field updates, never across I/O. The structural lock is a single
/// `AtomicU64`, free when it holds `HandlerKey::NONE`.
pub struct PageReference {
    lock_owner: AtomicU64,
    data_structure_changed: AtomicBool,
    slot: RwLock<Slot>,
}

const FREE: u64 = HandlerKey::NONE.to_bits();

impl PageReference {
    /// An empty reference, useful as a lock-only placeholder.
    pub fn new() -> Self {
        Self::with_slot(PagePosition::UNSAVED, None)
    }

    /// A reference to a saved page that is not loaded yet.
    pub fn from_pos(pos: PagePosition) -> Self {
        Self::with_slot(pos, None)
    }

    /// A reference to a resident page.
    pub fn from_page(page: Arc<Page>) -> Self {
        Self::with_slot(page.pos(), Some(page))
    }

    fn with_slot(pos: PagePosition, page: Option<Arc<Page>>) -> Self {
        Self {
            lock_owner: AtomicU64::new(FREE),
            data_structure_changed: AtomicBool::new(false),
            slot: RwLock::new(Slot {
                pos,
                page,
                raw: None,
                superseded: PagePosition::UNSAVED,
            }),
        }
    }

    // ========================================================================
    // Child page
    // ========================================================================

    /// Position of the child. The resident page is authoritative when it
    /// has been saved since it was installed.
    pub fn pos(&self) -> PagePosition {
        let slot = self.slot.read();
        match &slot.page {
            Some(page) => page.pos(),
            None => slot.pos,
        }
    }

    /// The resident child, without any I/O.
    pub fn memory_page(&self) -> Option<Arc<Page>> {
        self.slot.read().page.clone()
    }

    /// Same as [`memory_page`](Self::memory_page).
    pub fn page(&self) -> Option<Arc<Page>> {
        self.memory_page()
    }

    /// Current residency of the child.
    pub fn state(&self) -> PageState {
        let slot = self.slot.read();
        if slot.page.is_some() {
            PageState::ResidentParsed
        } else if slot.raw.is_some() {
            PageState::ResidentRaw
        } else if slot.pos.is_saved() {
            PageState::Unresolved
        } else {
            PageState::Empty
        }
    }

    /// Whether the child is a leaf.
    ///
    /// Asks the resident page if there is one, otherwise decodes the kind
    /// bits of the position. Never loads anything.
    pub fn is_leaf_page(&self) -> bool {
        let slot = self.slot.read();
        match &slot.page {
            Some(page) => page.is_leaf(),
            None => common::is_leaf_page(slot.pos),
        }
    }

    /// Whether the child is an internal node. Never loads anything.
    pub fn is_node_page(&self) -> bool {
        let slot = self.slot.read();
        match &slot.page {
            Some(page) => page.is_node(),
            None => common::is_node_page(slot.pos),
        }
    }

    /// Install `page` as the child and return the page it replaced.
    ///
    /// The replaced page is marked detached; readers already holding it
    /// keep seeing its content. Callers mutating the tree should hold this
    /// reference's lock.
    pub fn replace_page(&self, page: Arc<Page>) -> Option<Arc<Page>> {
        let mut slot = self.slot.write();
        let current_pos = match &slot.page {
            Some(old) => old.pos(),
            None => slot.pos,
        };
        if current_pos.is_saved() {
            slot.superseded = current_pos;
        }
        slot.pos = page.pos();
        slot.raw = None;
        let old = slot.page.replace(Arc::clone(&page));
        drop(slot);

        if let Some(old) = &old {
            if !Arc::ptr_eq(old, &page) {
                old.mark_detached();
            }
        }
        trace!(old = %current_pos, "page replaced");
        old
    }

    /// Load the child's bytes without parsing them.
    ///
    /// Does nothing if the child is already resident in either form.
    pub fn load_raw(&self, store: &dyn PageStore) -> Result<()> {
        let pos = {
            let slot = self.slot.read();
            if slot.page.is_some() || slot.raw.is_some() {
                return Ok(());
            }
            slot.pos
        };

        let bytes = store.load_page(pos)?;
        debug!(%pos, bytes = bytes.len(), "page loaded");

        let mut slot = self.slot.write();
        // A concurrent load or replace may have won meanwhile.
        if slot.page.is_none() && slot.raw.is_none() && slot.pos == pos {
            slot.raw = Some(bytes);
        }
        Ok(())
    }

    /// The child page, loading and parsing it on demand.
    pub fn get_or_read_page(&self, store: &dyn PageStore) -> Result<Arc<Page>> {
        if let Some(page) = self.memory_page() {
            return Ok(page);
        }
        self.load_raw(store)?;

        let mut slot = self.slot.write();
        if let Some(page) = &slot.page {
            return Ok(Arc::clone(page));
        }
        let pos = slot.pos;
        let page = match &slot.raw {
            Some(raw) => Page::decode(pos, raw)?,
            // `load_raw` succeeded and `replace_page` always installs a page.
            None => return Err(common::Error::UnsavedPage),
        };
        slot.raw = None;
        slot.page = Some(Arc::clone(&page));
        Ok(page)
    }

    /// Save the resident child (and its unsaved descendants).
    ///
    /// Returns the child's position. A reference whose child is not
    /// resident is already saved and is returned as is.
    pub fn save(&self, store: &dyn PageStore) -> Result<PagePosition> {
        let (page, superseded) = {
            let slot = self.slot.read();
            match &slot.page {
                Some(page) => (Arc::clone(page), slot.superseded),
                None => return Ok(slot.pos),
            }
        };

        let pos = page.save_over(store, superseded)?;

        let mut slot = self.slot.write();
        if slot.page.as_ref().is_some_and(|p| Arc::ptr_eq(p, &page)) {
            slot.pos = pos;
            if slot.superseded == superseded {
                slot.superseded = PagePosition::UNSAVED;
            }
        }
        Ok(pos)
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Try to make `handler` the exclusive owner of this reference.
    ///
    /// Returns `true` if `handler` owns the lock afterwards, including when
    /// it already did. Returns `false` once `handler` has been registered on
    /// the current owner's wait-list; the caller must then stop and wait for
    /// a wake instead of retrying.
    pub fn try_lock(&self, handler: &PageOperationHandler) -> bool {
        let me = handler.key();
        if self.lock_owner.load(Ordering::Acquire) == me.to_bits() {
            return true;
        }

        loop {
            let current = match self.lock_owner.compare_exchange(
                FREE,
                me.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(handler = %me, "page lock acquired");
                    return true;
                }
                Err(current) => current,
            };

            let owner = HandlerKey::from_bits(current);
            match handler.resolve(owner) {
                Some(owner_handler) => owner_handler.add_waiting_handler(handler),
                None => {
                    // Its pool was dropped while holding the lock; no
                    // release will ever come.
                    warn!(handler = %me, owner = %owner, "page lock held by a vanished handler");
                    return false;
                }
            }

            // The owner may have released before the registration landed;
            // then its wake may have drained an empty list. Re-check.
            if self.lock_owner.load(Ordering::SeqCst) == current {
                trace!(handler = %me, owner = %owner, "page lock queued");
                return false;
            }
        }
    }

    /// [`try_lock`](Self::try_lock) returning a guard that releases the
    /// lock on drop.
    pub fn try_acquire<'a>(&'a self, handler: &'a PageOperationHandler) -> LockAttempt<'a> {
        if self.lock_owner.load(Ordering::Acquire) == handler.key().to_bits() {
            return LockAttempt::Reentrant(PageLockGuard::new(self, handler, false));
        }
        if self.try_lock(handler) {
            LockAttempt::Acquired(PageLockGuard::new(self, handler, true))
        } else {
            LockAttempt::Queued
        }
    }

    /// Release the lock and wake every handler waiting on the former owner.
    ///
    /// `handler` is only used to reach the owner's wait-list; unlocking is
    /// expected to be done by the owner. Returns `false` if the reference
    /// was not locked.
    pub fn unlock(&self, handler: &PageOperationHandler) -> bool {
        let previous = self.lock_owner.swap(FREE, Ordering::SeqCst);
        if previous == FREE {
            return false;
        }
        let owner = HandlerKey::from_bits(previous);
        if owner != handler.key() {
            warn!(owner = %owner, by = %handler.key(), "page lock released by a non-owner");
        }
        trace!(handler = %owner, "page lock released");
        match handler.resolve(owner) {
            Some(owner_handler) => {
                owner_handler.wake_up_waiting_handlers();
            }
            None => warn!(owner = %owner, "released a lock of a vanished handler"),
        }
        true
    }

    /// Handler holding the lock, if any.
    pub fn lock_owner(&self) -> Option<HandlerKey> {
        let owner = HandlerKey::from_bits(self.lock_owner.load(Ordering::Acquire));
        owner.is_valid().then_some(owner)
    }

    /// Whether `handler` holds the lock.
    #[inline]
    pub fn is_locked_by(&self, handler: &PageOperationHandler) -> bool {
        self.lock_owner.load(Ordering::Acquire) == handler.key().to_bits()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock_owner.load(Ordering::Acquire) != FREE
    }

    // ========================================================================
    // Structure change flag
    // ========================================================================

    /// Whether the subtree changed shape since the flag was last cleared.
    pub fn is_data_structure_changed(&self) -> bool {
        self.data_structure_changed.load(Ordering::Acquire)
    }

    /// Set by the handler that splits, merges or removes the child.
    pub fn set_data_structure_changed(&self, changed: bool) {
        self.data_structure_changed.store(changed, Ordering::Release);
    }

    /// Read and clear the flag in one step.
    pub fn take_data_structure_changed(&self) -> bool {
        self.data_structure_changed.swap(false, Ordering::AcqRel)
    }
}

impl Default for PageReference {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageReference")
            .field("pos", &self.pos())
            .field("state", &self.state())
            .field("lock_owner", &self.lock_owner())
            .field("changed", &self.is_data_structure_changed())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
