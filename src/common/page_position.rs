//! Page position encoding.
//!
//! A [`PagePosition`] tells two things without touching storage: where the
//! page record lives and whether the page is a leaf or an internal node.

use std::fmt;

/// Kind of a B-tree page.
///
/// Uses `#[repr(u8)]` so the same code goes into the position bits and the
/// on-disk record header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// Leaf page holding key/value entries.
    Leaf = 1,
    /// Internal page holding keys and child references.
    Node = 2,
}

impl PageKind {
    /// Decode a kind code, returning `None` for anything unknown.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PageKind::Leaf),
            2 => Some(PageKind::Node),
            _ => None,
        }
    }

    /// The code stored in positions and record headers.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Encoded locator of a page.
///
/// # Layout
/// ```text
/// 63                                   2 1   0
/// ┌──────────────────────────────────────┬─────┐
/// │          byte offset in store        │kind │
/// └──────────────────────────────────────┴─────┘
/// ```
///
/// `PagePosition::UNSAVED` (all zero bits) is the transient position of a
/// page that has not been written yet. Its kind bits decode to nothing.
///
/// # Example
/// ```
/// use handoffdb::common::{PageKind, PagePosition};
///
/// let pos = PagePosition::new(4096, PageKind::Leaf);
/// assert_eq!(pos.offset(), 4096);
/// assert_eq!(pos.kind(), Some(PageKind::Leaf));
/// assert!(!PagePosition::UNSAVED.is_saved());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PagePosition(pub u64);

impl PagePosition {
    /// Position of a page that has never been written.
    pub const UNSAVED: PagePosition = PagePosition(0);

    const KIND_BITS: u32 = 2;
    const KIND_MASK: u64 = (1 << Self::KIND_BITS) - 1;

    /// Largest byte offset that fits next to the kind bits.
    pub const MAX_OFFSET: u64 = u64::MAX >> Self::KIND_BITS;

    /// Encode an offset and kind.
    ///
    /// # Panics
    /// Panics if `offset` exceeds [`PagePosition::MAX_OFFSET`].
    #[inline]
    pub fn new(offset: u64, kind: PageKind) -> Self {
        assert!(offset <= Self::MAX_OFFSET, "page offset out of range");
        PagePosition((offset << Self::KIND_BITS) | kind.code() as u64)
    }

    /// Byte offset of the page record in its store.
    #[inline]
    pub const fn offset(&self) -> u64 {
        self.0 >> Self::KIND_BITS
    }

    /// Page kind decoded from the low bits.
    #[inline]
    pub const fn kind(&self) -> Option<PageKind> {
        PageKind::from_code((self.0 & Self::KIND_MASK) as u8)
    }

    /// Whether this position points at a written page.
    #[inline]
    pub const fn is_saved(&self) -> bool {
        self.kind().is_some()
    }
}

/// Whether `pos` addresses a leaf page. Never performs I/O.
#[inline]
pub fn is_leaf_page(pos: PagePosition) -> bool {
    matches!(pos.kind(), Some(PageKind::Leaf))
}

/// Whether `pos` addresses an internal node page. Never performs I/O.
#[inline]
pub fn is_node_page(pos: PagePosition) -> bool {
    matches!(pos.kind(), Some(PageKind::Node))
}

impl fmt::Display for PagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Pos(offset={}, {:?})", self.offset(), kind),
            None => write!(f, "Pos(UNSAVED)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unsaved_has_no_kind() {
        assert_eq!(PagePosition::UNSAVED.kind(), None);
        assert!(!is_leaf_page(PagePosition::UNSAVED));
        assert!(!is_node_page(PagePosition::UNSAVED));
        assert_eq!(PagePosition::default(), PagePosition::UNSAVED);
    }

    #[test]
    fn test_offset_zero_is_still_saved() {
        let pos = PagePosition::new(0, PageKind::Leaf);
        assert!(pos.is_saved());
        assert_ne!(pos, PagePosition::UNSAVED);
    }

    #[test]
    fn test_kind_helpers() {
        assert!(is_leaf_page(PagePosition::new(10, PageKind::Leaf)));
        assert!(is_node_page(PagePosition::new(10, PageKind::Node)));
        assert!(!is_leaf_page(PagePosition::new(10, PageKind::Node)));
    }

    #[test]
    fn test_unknown_kind_code() {
        // Code 3 is not a kind.
        assert_eq!(PagePosition(0b111).kind(), None);
        assert_eq!(PageKind::from_code(0), None);
    }

    #[test]
    #[should_panic(expected = "page offset out of range")]
    fn test_offset_overflow() {
        PagePosition::new(PagePosition::MAX_OFFSET + 1, PageKind::Leaf);
    }

    #[test]
    fn test_display() {
        assert_eq!(PagePosition::UNSAVED.to_string(), "Pos(UNSAVED)");
        assert_eq!(
            PagePosition::new(64, PageKind::Node).to_string(),
            "Pos(offset=64, Node)"
        );
    }

    proptest! {
        #[test]
        fn prop_kind_bits_never_leak_into_offset(
            offset in 0..=PagePosition::MAX_OFFSET,
            leaf in any::<bool>(),
        ) {
            let kind = if leaf { PageKind::Leaf } else { PageKind::Node };
            let pos = PagePosition::new(offset, kind);
            prop_assert_eq!(pos.offset(), offset);
            prop_assert_eq!(is_leaf_page(pos), leaf);
            prop_assert_eq!(is_node_page(pos), !leaf);
        }
    }
}
