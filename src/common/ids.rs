//! Handler, session and transaction identifiers.

use std::fmt;

/// Identifies a page-operation handler.
///
/// Using `u32` because handlers form a small fixed table and the id is the
/// value stored in a page reference's atomic owner slot.
///
/// # Example
/// ```
/// use handoffdb::HandlerId;
///
/// let id = HandlerId::new(3);
/// assert!(id.is_valid());
/// assert_eq!(id.index(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u32);

impl HandlerId {
    /// Sentinel meaning "no handler". An owner slot holding it is unlocked.
    pub const NONE: HandlerId = HandlerId(u32::MAX);

    /// Create a new HandlerId.
    #[inline]
    pub fn new(id: u32) -> Self {
        HandlerId(id)
    }

    /// Check if this is a real handler id.
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::NONE
    }

    /// Position of the handler in its registry.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "Handler(NONE)")
        } else {
            write!(f, "Handler({})", self.0)
        }
    }
}

/// Process-wide identity of a handler: its registry plus its index there.
///
/// A [`HandlerId`] is only unique inside one registry. Page references
/// store the packed key so handlers of different pools never alias.
///
/// # Example
/// ```
/// use handoffdb::{HandlerId, HandlerKey};
///
/// let key = HandlerKey::new(2, HandlerId::new(5));
/// assert_eq!(HandlerKey::from_bits(key.to_bits()), key);
/// assert!(!HandlerKey::NONE.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey {
    pub registry: u32,
    pub handler: HandlerId,
}

impl HandlerKey {
    /// Sentinel meaning "no handler". Packs to `u64::MAX`.
    pub const NONE: HandlerKey = HandlerKey {
        registry: u32::MAX,
        handler: HandlerId::NONE,
    };

    #[inline]
    pub const fn new(registry: u32, handler: HandlerId) -> Self {
        HandlerKey { registry, handler }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.to_bits() != u64::MAX
    }

    /// Registry id in the high half, handler index in the low half.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        ((self.registry as u64) << 32) | self.handler.0 as u64
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        HandlerKey {
            registry: (bits >> 32) as u32,
            handler: HandlerId(bits as u32),
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "Handler(NONE)")
        } else {
            write!(f, "Handler({}.{})", self.registry, self.handler.0)
        }
    }
}

/// Identifies a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Identifies a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn({})", self.0)
    }
}
