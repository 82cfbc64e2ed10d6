//! Core identifier types for the Keel journal.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application sequence number.
///
/// An ASQN is a caller-supplied label attached to a record. The journal
/// never interprets it beyond validating monotonicity: across records the
/// ASQN is non-decreasing, and two records with specified ASQNs must be
/// strictly ordered. Higher layers use it to address positions in a
/// replication stream without a secondary index file.
///
/// # Example
///
/// ```rust
/// use keel_common::types::Asqn;
///
/// let asqn = Asqn::new(100);
/// assert_eq!(asqn.as_u64(), 100);
/// assert!(asqn.is_specified());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Asqn(u64);

impl Asqn {
    /// Reserved sentinel meaning "no sequence number supplied".
    pub const UNSPECIFIED: Self = Self(0);

    /// Smallest legal specified ASQN.
    pub const MIN: Self = Self(1);

    /// Creates a new `Asqn` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(asqn: u64) -> Self {
        Self(asqn)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks whether a sequence number was supplied.
    #[inline]
    #[must_use]
    pub const fn is_specified(self) -> bool {
        self.0 != Self::UNSPECIFIED.0
    }

    /// Creates an `Asqn` from bytes (little-endian).
    #[inline]
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Converts to bytes (little-endian).
    #[inline]
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for Asqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::UNSPECIFIED {
            write!(f, "Asqn(UNSPECIFIED)")
        } else {
            write!(f, "Asqn({})", self.0)
        }
    }
}

impl fmt::Display for Asqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Asqn {
    #[inline]
    fn from(asqn: u64) -> Self {
        Self::new(asqn)
    }
}

impl From<Asqn> for u64 {
    #[inline]
    fn from(asqn: Asqn) -> Self {
        asqn.0
    }
}

/// Segment identifier.
///
/// Segment IDs are 1-based and monotonically increasing within one journal;
/// a fresh journal (including one produced by `reset`) starts again at 1.
/// The ID appears both in the segment file name and in its descriptor.
///
/// # Example
///
/// ```rust
/// use keel_common::types::SegmentId;
///
/// let id = SegmentId::FIRST;
/// assert_eq!(id.as_u64(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Invalid segment ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First segment ID of a fresh journal.
    pub const FIRST: Self = Self(1);

    /// Creates a new `SegmentId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next segment ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid segment ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Creates a `SegmentId` from bytes (little-endian).
    #[inline]
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Converts to bytes (little-endian).
    #[inline]
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "SegmentId(INVALID)")
        } else {
            write!(f, "SegmentId({})", self.0)
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SegmentId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<SegmentId> for u64 {
    #[inline]
    fn from(id: SegmentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asqn() {
        let asqn = Asqn::new(100);
        assert_eq!(asqn.as_u64(), 100);
        assert!(asqn.is_specified());
        assert!(!Asqn::UNSPECIFIED.is_specified());

        let bytes = asqn.to_le_bytes();
        assert_eq!(Asqn::from_le_bytes(bytes), asqn);
    }

    #[test]
    fn test_asqn_debug() {
        assert_eq!(format!("{:?}", Asqn::UNSPECIFIED), "Asqn(UNSPECIFIED)");
        assert_eq!(format!("{:?}", Asqn::new(7)), "Asqn(7)");
    }

    #[test]
    fn test_segment_id() {
        let id = SegmentId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert!(id.is_valid());
        assert!(!SegmentId::INVALID.is_valid());

        assert_eq!(id.next().as_u64(), 43);
        assert_eq!(SegmentId::FIRST.as_u64(), 1);
    }

    #[test]
    fn test_ordering() {
        assert!(Asqn::new(1) < Asqn::new(2));
        assert!(SegmentId::new(1) < SegmentId::new(2));
        assert!(Asqn::UNSPECIFIED < Asqn::MIN);
    }
}
