//! Sparse journal index.
//!
//! An in-memory map from record index to the file offset of its frame,
//! populated on every k-th append. The index is a lossy cache: a lookup
//! returns the greatest known entry at or before the target, and callers
//! scan forward from there. It must never lie — after truncation only
//! entries for live frames remain.

use std::collections::BTreeMap;

/// One sparse index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Record index of the frame.
    pub index: u64,
    /// Byte offset of the frame within the owning segment file.
    pub position: u64,
}

/// Sparse map from record index to frame offset within one segment.
#[derive(Debug)]
pub struct SparseIndex {
    density: u64,
    entries: BTreeMap<u64, u64>,
}

impl SparseIndex {
    /// Creates an empty index that retains every `density`-th record.
    pub fn new(density: u64) -> Self {
        debug_assert!(density > 0);
        Self {
            density,
            entries: BTreeMap::new(),
        }
    }

    /// Records the offset of `index` if it aligns on the density.
    pub fn maybe_index(&mut self, index: u64, position: u64) {
        if index % self.density == 0 {
            self.entries.insert(index, position);
        }
    }

    /// Whether `index` would be retained by [`SparseIndex::maybe_index`].
    #[inline]
    pub fn accepts(&self, index: u64) -> bool {
        index % self.density == 0
    }

    /// Returns the greatest entry with `entry.index <= index`.
    pub fn lookup(&self, index: u64) -> Option<IndexEntry> {
        self.entries
            .range(..=index)
            .next_back()
            .map(|(&index, &position)| IndexEntry { index, position })
    }

    /// Drops all entries with `entry.index > after_index`.
    pub fn truncate(&mut self, after_index: u64) {
        self.entries.split_off(&(after_index + 1));
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> SparseIndex {
        let mut index = SparseIndex::new(5);
        for i in 1..=20 {
            index.maybe_index(i, i * 100);
        }
        index
    }

    #[test]
    fn test_density() {
        let index = populated();
        // Only indices 5, 10, 15, 20 are retained.
        assert_eq!(index.len(), 4);
        assert!(index.accepts(10));
        assert!(!index.accepts(11));
    }

    #[test]
    fn test_lookup() {
        let index = populated();

        assert_eq!(index.lookup(4), None);
        assert_eq!(
            index.lookup(5),
            Some(IndexEntry {
                index: 5,
                position: 500
            })
        );
        assert_eq!(
            index.lookup(9),
            Some(IndexEntry {
                index: 5,
                position: 500
            })
        );
        assert_eq!(
            index.lookup(u64::MAX),
            Some(IndexEntry {
                index: 20,
                position: 2000
            })
        );
    }

    #[test]
    fn test_truncate() {
        let mut index = populated();
        index.truncate(12);

        assert_eq!(index.lookup(20).unwrap().index, 10);
        assert_eq!(index.len(), 2);

        // Truncation is idempotent.
        index.truncate(12);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_truncate_all() {
        let mut index = populated();
        index.truncate(0);
        assert!(index.is_empty());
        assert_eq!(index.lookup(20), None);
    }

    #[test]
    fn test_clear() {
        let mut index = populated();
        index.clear();
        assert!(index.is_empty());
    }
}
