//! Atom slices: the half-open index ranges assigned to cores.

use crate::error::{PartitionError, Result};
use std::fmt;
use std::ops::Range;

/// Immutable half-open range `[lo, hi)` of atoms of one population.
///
/// Slices compare and hash by value so they can key the resource cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomSlice {
    lo: u32,
    hi: u32,
}

impl AtomSlice {
    /// Create a slice covering atoms `lo..hi`.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::InvalidSlice`] if the range is empty or inverted.
    pub fn new(lo: u32, hi: u32) -> Result<Self> {
        if lo >= hi {
            return Err(PartitionError::InvalidSlice { lo, hi });
        }
        Ok(Self { lo, hi })
    }

    /// First atom.
    pub const fn lo(&self) -> u32 {
        self.lo
    }

    /// One past the last atom.
    pub const fn hi(&self) -> u32 {
        self.hi
    }

    /// Last atom (inclusive).
    pub const fn last(&self) -> u32 {
        self.hi - 1
    }

    /// Number of atoms in the slice.
    pub const fn n_atoms(&self) -> u32 {
        self.hi - self.lo
    }

    /// True if `atom` lies in the slice.
    pub const fn contains(&self, atom: u32) -> bool {
        atom >= self.lo && atom < self.hi
    }

    /// The slice as a range.
    pub const fn range(&self) -> Range<u32> {
        self.lo..self.hi
    }
}

impl fmt::Display for AtomSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rejects_empty_and_inverted() {
        assert!(AtomSlice::new(5, 5).is_err());
        assert!(AtomSlice::new(6, 5).is_err());
    }

    #[test]
    fn half_open_bounds() {
        let slice = AtomSlice::new(10, 20).unwrap();
        assert_eq!(slice.n_atoms(), 10);
        assert_eq!(slice.last(), 19);
        assert!(slice.contains(10));
        assert!(!slice.contains(20));
        assert_eq!(slice.to_string(), "[10, 20)");
    }

    #[test]
    fn equal_slices_hash_equal() {
        let mut set = HashSet::new();
        set.insert(AtomSlice::new(0, 8).unwrap());
        assert!(set.contains(&AtomSlice::new(0, 8).unwrap()));
        assert!(!set.contains(&AtomSlice::new(0, 9).unwrap()));
    }
}
