use std::fmt;

use serde::{Deserialize, Serialize};

/// A simple type for integer ranges
///
/// All ranges follow the bed file range convention: 0-indexed, half-closed, [start,end)
///
/// Used for allele ploidy segments and for the genomic span covered by templated insertions
/// and chain bounds.
///
#[derive(Clone, Deserialize, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct IntRange {
    pub start: i64,
    pub end: i64,
}

impl IntRange {
    pub fn from_pair(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Build the smallest range containing both positions
    ///
    pub fn from_unordered_pair(pos1: i64, pos2: i64) -> Self {
        Self {
            start: std::cmp::min(pos1, pos2),
            end: std::cmp::max(pos1, pos2) + 1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Return true if the ranges intersect (adjacency does not count)
    ///
    pub fn intersect_range(&self, other: &IntRange) -> bool {
        other.end > self.start && other.start < self.end
    }

    /// Return true if other is fully contained in this range
    ///
    pub fn contains_range(&self, other: &IntRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

impl fmt::Debug for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// Get the size of the intersection of 2 ranges, or zero if they don't intersect
///
pub fn get_overlap_size(r1: &IntRange, r2: &IntRange) -> i64 {
    if !r1.intersect_range(r2) {
        return 0;
    }
    std::cmp::min(r1.end, r2.end) - std::cmp::max(r1.start, r2.start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_range() {
        let r1 = IntRange::from_pair(1, 4);
        let r2 = IntRange::from_pair(4, 8);
        let r3 = IntRange::from_pair(3, 9);

        assert!(!r1.intersect_range(&r2));
        assert!(!r2.intersect_range(&r1));
        assert!(r1.intersect_range(&r3));
        assert!(r3.intersect_range(&r2));
    }

    #[test]
    fn test_from_unordered_pair() {
        let r = IntRange::from_unordered_pair(10, 5);
        assert_eq!(r, IntRange::from_pair(5, 11));
        assert!(r.contains_range(&IntRange::from_unordered_pair(6, 10)));
        assert!(!r.contains_range(&IntRange::from_unordered_pair(4, 10)));
    }

    #[test]
    fn test_get_overlap_size() {
        let r1 = IntRange::from_pair(1, 4);
        let r2 = IntRange::from_pair(6, 8);
        let r3 = IntRange::from_pair(2, 7);

        assert_eq!(get_overlap_size(&r1, &r2), 0);
        assert_eq!(get_overlap_size(&r1, &r3), 2);
        assert_eq!(get_overlap_size(&r3, &r2), 1);
    }
}
