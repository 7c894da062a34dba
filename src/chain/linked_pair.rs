use std::fmt;

use serde::Serialize;

use crate::breakpoint::{Breakend, BreakendDirection, BreakendId};
use crate::cluster::Cluster;

use super::proposed_links::ChainingRule;

/// Minimum templated insertion length in the absence of breakend homology
pub const MIN_TEMPLATED_INSERTION_LENGTH: i64 = 30;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, strum::Display)]
pub enum LinkType {
    #[strum(serialize = "TI")]
    TemplatedInsertion,
    #[strum(serialize = "DB")]
    DeletionBridge,
}

/// Get the minimum separation of two facing breakends for them to form a templated insertion
///
/// The minimum is extended to cover the homology of both breakends, then capped by the shorter
/// known anchor distance, since a breakend cannot be linked beyond its own local alignment anchor.
///
pub fn get_min_templated_insertion_length(be1: &Breakend, be2: &Breakend) -> i64 {
    let min_length = std::cmp::max(
        MIN_TEMPLATED_INSERTION_LENGTH,
        be1.homology_len + be2.homology_len,
    );
    let anchor_distance = [be1.anchor_distance, be2.anchor_distance]
        .into_iter()
        .filter(|&x| x > 0)
        .min();
    match anchor_distance {
        Some(x) => std::cmp::min(min_length, x),
        None => min_length,
    }
}

/// A pair of facing breakends, either a candidate or realized chain link
///
#[derive(Clone)]
pub struct LinkedPair {
    /// Breakend with the lower position
    pub lower: BreakendId,
    pub upper: BreakendId,

    pub length: i64,
    pub link_type: LinkType,

    /// Supported by an assembly-derived link
    pub is_assembled: bool,

    /// The breakends are neighbors in genomic order, possibly separated by a deletion bridge
    pub is_adjacent: bool,

    /// Number of times this pair has been placed in a chain
    pub repeat_count: usize,

    /// Highest priority rule which selected the pair the first time it was placed in a chain
    pub link_reason: Option<ChainingRule>,

    /// Order in which the pair was first placed in a chain
    pub link_index: Option<usize>,
}

impl LinkedPair {
    /// Create a linked pair from two breakends if they form a templated insertion or deletion
    /// bridge
    ///
    /// No minimum length is enforced here, see `is_valid_templated_insertion`
    ///
    pub fn from_breakends(cluster: &Cluster, id1: BreakendId, id2: BreakendId) -> Option<Self> {
        if id1 == id2 {
            return None;
        }
        let be1 = cluster.breakend(id1);
        let be2 = cluster.breakend(id2);
        if be1.chrom != be2.chrom {
            return None;
        }
        let ((lower, lower_be), (upper, upper_be)) = if (be1.pos, id1) <= (be2.pos, id2) {
            ((id1, be1), (id2, be2))
        } else {
            ((id2, be2), (id1, be1))
        };
        let link_type = match (lower_be.dir, upper_be.dir) {
            (BreakendDirection::RightAnchor, BreakendDirection::LeftAnchor) => {
                LinkType::TemplatedInsertion
            }
            (BreakendDirection::LeftAnchor, BreakendDirection::RightAnchor) => {
                LinkType::DeletionBridge
            }
            _ => {
                return None;
            }
        };
        Some(Self {
            lower,
            upper,
            length: upper_be.pos - lower_be.pos,
            link_type,
            is_assembled: false,
            is_adjacent: false,
            repeat_count: 0,
            link_reason: None,
            link_index: None,
        })
    }

    /// True if this is a templated insertion on a single chromosome arm meeting the minimum
    /// length requirement
    ///
    pub fn is_valid_templated_insertion(&self, cluster: &Cluster) -> bool {
        let lower_be = cluster.breakend(self.lower);
        let upper_be = cluster.breakend(self.upper);
        self.link_type == LinkType::TemplatedInsertion
            && lower_be.arm == upper_be.arm
            && self.length >= get_min_templated_insertion_length(lower_be, upper_be)
    }

    pub fn breakends(&self) -> [BreakendId; 2] {
        [self.lower, self.upper]
    }

    pub fn has_breakend(&self, id: BreakendId) -> bool {
        self.lower == id || self.upper == id
    }

    pub fn other_breakend(&self, id: BreakendId) -> Option<BreakendId> {
        if self.lower == id {
            Some(self.upper)
        } else if self.upper == id {
            Some(self.lower)
        } else {
            None
        }
    }

    /// Structural identity of the pair, independent of any chain placement
    ///
    pub fn key(&self) -> (BreakendId, BreakendId) {
        (self.lower, self.upper)
    }
}

impl fmt::Debug for LinkedPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}-{} len: {})",
            self.link_type, self.lower, self.upper, self.length
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::test_utils::*;

    #[test]
    fn test_min_templated_insertion_length() {
        let mut be1 = get_test_breakend("chr1", 100, BreakendDirection::RightAnchor);
        let mut be2 = get_test_breakend("chr1", 200, BreakendDirection::LeftAnchor);
        assert_eq!(get_min_templated_insertion_length(&be1, &be2), 30);

        be1.homology_len = 20;
        be2.homology_len = 25;
        assert_eq!(get_min_templated_insertion_length(&be1, &be2), 45);

        be2.anchor_distance = 40;
        assert_eq!(get_min_templated_insertion_length(&be1, &be2), 40);
    }

    #[test]
    fn test_from_breakends() {
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 500, 700, 1.0),
            get_test_del("c", "chr2", 500, 700, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);

        let pair = LinkedPair::from_breakends(&cluster, BreakendId::new(1, 0), BreakendId::new(0, 1))
            .unwrap();
        assert_eq!(pair.link_type, LinkType::TemplatedInsertion);
        assert_eq!(pair.key(), (BreakendId::new(0, 1), BreakendId::new(1, 0)));
        assert_eq!(pair.length, 200);
        assert!(pair.is_valid_templated_insertion(&cluster));
        assert_eq!(
            pair.other_breakend(BreakendId::new(0, 1)),
            Some(BreakendId::new(1, 0))
        );

        let pair = LinkedPair::from_breakends(&cluster, BreakendId::new(0, 0), BreakendId::new(0, 1))
            .unwrap();
        assert_eq!(pair.link_type, LinkType::DeletionBridge);
        assert!(!pair.is_valid_templated_insertion(&cluster));

        // Same direction:
        assert!(
            LinkedPair::from_breakends(&cluster, BreakendId::new(0, 0), BreakendId::new(1, 0))
                .is_none()
        );

        // Different chromosome:
        assert!(
            LinkedPair::from_breakends(&cluster, BreakendId::new(0, 1), BreakendId::new(2, 0))
                .is_none()
        );
    }

    #[test]
    fn test_short_templated_insertion() {
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 310, 700, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);
        let pair = LinkedPair::from_breakends(&cluster, BreakendId::new(0, 1), BreakendId::new(1, 0))
            .unwrap();
        assert_eq!(pair.link_type, LinkType::TemplatedInsertion);
        assert!(!pair.is_valid_templated_insertion(&cluster));
    }
}
