use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::breakpoint::BreakendId;

/// Rules which can select a proposed link, in ascending order of priority
///
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, strum::Display,
    strum::EnumCount, strum::EnumIter,
)]
pub enum ChainingRule {
    Nearest,
    PloidyMax,
    Adjacent,
    AdjacentMatch,
    PloidyOverlap,
    PloidyMatch,
    FoldbackToFoldback,
    CompDupSplit,
    Foldback,
    FoldbackSplit,
    Only,
    Assembly,
}

/// Compare the priority of two rule sets
///
/// Rules are compared from the highest priority rule down, so that a set containing a higher
/// rule always wins, and a set extending another with lower rules wins over the shorter set.
///
pub fn compare_rule_priority(
    rules1: &BTreeSet<ChainingRule>,
    rules2: &BTreeSet<ChainingRule>,
) -> Ordering {
    rules1.iter().rev().cmp(rules2.iter().rev())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MultiConnectionType {
    Foldback,
    ComplexDup,
}

/// Layout of a two-link proposal
///
/// The first link joins `outer[0]` to `entry`, the second joins `exit` to `outer[1]`. For a
/// foldback both outer breakends are the same breakend. For a complex duplication the outer
/// breakends are the end and start open breakends of the duplicated section.
///
#[derive(Clone, Debug)]
pub struct MultiConnection {
    pub connection_type: MultiConnectionType,
    pub entry: BreakendId,
    pub exit: BreakendId,
    pub outer: [BreakendId; 2],

    /// Chain running from entry to exit, used when a chained foldback spans several SVs
    pub inner_chain: Option<usize>,
}

/// One decision unit from the rule selector, consumed immediately by the link allocator
///
#[derive(Clone)]
pub struct ProposedLinks {
    /// Candidate pair ids, one for a simple link or two for a multi-connection
    pub pair_ids: Vec<usize>,

    pub rules: BTreeSet<ChainingRule>,

    pub ploidy: f64,
    pub ploidy_uncertainty: f64,

    /// True if the unlinked ploidy of the linked breakends agree
    pub ploidy_matched: bool,

    /// Ploidy to commit from each breakend
    pub breakend_allocations: Vec<(BreakendId, f64)>,

    /// Chain which must host the proposal
    pub target_chain: Option<usize>,

    pub multi_connection: Option<MultiConnection>,

    /// Total genomic length of all proposed pairs
    pub length: i64,
}

impl ProposedLinks {
    pub fn is_multi_connection(&self) -> bool {
        self.multi_connection.is_some()
    }

    pub fn add_rule(&mut self, rule: ChainingRule) {
        self.rules.insert(rule);
    }

    pub fn has_rule(&self, rule: ChainingRule) -> bool {
        self.rules.contains(&rule)
    }

    /// The highest priority rule which selected this proposal
    ///
    pub fn top_rule(&self) -> ChainingRule {
        self.rules
            .last()
            .copied()
            .unwrap_or(ChainingRule::Nearest)
    }

    pub fn priority_cmp(&self, other: &Self) -> Ordering {
        compare_rule_priority(&self.rules, &other.rules)
    }

    pub fn sv_indexes(&self) -> BTreeSet<usize> {
        self.breakend_allocations
            .iter()
            .map(|(id, _)| id.sv_index)
            .collect()
    }

    pub fn allocated_breakends(&self) -> BTreeSet<BreakendId> {
        self.breakend_allocations.iter().map(|(id, _)| *id).collect()
    }
}

impl fmt::Debug for ProposedLinks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "pairs: {:?} rules: {:?} ploidy: {:.2} matched: {} target_chain: {:?} multi: {:?}",
            self.pair_ids,
            self.rules,
            self.ploidy,
            self.ploidy_matched,
            self.target_chain,
            self.multi_connection.as_ref().map(|x| x.connection_type)
        )
    }
}

/// Final proposal order: priority descending, ploidy descending, length ascending
///
/// Candidate pair ids break any remaining ties so that the order is fully deterministic.
///
pub fn compare_proposal_order(p1: &ProposedLinks, p2: &ProposedLinks) -> Ordering {
    p2.priority_cmp(p1)
        .then_with(|| p2.ploidy.total_cmp(&p1.ploidy))
        .then_with(|| p1.length.cmp(&p2.length))
        .then_with(|| p1.pair_ids.cmp(&p2.pair_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::{EnumCount, IntoEnumIterator};

    fn get_rule_set(rules: &[ChainingRule]) -> BTreeSet<ChainingRule> {
        rules.iter().copied().collect()
    }

    fn get_test_proposal(pair_id: usize, rules: &[ChainingRule], ploidy: f64, length: i64) -> ProposedLinks {
        ProposedLinks {
            pair_ids: vec![pair_id],
            rules: get_rule_set(rules),
            ploidy,
            ploidy_uncertainty: 0.0,
            ploidy_matched: true,
            breakend_allocations: Vec::new(),
            target_chain: None,
            multi_connection: None,
            length,
        }
    }

    #[test]
    fn test_rule_order() {
        let rules = ChainingRule::iter().collect::<Vec<_>>();
        assert_eq!(rules.len(), ChainingRule::COUNT);
        assert_eq!(rules.first(), Some(&ChainingRule::Nearest));
        assert_eq!(rules.last(), Some(&ChainingRule::Assembly));
        assert!(ChainingRule::PloidyMatch > ChainingRule::PloidyOverlap);
        assert!(ChainingRule::AdjacentMatch > ChainingRule::Adjacent);
    }

    #[test]
    fn test_compare_rule_priority() {
        use ChainingRule::*;

        let only = get_rule_set(&[Only]);
        let only_adjacent = get_rule_set(&[Only, Adjacent]);
        let foldback_all_lower = get_rule_set(&[Foldback, PloidyMatch, AdjacentMatch, Nearest]);

        assert_eq!(compare_rule_priority(&only_adjacent, &only), Ordering::Greater);
        assert_eq!(
            compare_rule_priority(&only, &foldback_all_lower),
            Ordering::Greater
        );
        assert_eq!(compare_rule_priority(&only, &only), Ordering::Equal);
        assert_eq!(
            compare_rule_priority(&get_rule_set(&[]), &get_rule_set(&[Nearest])),
            Ordering::Less
        );
    }

    #[test]
    fn test_proposal_order() {
        use ChainingRule::*;

        let mut proposals = vec![
            get_test_proposal(0, &[Nearest], 2.0, 100),
            get_test_proposal(1, &[Only], 1.0, 500),
            get_test_proposal(2, &[Only], 2.0, 900),
            get_test_proposal(3, &[Only], 2.0, 300),
        ];
        proposals.sort_by(compare_proposal_order);
        let order = proposals.iter().map(|x| x.pair_ids[0]).collect::<Vec<_>>();
        assert_eq!(order, vec![3, 2, 1, 0]);
        assert_eq!(proposals[0].top_rule(), Only);
    }
}
