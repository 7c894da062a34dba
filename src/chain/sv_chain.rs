//! Chain structure: an ordered path of links through the SVs of a cluster
//!

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::breakpoint::BreakendId;
use crate::cluster::Cluster;
use crate::int_range::IntRange;

use super::candidate_links::CandidateLinks;
use super::linked_pair::{LinkType, LinkedPair};
use super::proposed_links::ChainingRule;

/// One placement of a linked pair in a chain
///
/// The link is oriented along the chain, running from `first` to `second`. Consecutive links
/// are joined through the SV of `second`, so the next link starts from `second_other`.
///
#[derive(Clone, Debug)]
pub struct ChainLink {
    pub pair_id: usize,
    pub first: BreakendId,
    pub second: BreakendId,
    pub first_other: Option<BreakendId>,
    pub second_other: Option<BreakendId>,

    /// Unique within the cluster, each placement of a pair gets its own instance
    pub instance_id: usize,

    pub link_reason: ChainingRule,
    pub link_index: usize,
}

impl ChainLink {
    pub fn new(
        cluster: &Cluster,
        pair_id: usize,
        first: BreakendId,
        second: BreakendId,
        instance_id: usize,
        link_reason: ChainingRule,
        link_index: usize,
    ) -> Self {
        Self {
            pair_id,
            first,
            second,
            first_other: cluster.other_breakend(first),
            second_other: cluster.other_breakend(second),
            instance_id,
            link_reason,
            link_index,
        }
    }

    fn reverse(&mut self) {
        std::mem::swap(&mut self.first, &mut self.second);
        std::mem::swap(&mut self.first_other, &mut self.second_other);
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ChainMetrics {
    /// Templated insertions within the genomic bounds of the chain's open breakends
    pub internal_ti_count: usize,
    pub external_ti_count: usize,
    pub deletion_bridge_count: usize,
    pub assembled_link_count: usize,
}

#[derive(Clone)]
pub struct SVChain {
    pub id: usize,
    links: Vec<ChainLink>,
    pub ploidy: f64,
    pub ploidy_uncertainty: f64,
    is_closed: bool,

    /// Number of structurally identical chains merged into this one during deduplication
    pub duplicate_count: usize,
}

impl SVChain {
    /// Start a chain from a single link
    ///
    /// A link joining the two breakends of one SV closes the chain immediately.
    ///
    pub fn new(id: usize, link: ChainLink, ploidy: f64, ploidy_uncertainty: f64) -> Self {
        let is_closed = link.second_other == Some(link.first);
        Self {
            id,
            links: vec![link],
            ploidy,
            ploidy_uncertainty,
            is_closed,
            duplicate_count: 0,
        }
    }

    /// Build a chain from a connected link sequence
    ///
    pub fn from_links(
        id: usize,
        links: Vec<ChainLink>,
        ploidy: f64,
        ploidy_uncertainty: f64,
    ) -> Self {
        Self {
            id,
            links,
            ploidy,
            ploidy_uncertainty,
            is_closed: false,
            duplicate_count: 0,
        }
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// The breakend through which the chain can be extended at either end
    ///
    /// This is None if the chain is closed, or if the terminal SV is a single breakend.
    ///
    pub fn open_breakend(&self, is_start: bool) -> Option<BreakendId> {
        if self.is_closed {
            return None;
        }
        if is_start {
            self.links.first().and_then(|x| x.first_other)
        } else {
            self.links.last().and_then(|x| x.second_other)
        }
    }

    /// The linked breakend at either end of the chain
    ///
    pub fn terminal_breakend(&self, is_start: bool) -> Option<BreakendId> {
        if is_start {
            self.links.first().map(|x| x.first)
        } else {
            self.links.last().map(|x| x.second)
        }
    }

    /// Test whether the pair can extend the chain at the given end
    ///
    /// When both open ends are the same breakend, the pair is only accepted at the chain end.
    ///
    pub fn can_add_linked_pair(&self, pair: &LinkedPair, is_start: bool) -> bool {
        let Some(open_breakend) = self.open_breakend(is_start) else {
            return false;
        };
        if is_start && self.open_breakend(false) == Some(open_breakend) {
            return false;
        }
        pair.has_breakend(open_breakend)
    }

    /// Test whether the pair joins the two open ends of the chain into a loop
    ///
    pub fn link_would_close_chain(&self, pair: &LinkedPair) -> bool {
        match (self.open_breakend(true), self.open_breakend(false)) {
            (Some(start), Some(end)) if start != end => {
                pair.has_breakend(start) && pair.has_breakend(end)
            }
            _ => false,
        }
    }

    /// Extend the chain with a linked pair at either end, closing the chain if the pair joins
    /// both open ends
    ///
    /// Returns false if the pair cannot be added at the requested end.
    ///
    #[allow(clippy::too_many_arguments)]
    pub fn add_linked_pair(
        &mut self,
        cluster: &Cluster,
        pair_id: usize,
        pair: &LinkedPair,
        is_start: bool,
        instance_id: usize,
        link_reason: ChainingRule,
        link_index: usize,
    ) -> bool {
        if !self.can_add_linked_pair(pair, is_start) {
            return false;
        }
        let closes_chain = self.link_would_close_chain(pair);
        let Some(open_breakend) = self.open_breakend(is_start) else {
            return false;
        };
        let Some(partner) = pair.other_breakend(open_breakend) else {
            return false;
        };
        if is_start {
            let link = ChainLink::new(
                cluster,
                pair_id,
                partner,
                open_breakend,
                instance_id,
                link_reason,
                link_index,
            );
            self.links.insert(0, link);
        } else {
            let link = ChainLink::new(
                cluster,
                pair_id,
                open_breakend,
                partner,
                instance_id,
                link_reason,
                link_index,
            );
            self.links.push(link);
        }
        if closes_chain {
            self.is_closed = true;
        }
        true
    }

    /// Append all links of another chain, which must continue from this chain's end
    ///
    pub fn append_chain(&mut self, other: SVChain) {
        self.links.extend(other.links);
    }

    /// Reverse the direction of the chain
    ///
    pub fn reverse(&mut self) {
        self.links.reverse();
        for link in self.links.iter_mut() {
            link.reverse();
        }
    }

    /// Get the links of the reversed chain without modifying this chain
    ///
    pub fn reversed_links(&self) -> Vec<ChainLink> {
        let mut chain = self.clone();
        chain.reverse();
        chain.links
    }

    /// Structural copy of the chain, with fresh link instance ids
    ///
    pub fn copy_with_new_instances(&self, id: usize, next_instance_id: &mut usize) -> Self {
        let mut chain = self.clone();
        chain.id = id;
        chain.duplicate_count = 0;
        for link in chain.links.iter_mut() {
            link.instance_id = *next_instance_id;
            *next_instance_id += 1;
        }
        chain
    }

    /// SVs in the order they are traversed by the chain, including repeats
    ///
    pub fn svs(&self) -> Vec<usize> {
        let mut svs = Vec::new();
        if let Some(link) = self.links.first() {
            svs.push(link.first.sv_index);
        }
        svs.extend(self.links.iter().map(|x| x.second.sv_index));
        if self.is_closed {
            svs.pop();
        }
        svs
    }

    pub fn sv_indexes(&self) -> BTreeSet<usize> {
        self.svs().into_iter().collect()
    }

    pub fn has_sv(&self, sv_index: usize) -> bool {
        self.links
            .iter()
            .any(|x| x.first.sv_index == sv_index || x.second.sv_index == sv_index)
    }

    pub fn pair_ids(&self) -> Vec<usize> {
        self.links.iter().map(|x| x.pair_id).collect()
    }

    /// Test for structural identity with another chain, in either direction
    ///
    /// With `allow_subset`, this chain is also identical if its link sequence occurs contiguously
    /// within the other chain.
    ///
    pub fn identical_chain(&self, other: &SVChain, allow_subset: bool) -> bool {
        let pair_ids = self.pair_ids();
        let reverse_pair_ids = pair_ids.iter().rev().copied().collect::<Vec<_>>();
        let other_pair_ids = other.pair_ids();

        if other_pair_ids == pair_ids || other_pair_ids == reverse_pair_ids {
            return true;
        }

        if !allow_subset || pair_ids.is_empty() || pair_ids.len() > other_pair_ids.len() {
            return false;
        }
        other_pair_ids
            .windows(pair_ids.len())
            .any(|x| x == pair_ids.as_slice() || x == reverse_pair_ids.as_slice())
    }

    /// Genomic bounds of the chain, defined by its two open breakends when they lie on the same
    /// chromosome arm
    ///
    fn get_open_bounds(&self, cluster: &Cluster) -> Option<(String, IntRange)> {
        let start = cluster.breakend(self.open_breakend(true)?);
        let end = cluster.breakend(self.open_breakend(false)?);
        if start.chrom != end.chrom || start.arm != end.arm {
            return None;
        }
        Some((
            start.chrom.clone(),
            IntRange::from_unordered_pair(start.pos, end.pos),
        ))
    }

    pub fn get_metrics(&self, cluster: &Cluster, candidates: &CandidateLinks) -> ChainMetrics {
        let mut metrics = ChainMetrics::default();
        let bounds = self.get_open_bounds(cluster);
        for link in self.links.iter() {
            let pair = candidates.pair(link.pair_id);
            if pair.is_assembled {
                metrics.assembled_link_count += 1;
            }
            if pair.link_type != LinkType::TemplatedInsertion {
                continue;
            }
            let lower = cluster.breakend(pair.lower);
            let upper = cluster.breakend(pair.upper);
            let is_internal = match &bounds {
                Some((chrom, range)) => {
                    *chrom == lower.chrom
                        && range.contains_range(&IntRange::from_unordered_pair(lower.pos, upper.pos))
                }
                None => false,
            };
            if is_internal {
                metrics.internal_ti_count += 1;
            } else {
                metrics.external_ti_count += 1;
            }
        }

        let sv_indexes = self.sv_indexes();
        let mut deletion_bridges = BTreeSet::new();
        for &sv_index in sv_indexes.iter() {
            for id in cluster.sv(sv_index).breakend_ids(sv_index) {
                if let Some(partner) = cluster.breakend(id).deletion_bridge_partner {
                    if partner.sv_index != sv_index && sv_indexes.contains(&partner.sv_index) {
                        deletion_bridges.insert((std::cmp::min(id, partner), std::cmp::max(id, partner)));
                    }
                }
            }
        }
        metrics.deletion_bridge_count = deletion_bridges.len();
        metrics
    }

    /// Check the chain's internal consistency
    ///
    pub fn validate(&self) -> Result<(), String> {
        if self.links.is_empty() {
            return Err(format!("Chain {} has no links", self.id));
        }
        if !self.ploidy.is_finite() || self.ploidy < 0.0 {
            return Err(format!("Chain {} has invalid ploidy {}", self.id, self.ploidy));
        }
        for (link_index, link) in self.links.iter().enumerate() {
            if link.first == link.second {
                return Err(format!(
                    "Chain {} link {link_index} joins breakend {} to itself",
                    self.id, link.first
                ));
            }
        }
        for (link_index, links) in self.links.windows(2).enumerate() {
            if links[0].second_other != Some(links[1].first) {
                return Err(format!(
                    "Chain {} link {} starting at {} does not continue from link ending at {}",
                    self.id,
                    link_index + 1,
                    links[1].first,
                    links[0].second
                ));
            }
        }
        if self.is_closed {
            let first = &self.links[0];
            let last = &self.links[self.links.len() - 1];
            if last.second_other != Some(first.first) {
                return Err(format!("Chain {} is closed without a connecting link", self.id));
            }
        }
        let sv_indexes = self.sv_indexes();
        for link in self.links.iter() {
            for id in [link.first, link.second] {
                if !sv_indexes.contains(&id.sv_index) {
                    return Err(format!(
                        "Chain {} link breakend {id} is missing from the chain SV list",
                        self.id
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SVChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Chain {} ploidy: {:.2}±{:.2} closed: {} links:",
            self.id, self.ploidy, self.ploidy_uncertainty, self.is_closed
        )?;
        for link in self.links.iter() {
            write!(f, " {}-{}", link.first, link.second)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakendDirection;
    use crate::cluster::test_utils::*;

    /// Three deletions a, b, c on chr1, with candidate links a.end-b.start and b.end-c.start
    fn get_three_del_cluster() -> Cluster {
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 500, 700, 1.0),
            get_test_del("c", "chr1", 900, 1100, 1.0),
        ];
        get_test_cluster(svs, false)
    }

    fn get_pair(cluster: &Cluster, id1: BreakendId, id2: BreakendId) -> LinkedPair {
        LinkedPair::from_breakends(cluster, id1, id2).unwrap()
    }

    fn get_link(cluster: &Cluster, pair_id: usize, first: BreakendId, second: BreakendId, instance_id: usize) -> ChainLink {
        ChainLink::new(
            cluster,
            pair_id,
            first,
            second,
            instance_id,
            ChainingRule::Nearest,
            instance_id,
        )
    }

    #[test]
    fn test_open_breakends() {
        let cluster = get_three_del_cluster();
        let link = get_link(&cluster, 0, BreakendId::new(0, 1), BreakendId::new(1, 0), 0);
        let chain = SVChain::new(0, link, 1.0, 0.0);
        assert!(!chain.is_closed());
        assert_eq!(chain.open_breakend(true), Some(BreakendId::new(0, 0)));
        assert_eq!(chain.open_breakend(false), Some(BreakendId::new(1, 1)));
        assert_eq!(chain.terminal_breakend(false), Some(BreakendId::new(1, 0)));
        assert_eq!(chain.svs(), vec![0, 1]);
    }

    #[test]
    fn test_add_linked_pair() {
        let cluster = get_three_del_cluster();
        let pair1 = get_pair(&cluster, BreakendId::new(0, 1), BreakendId::new(1, 0));
        let pair2 = get_pair(&cluster, BreakendId::new(1, 1), BreakendId::new(2, 0));

        let link = get_link(&cluster, 1, BreakendId::new(1, 1), BreakendId::new(2, 0), 0);
        let mut chain = SVChain::new(0, link, 1.0, 0.0);
        assert!(!chain.can_add_linked_pair(&pair1, false));
        assert!(chain.can_add_linked_pair(&pair1, true));
        assert!(!chain.link_would_close_chain(&pair1));
        assert!(!chain.add_linked_pair(&cluster, 0, &pair1, false, 1, ChainingRule::Nearest, 1));
        assert!(chain.add_linked_pair(&cluster, 0, &pair1, true, 1, ChainingRule::Nearest, 1));

        assert_eq!(chain.pair_ids(), vec![0, 1]);
        assert_eq!(chain.svs(), vec![0, 1, 2]);
        assert_eq!(chain.links()[0].first, BreakendId::new(0, 1));
        assert_eq!(chain.links()[0].second, BreakendId::new(1, 0));
        assert!(chain.validate().is_ok());
        assert!(!chain.can_add_linked_pair(&pair2, false));
    }

    #[test]
    fn test_reverse() {
        let cluster = get_three_del_cluster();
        let links = vec![
            get_link(&cluster, 0, BreakendId::new(0, 1), BreakendId::new(1, 0), 0),
            get_link(&cluster, 1, BreakendId::new(1, 1), BreakendId::new(2, 0), 1),
        ];
        let mut chain = SVChain::from_links(0, links, 1.0, 0.0);
        assert!(chain.validate().is_ok());
        chain.reverse();
        assert!(chain.validate().is_ok());
        assert_eq!(chain.pair_ids(), vec![1, 0]);
        assert_eq!(chain.svs(), vec![2, 1, 0]);
        assert_eq!(chain.open_breakend(true), Some(BreakendId::new(2, 1)));
        assert_eq!(chain.open_breakend(false), Some(BreakendId::new(0, 0)));
    }

    #[test]
    fn test_close_chain() {
        // Duplication-style SVs a and b linked in a loop:
        let svs = vec![
            get_test_dup("a", "chr1", 100, 300, 1.0),
            get_test_dup("b", "chr1", 200, 400, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);

        // a.end(300 L) with b.start(200 R) and b.end(400 L) with a.start(100 R)
        let pair1 = get_pair(&cluster, BreakendId::new(0, 1), BreakendId::new(1, 0));
        let pair2 = get_pair(&cluster, BreakendId::new(1, 1), BreakendId::new(0, 0));

        let link = get_link(&cluster, 0, BreakendId::new(0, 1), BreakendId::new(1, 0), 0);
        let mut chain = SVChain::new(0, link, 1.0, 0.0);

        // The placed pair touches neither open end:
        assert!(!chain.can_add_linked_pair(&pair1, true));
        assert!(!chain.can_add_linked_pair(&pair1, false));
        assert!(!chain.link_would_close_chain(&pair1));

        // Closure is detected exactly when both ends accept the pair:
        assert!(chain.link_would_close_chain(&pair2));
        assert!(chain.can_add_linked_pair(&pair2, true));
        assert!(chain.can_add_linked_pair(&pair2, false));

        assert!(chain.add_linked_pair(&cluster, 1, &pair2, false, 1, ChainingRule::Nearest, 1));
        assert!(chain.is_closed());
        assert_eq!(chain.open_breakend(true), None);
        assert!(!chain.can_add_linked_pair(&pair1, false));
        assert_eq!(chain.svs(), vec![0, 1]);
        assert!(chain.validate().is_ok());
    }

    #[test]
    fn test_same_breakend_open_ends() {
        // Foldback 'f' folded onto the end of 'x'
        let svs = vec![
            get_test_del("w", "chr1", 10, 50, 1.0),
            get_test_del("x", "chr1", 100, 300, 2.0),
            get_test_inv("f", "chr1", 500, 600, BreakendDirection::LeftAnchor, 1.0),
        ];
        let cluster = get_test_cluster(svs, true);
        let links = vec![
            get_link(&cluster, 0, BreakendId::new(1, 1), BreakendId::new(2, 0), 0),
            get_link(&cluster, 1, BreakendId::new(2, 1), BreakendId::new(1, 1), 1),
        ];
        let chain = SVChain::from_links(0, links, 1.0, 0.0);
        assert!(chain.validate().is_ok());
        assert_eq!(chain.open_breakend(true), Some(BreakendId::new(1, 0)));
        assert_eq!(chain.open_breakend(true), chain.open_breakend(false));

        let pair = get_pair(&cluster, BreakendId::new(0, 1), BreakendId::new(1, 0));
        assert!(!chain.can_add_linked_pair(&pair, true));
        assert!(chain.can_add_linked_pair(&pair, false));
        assert!(!chain.link_would_close_chain(&pair));
    }

    #[test]
    fn test_identical_chain() {
        let cluster = get_three_del_cluster();
        let links = vec![
            get_link(&cluster, 0, BreakendId::new(0, 1), BreakendId::new(1, 0), 0),
            get_link(&cluster, 1, BreakendId::new(1, 1), BreakendId::new(2, 0), 1),
        ];
        let chain = SVChain::from_links(0, links, 1.0, 0.0);
        let mut next_instance_id = 2;
        let mut copy = chain.copy_with_new_instances(1, &mut next_instance_id);
        assert_eq!(next_instance_id, 4);
        assert_eq!(copy.links()[0].instance_id, 2);
        assert!(chain.identical_chain(&copy, false));
        copy.reverse();
        assert!(chain.identical_chain(&copy, false));

        let short = SVChain::new(
            2,
            get_link(&cluster, 1, BreakendId::new(1, 1), BreakendId::new(2, 0), 4),
            1.0,
            0.0,
        );
        assert!(!short.identical_chain(&chain, false));
        assert!(short.identical_chain(&chain, true));
        assert!(!chain.identical_chain(&short, true));
    }

    #[test]
    fn test_metrics() {
        let cluster = get_three_del_cluster();
        let mut candidates = CandidateLinks::default();
        let pair_id1 = candidates.add_unindexed_pair(get_pair(&cluster, BreakendId::new(0, 1), BreakendId::new(1, 0)));
        let pair_id2 = candidates.add_unindexed_pair(get_pair(&cluster, BreakendId::new(1, 1), BreakendId::new(2, 0)));
        let links = vec![
            get_link(&cluster, pair_id1, BreakendId::new(0, 1), BreakendId::new(1, 0), 0),
            get_link(&cluster, pair_id2, BreakendId::new(1, 1), BreakendId::new(2, 0), 1),
        ];
        let chain = SVChain::from_links(0, links, 1.0, 0.0);
        let metrics = chain.get_metrics(&cluster, &candidates);
        assert_eq!(metrics.internal_ti_count, 2);
        assert_eq!(metrics.external_ti_count, 0);
        assert_eq!(metrics.deletion_bridge_count, 0);
    }

    #[test]
    fn test_validate_broken_chain() {
        let cluster = get_three_del_cluster();
        let links = vec![
            get_link(&cluster, 0, BreakendId::new(0, 1), BreakendId::new(1, 0), 0),
            get_link(&cluster, 1, BreakendId::new(2, 0), BreakendId::new(1, 1), 1),
        ];
        let chain = SVChain::from_links(0, links, 1.0, 0.0);
        assert!(chain.validate().is_err());
    }
}
