//! Catalogue of candidate templated insertions for one cluster
//!

use std::collections::{BTreeMap, BTreeSet};

use crate::breakpoint::{BreakendDirection, BreakendId};
use crate::cluster::{ChrBreakendMap, Cluster};

use super::linked_pair::LinkedPair;
use super::ploidy_limits::PloidyLimits;

/// All candidate links for a cluster, indexed by breakend
///
/// Pairs are stored in an arena and never deleted, so a pair id remains valid for chain links
/// after the pair is retired from the candidate index. Assembled pairs are also stored in the
/// arena, whether or not they are indexed as candidates.
///
#[derive(Default)]
pub struct CandidateLinks {
    pairs: Vec<LinkedPair>,
    is_active: Vec<bool>,
    pair_ids_by_key: BTreeMap<(BreakendId, BreakendId), usize>,

    /// Active pair ids for each breakend, nearest first
    breakend_pairs: BTreeMap<BreakendId, Vec<usize>>,

    /// SVs which may duplicate a higher ploidy neighbor, connecting to both of its ends
    complex_dup_svs: BTreeSet<usize>,
}

impl CandidateLinks {
    /// Store a pair in the arena without adding it to the candidate index
    ///
    /// Returns the id of the stored pair, or the id of the existing pair with the same breakends.
    ///
    pub fn add_unindexed_pair(&mut self, pair: LinkedPair) -> usize {
        if let Some(&pair_id) = self.pair_ids_by_key.get(&pair.key()) {
            return pair_id;
        }
        let pair_id = self.pairs.len();
        self.pair_ids_by_key.insert(pair.key(), pair_id);
        self.pairs.push(pair);
        self.is_active.push(false);
        pair_id
    }

    fn add_indexed_pair(&mut self, pair: LinkedPair) -> usize {
        let is_adjacent = pair.is_adjacent;
        let pair_id = self.add_unindexed_pair(pair);
        let pair = &mut self.pairs[pair_id];
        pair.is_adjacent |= is_adjacent;
        if !self.is_active[pair_id] {
            self.is_active[pair_id] = true;
            for id in pair.breakends() {
                self.breakend_pairs.entry(id).or_default().push(pair_id);
            }
        }
        pair_id
    }

    /// Enumerate all candidate templated insertions for the given breakends
    ///
    /// Each chromosome is scanned left to right, and each right-anchored breakend is paired with
    /// every following left-anchored breakend on the same arm, until the scan reaches a cluster
    /// ploidy wall.
    ///
    pub fn build(
        &mut self,
        cluster: &Cluster,
        chr_breakend_map: &ChrBreakendMap,
        ploidy_limits: &PloidyLimits,
        is_excluded: &dyn Fn(BreakendId) -> bool,
    ) {
        for (chrom, breakends) in chr_breakend_map.iter() {
            for (lower_index, &lower_id) in breakends.iter().enumerate() {
                let lower = cluster.breakend(lower_id);
                if lower.dir != BreakendDirection::RightAnchor || is_excluded(lower_id) {
                    continue;
                }
                for (upper_index, &upper_id) in breakends.iter().enumerate().skip(lower_index + 1) {
                    let upper = cluster.breakend(upper_id);
                    if upper.arm != lower.arm {
                        break;
                    }
                    if !ploidy_limits.has_ploidy_support(chrom, lower.pos, upper.pos) {
                        break;
                    }
                    if upper.dir != BreakendDirection::LeftAnchor || is_excluded(upper_id) {
                        continue;
                    }
                    if upper_id.sv_index == lower_id.sv_index
                        && !cluster.is_double_minute(lower_id.sv_index)
                    {
                        continue;
                    }
                    if cluster.sv(lower_id.sv_index).is_sgl() && cluster.sv(upper_id.sv_index).is_sgl() {
                        continue;
                    }
                    let Some(mut pair) = LinkedPair::from_breakends(cluster, lower_id, upper_id)
                    else {
                        continue;
                    };
                    if !pair.is_valid_templated_insertion(cluster) {
                        continue;
                    }
                    pair.is_adjacent = upper_index == lower_index + 1
                        || (upper_index == lower_index + 2
                            && cluster
                                .breakend(breakends[lower_index + 1])
                                .deletion_bridge_partner
                                .is_some());
                    self.add_indexed_pair(pair);
                }
            }
        }

        let pairs = &self.pairs;
        for pair_ids in self.breakend_pairs.values_mut() {
            pair_ids.sort_by_key(|&x| (pairs[x].length, pairs[x].key()));
        }
    }

    /// Find SVs whose ploidy suggests they duplicate a higher ploidy neighbor
    ///
    /// Each breakend's nearest candidate partner must be an unassembled breakend on another SV
    /// with at least twice this SV's minimum ploidy.
    ///
    pub fn find_complex_dup_candidates(&mut self, cluster: &Cluster, sv_indexes: &BTreeSet<usize>) {
        for &sv_index in sv_indexes.iter() {
            let sv = cluster.sv(sv_index);
            if sv.is_sgl() || sv.is_foldback() {
                continue;
            }
            let is_candidate = sv.breakend_ids(sv_index).into_iter().all(|id| {
                let nearest_partner = self
                    .breakend_pair_ids(id)
                    .iter()
                    .filter_map(|&x| self.pairs[x].other_breakend(id))
                    .find(|x| x.sv_index != sv_index);
                match nearest_partner {
                    Some(partner) => {
                        !cluster.breakend(partner).is_assembled
                            && 2.0 * sv.ploidy.min <= cluster.sv(partner.sv_index).ploidy.max
                    }
                    None => false,
                }
            });
            if is_candidate {
                self.complex_dup_svs.insert(sv_index);
            }
        }
    }

    /// Retire a breakend and purge every candidate pair which references it
    ///
    /// Any partner breakend left without candidates is removed from the index.
    ///
    pub fn remove_breakend(&mut self, id: BreakendId) {
        let Some(pair_ids) = self.breakend_pairs.remove(&id) else {
            return;
        };
        for pair_id in pair_ids {
            self.is_active[pair_id] = false;
            if let Some(partner) = self.pairs[pair_id].other_breakend(id) {
                self.remove_pair_from_breakend(partner, pair_id);
            }
        }
    }

    /// Retire a single candidate pair
    ///
    pub fn remove_pair(&mut self, pair_id: usize) {
        if !self.is_active[pair_id] {
            return;
        }
        self.is_active[pair_id] = false;
        for id in self.pairs[pair_id].breakends() {
            self.remove_pair_from_breakend(id, pair_id);
        }
    }

    fn remove_pair_from_breakend(&mut self, id: BreakendId, pair_id: usize) {
        if let Some(pair_ids) = self.breakend_pairs.get_mut(&id) {
            pair_ids.retain(|&x| x != pair_id);
            if pair_ids.is_empty() {
                self.breakend_pairs.remove(&id);
            }
        }
    }

    pub fn pair(&self, pair_id: usize) -> &LinkedPair {
        &self.pairs[pair_id]
    }

    pub fn pair_mut(&mut self, pair_id: usize) -> &mut LinkedPair {
        &mut self.pairs[pair_id]
    }

    pub fn is_active(&self, pair_id: usize) -> bool {
        self.is_active[pair_id]
    }

    /// Find an active candidate pair joining the two breakends
    ///
    pub fn find_active_pair(&self, id1: BreakendId, id2: BreakendId) -> Option<usize> {
        self.breakend_pair_ids(id1)
            .iter()
            .copied()
            .find(|&x| self.pairs[x].other_breakend(id1) == Some(id2))
    }

    /// Active candidate pair ids for a breakend, nearest first
    ///
    pub fn breakend_pair_ids(&self, id: BreakendId) -> &[usize] {
        self.breakend_pairs
            .get(&id)
            .map(|x| x.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_breakend(&self, id: BreakendId) -> bool {
        self.breakend_pairs.contains_key(&id)
    }

    pub fn breakends(&self) -> impl Iterator<Item = (&BreakendId, &Vec<usize>)> {
        self.breakend_pairs.iter()
    }

    pub fn active_pair_ids(&self) -> Vec<usize> {
        self.is_active
            .iter()
            .enumerate()
            .filter(|&(_, &x)| x)
            .map(|(pair_id, _)| pair_id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.breakend_pairs.is_empty()
    }

    pub fn complex_dup_svs(&self) -> &BTreeSet<usize> {
        &self.complex_dup_svs
    }

    pub fn remove_complex_dup(&mut self, sv_index: usize) {
        self.complex_dup_svs.remove(&sv_index);
    }
}
