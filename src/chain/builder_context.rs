//! Mutable chaining state for one cluster
//!

use std::collections::{BTreeMap, BTreeSet};

use crate::breakpoint::BreakendId;
use crate::cluster::{ChrBreakendMap, Cluster};

use super::ChainingConfig;
use super::candidate_links::CandidateLinks;
use super::chain_state::SvChainState;
use super::ploidy_limits::PloidyLimits;
use super::proposed_links::ChainingRule;
use super::sv_chain::SVChain;

/// All state read by the rule selector and mutated by the link allocator
///
/// A fresh context is built for every cluster, and nothing in it is shared between clusters.
///
pub struct ChainBuilderContext<'a> {
    pub cluster: &'a Cluster,
    pub config: ChainingConfig,

    /// SVs included in this chaining run, indexed into the full cluster SV list
    pub sv_indexes: BTreeSet<usize>,

    pub requires_replication: bool,
    pub chr_breakend_map: ChrBreakendMap,
    pub ploidy_limits: PloidyLimits,
    pub candidates: CandidateLinks,

    /// Live allocation state for SVs with unlinked ploidy remaining
    pub chain_states: BTreeMap<usize, SvChainState>,

    /// Allocation state for SVs with all breakends exhausted
    pub completed_states: BTreeMap<usize, SvChainState>,

    pub chains: BTreeMap<usize, SVChain>,

    /// Active foldbacks, each given as the two breakends which fold back onto each other
    pub foldbacks: BTreeSet<(BreakendId, BreakendId)>,

    /// Candidate pairs which were deferred because they would close a chain prematurely
    pub skipped_pairs: BTreeSet<usize>,

    /// Number of links placed under each top rule
    pub rule_counts: BTreeMap<ChainingRule, usize>,

    /// Number of assembled links placed from each breakend
    pub assembled_link_counts: BTreeMap<BreakendId, usize>,

    /// Rule passes run over the cluster
    pub iterations: usize,

    next_chain_id: usize,
    next_instance_id: usize,
    link_count: usize,

    pub debug: bool,
}

impl<'a> ChainBuilderContext<'a> {
    pub fn new(cluster: &'a Cluster, config: &ChainingConfig, sv_indexes: BTreeSet<usize>) -> Self {
        let debug = config.debug;
        let chr_breakend_map = cluster.get_chr_breakend_map(&sv_indexes);
        let ploidy_limits = if config.use_allele_ploidies {
            PloidyLimits::new(cluster, &chr_breakend_map, debug)
        } else {
            PloidyLimits::default()
        };

        let chain_states = sv_indexes
            .iter()
            .map(|&sv_index| {
                let state =
                    SvChainState::new(sv_index, cluster.sv(sv_index), cluster.requires_replication);
                (sv_index, state)
            })
            .collect();

        let mut foldbacks = BTreeSet::new();
        for &sv_index in sv_indexes.iter() {
            let sv = cluster.sv(sv_index);
            for (breakend_index, partner) in sv.foldback_partners.iter().enumerate() {
                let Some(partner) = *partner else {
                    continue;
                };
                let id = BreakendId::new(sv_index, breakend_index);
                if id < partner && sv_indexes.contains(&partner.sv_index) {
                    foldbacks.insert((id, partner));
                }
            }
        }

        Self {
            cluster,
            config: config.clone(),
            sv_indexes,
            requires_replication: cluster.requires_replication,
            chr_breakend_map,
            ploidy_limits,
            candidates: CandidateLinks::default(),
            chain_states,
            completed_states: BTreeMap::new(),
            chains: BTreeMap::new(),
            foldbacks,
            skipped_pairs: BTreeSet::new(),
            rule_counts: BTreeMap::new(),
            assembled_link_counts: BTreeMap::new(),
            iterations: 0,
            next_chain_id: 0,
            next_instance_id: 0,
            link_count: 0,
            debug,
        }
    }

    /// Build the candidate link catalogue for all breakends with ploidy left to link
    ///
    /// Breakends already exhausted, or whose assembled links have used all of their SV's
    /// replicated copies, are excluded. Assembled pairs already stored are kept.
    ///
    pub fn build_candidates(&mut self) {
        let mut candidates = std::mem::take(&mut self.candidates);
        let is_excluded = |id: BreakendId| {
            let assembled_link_count = self.assembled_link_counts.get(&id).copied().unwrap_or(0);
            self.is_exhausted(id)
                || (assembled_link_count > 0
                    && assembled_link_count >= self.cluster.sv(id.sv_index).replication_count)
        };
        candidates.build(
            self.cluster,
            &self.chr_breakend_map,
            &self.ploidy_limits,
            &is_excluded,
        );
        if self.requires_replication {
            candidates.find_complex_dup_candidates(self.cluster, &self.sv_indexes);
        }
        self.candidates = candidates;
    }

    pub fn next_chain_id(&mut self) -> usize {
        let id = self.next_chain_id;
        self.next_chain_id += 1;
        id
    }

    pub fn next_instance_id(&mut self) -> usize {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        id
    }

    /// Mutable access to the instance id counter, for copying whole chains
    ///
    pub fn instance_id_counter(&mut self) -> &mut usize {
        &mut self.next_instance_id
    }

    /// Get the index of the next placed link
    ///
    pub fn next_link_index(&mut self) -> usize {
        let index = self.link_count;
        self.link_count += 1;
        index
    }

    pub fn link_count(&self) -> usize {
        self.link_count
    }

    pub fn sv_state(&self, sv_index: usize) -> Option<&SvChainState> {
        self.chain_states
            .get(&sv_index)
            .or_else(|| self.completed_states.get(&sv_index))
    }

    pub fn unlinked_ploidy(&self, id: BreakendId) -> f64 {
        self.chain_states
            .get(&id.sv_index)
            .map_or(0.0, |x| x.unlinked_ploidy(id.breakend_index))
    }

    pub fn max_unlinked_ploidy(&self, id: BreakendId) -> f64 {
        self.chain_states
            .get(&id.sv_index)
            .map_or(0.0, |x| x.max_unlinked_ploidy(id.breakend_index))
    }

    pub fn ploidy_uncertainty(&self, id: BreakendId) -> f64 {
        self.sv_state(id.sv_index)
            .map_or(0.0, |x| x.ploidy_uncertainty)
    }

    pub fn is_exhausted(&self, id: BreakendId) -> bool {
        match self.chain_states.get(&id.sv_index) {
            Some(state) => state.is_exhausted(id.breakend_index),
            None => true,
        }
    }

    /// True if no breakend of the SV has been linked yet
    ///
    pub fn is_unlinked_sv(&self, sv_index: usize) -> bool {
        self.chain_states.get(&sv_index).is_some_and(|state| {
            (0..state.breakend_count()).all(|breakend_index| !state.is_linked(breakend_index))
        })
    }

    /// Find the lowest id chain with the given breakend at one of its open ends
    ///
    /// Returns the chain id and true if the breakend is at the chain start.
    ///
    pub fn find_open_chain(&self, id: BreakendId, exclude_chain: Option<usize>) -> Option<(usize, bool)> {
        for (&chain_id, chain) in self.chains.iter() {
            if Some(chain_id) == exclude_chain {
                continue;
            }
            if chain.open_breakend(true) == Some(id) {
                return Some((chain_id, true));
            }
            if chain.open_breakend(false) == Some(id) {
                return Some((chain_id, false));
            }
        }
        None
    }

    /// Find a chain whose two open ends are the given breakends, in either order
    ///
    pub fn find_chain_with_open_ends(&self, id1: BreakendId, id2: BreakendId) -> Option<usize> {
        self.chains
            .iter()
            .find(|(_, chain)| {
                let start = chain.open_breakend(true);
                let end = chain.open_breakend(false);
                (start == Some(id1) && end == Some(id2)) || (start == Some(id2) && end == Some(id1))
            })
            .map(|(&chain_id, _)| chain_id)
    }

    /// Active candidate pairs for a breakend which have not been skipped in this pass
    ///
    pub fn available_pair_ids(&self, id: BreakendId) -> impl Iterator<Item = usize> + '_ {
        self.candidates
            .breakend_pair_ids(id)
            .iter()
            .copied()
            .filter(|x| !self.skipped_pairs.contains(x))
    }

    /// All active candidate pairs which have not been skipped in this pass
    ///
    pub fn available_pairs(&self) -> Vec<usize> {
        self.candidates
            .active_pair_ids()
            .into_iter()
            .filter(|x| !self.skipped_pairs.contains(x))
            .collect()
    }

    /// Find an available candidate pair joining the two breakends
    ///
    pub fn find_available_pair(&self, id1: BreakendId, id2: BreakendId) -> Option<usize> {
        self.candidates
            .find_active_pair(id1, id2)
            .filter(|x| !self.skipped_pairs.contains(x))
    }
}
