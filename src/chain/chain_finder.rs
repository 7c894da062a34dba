//! Top-level chaining driver for one cluster
//!

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::breakpoint::BreakendId;
use crate::cluster::Cluster;
use crate::log_utils::debug_msg;

use super::builder_context::ChainBuilderContext;
use super::link_allocator::{link_assembled_pairs, process_proposals};
use super::proposed_links::ChainingRule;
use super::rule_selector::find_proposed_links;
use super::sv_chain::SVChain;
use super::{ChainRecord, ChainingConfig, ChainingFailure, LinkRecord, STALLED_ITERATION_LIMIT};

#[derive(Clone, Debug, PartialEq)]
pub enum ChainingStatus {
    Pending,
    Complete,
    Failed(ChainingFailure),
}

impl ChainingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
        }
    }

    pub fn failure(&self) -> Option<&ChainingFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for ChainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Failed(failure) => write!(f, "{}: {failure}", self.label()),
            _ => write!(f, "{}", self.label()),
        }
    }
}

/// Chaining summary statistics for one cluster
///
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChainingDiagnostics {
    pub iterations: usize,
    pub link_count: usize,
    pub chain_count: usize,
    pub unique_chain_count: usize,

    /// Breakends without any link in any chain
    pub unlinked_breakend_count: usize,

    /// SVs without any linked breakend
    pub unlinked_sv_count: usize,

    /// Percent of allele ploidy segments usable for cluster ploidy walls
    pub valid_segment_percent: f64,

    /// Links placed under each top rule
    pub rule_counts: BTreeMap<String, usize>,
}

/// Tracks consecutive rule passes which place no new link
///
#[derive(Default)]
struct StallCounter {
    stalled_passes: usize,
}

impl StallCounter {
    /// Record the links placed in one rule pass
    ///
    /// Returns true once the limit of consecutive passes without a new link is reached.
    ///
    fn record_pass(&mut self, link_count: usize) -> bool {
        if link_count > 0 {
            self.stalled_passes = 0;
        } else {
            self.stalled_passes += 1;
        }
        self.stalled_passes >= STALLED_ITERATION_LIMIT
    }
}

pub struct ChainFinder<'a> {
    ctx: ChainBuilderContext<'a>,
    status: ChainingStatus,

    /// Chains remaining after structural duplicates are collapsed
    unique_chains: Vec<SVChain>,
}

impl<'a> ChainFinder<'a> {
    /// Setup chaining over all SVs in the cluster
    ///
    pub fn new(cluster: &'a Cluster, config: &ChainingConfig) -> Self {
        Self::from_context(ChainBuilderContext::new(
            cluster,
            config,
            cluster.all_sv_indexes(),
        ))
    }

    /// Setup chaining over a subset of the cluster SVs
    ///
    pub fn new_for_sv_subset(
        cluster: &'a Cluster,
        config: &ChainingConfig,
        sv_indexes: &BTreeSet<usize>,
    ) -> Result<Self, ChainingFailure> {
        if let Some(&sv_index) = sv_indexes.iter().find(|&&x| x >= cluster.svs.len()) {
            return Err(ChainingFailure::InvalidInput(format!(
                "SV index {sv_index} is out of range for cluster {} with {} SVs",
                cluster.cluster_id,
                cluster.svs.len()
            )));
        }
        Ok(Self::from_context(ChainBuilderContext::new(
            cluster,
            config,
            sv_indexes.clone(),
        )))
    }

    fn from_context(ctx: ChainBuilderContext<'a>) -> Self {
        Self {
            ctx,
            status: ChainingStatus::Pending,
            unique_chains: Vec::new(),
        }
    }

    /// Run all chaining steps to completion
    ///
    /// With `assembled_links_only`, chaining stops after the assembled links are placed.
    ///
    /// On failure the status records the reason and no unique chains are reported.
    ///
    pub fn form_chains(&mut self, assembled_links_only: bool) -> Result<(), ChainingFailure> {
        let result = self.run_chaining(assembled_links_only);
        match &result {
            Ok(()) => {
                self.finalize();
                self.status = ChainingStatus::Complete;
            }
            Err(failure) => {
                self.unique_chains.clear();
                self.status = ChainingStatus::Failed(failure.clone());
            }
        }
        debug_msg!(
            self.ctx.debug,
            "Cluster {}: chaining {} after {} iterations with {} links in {} chains",
            self.ctx.cluster.cluster_id,
            self.status,
            self.ctx.iterations,
            self.ctx.link_count(),
            self.ctx.chains.len()
        );
        result
    }

    fn run_chaining(&mut self, assembled_links_only: bool) -> Result<(), ChainingFailure> {
        let ctx = &mut self.ctx;
        link_assembled_pairs(ctx)?;
        ctx.build_candidates();
        if assembled_links_only {
            return Ok(());
        }

        let mut stall_counter = StallCounter::default();
        loop {
            ctx.iterations += 1;
            let proposals = find_proposed_links(ctx);
            let link_count = if proposals.is_empty() {
                if ctx.skipped_pairs.is_empty() {
                    return Ok(());
                }
                // Retry all deferred pairs in the next pass
                ctx.skipped_pairs.clear();
                0
            } else {
                process_proposals(ctx, &proposals)?
            };

            if stall_counter.record_pass(link_count) {
                return Err(ChainingFailure::Stalled {
                    iterations: ctx.iterations,
                });
            }
        }
    }

    /// Record pair repeat counts and collapse duplicate chains
    ///
    fn finalize(&mut self) {
        let mut repeat_counts = BTreeMap::new();
        for chain in self.ctx.chains.values() {
            for link in chain.links() {
                *repeat_counts.entry(link.pair_id).or_insert(0) += 1;
            }
        }
        for (pair_id, repeat_count) in repeat_counts {
            self.ctx.candidates.pair_mut(pair_id).repeat_count = repeat_count;
        }

        let chains = self.ctx.chains.values().cloned().collect::<Vec<_>>();
        self.unique_chains = if self.ctx.requires_replication {
            deduplicate_chains(chains)
        } else {
            chains
        };
    }

    pub fn status(&self) -> &ChainingStatus {
        &self.status
    }

    pub fn diagnostics(&self) -> ChainingDiagnostics {
        let ctx = &self.ctx;
        let mut unlinked_breakend_count = 0;
        let mut unlinked_sv_count = 0;
        for &sv_index in ctx.sv_indexes.iter() {
            let Some(state) = ctx.sv_state(sv_index) else {
                continue;
            };
            let unlinked_count = (0..state.breakend_count())
                .filter(|&x| !state.is_linked(x))
                .count();
            unlinked_breakend_count += unlinked_count;
            if unlinked_count == state.breakend_count() {
                unlinked_sv_count += 1;
            }
        }

        let rule_counts = ChainingRule::iter()
            .map(|rule| {
                let count = ctx.rule_counts.get(&rule).copied().unwrap_or(0);
                (rule.to_string(), count)
            })
            .collect();

        ChainingDiagnostics {
            iterations: ctx.iterations,
            link_count: ctx.link_count(),
            chain_count: ctx.chains.len(),
            unique_chain_count: self.unique_chains.len(),
            unlinked_breakend_count,
            unlinked_sv_count,
            valid_segment_percent: ctx.ploidy_limits.valid_segment_percent(),
            rule_counts,
        }
    }

    fn breakend_label(&self, id: BreakendId) -> String {
        let label = if id.is_start() { "s" } else { "e" };
        format!("{}:{label}", self.ctx.cluster.sv(id.sv_index).id)
    }

    pub fn get_chain_records(&self) -> Vec<ChainRecord> {
        let cluster = self.ctx.cluster;
        self.unique_chains
            .iter()
            .map(|chain| ChainRecord {
                chain_id: chain.id,
                ploidy: chain.ploidy,
                ploidy_uncertainty: chain.ploidy_uncertainty,
                link_count: chain.link_count(),
                sv_count: chain.sv_indexes().len(),
                is_closed: chain.is_closed(),
                metrics: chain.get_metrics(cluster, &self.ctx.candidates),
                duplicate_count: chain.duplicate_count,
                sv_path: chain
                    .svs()
                    .into_iter()
                    .map(|x| cluster.sv(x).id.clone())
                    .collect(),
            })
            .collect()
    }

    pub fn get_link_records(&self) -> Vec<LinkRecord> {
        let mut records = Vec::new();
        for chain in self.unique_chains.iter() {
            for (chain_position, link) in chain.links().iter().enumerate() {
                let pair = self.ctx.candidates.pair(link.pair_id);
                records.push(LinkRecord {
                    chain_id: chain.id,
                    chain_position,
                    link_reason: link.link_reason,
                    link_index: link.link_index,
                    link_type: pair.link_type,
                    first: self.breakend_label(link.first),
                    second: self.breakend_label(link.second),
                    length: pair.length,
                    is_assembled: pair.is_assembled,
                    repeat_count: pair.repeat_count,
                    ploidy: chain.ploidy,
                });
            }
        }
        records
    }
}

/// Collapse chains which repeat the structure of a longer or earlier chain
///
/// Chains are considered longest first. A chain identical to, or contained in, a kept chain is
/// dropped and counted as a duplicate of that chain. The result is sorted by chain id.
///
pub fn deduplicate_chains(mut chains: Vec<SVChain>) -> Vec<SVChain> {
    chains.sort_by(|a, b| {
        b.link_count()
            .cmp(&a.link_count())
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut unique_chains: Vec<SVChain> = Vec::new();
    for chain in chains {
        match unique_chains
            .iter_mut()
            .find(|x| chain.identical_chain(x, true))
        {
            Some(kept) => {
                kept.duplicate_count += 1 + chain.duplicate_count;
            }
            None => {
                unique_chains.push(chain);
            }
        }
    }
    unique_chains.sort_by_key(|x| x.id);
    unique_chains
}
