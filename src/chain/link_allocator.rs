//! Apply proposed links to the chain set
//!
//! Each proposal is placed on an existing chain where possible, splitting or clamping chain
//! ploidy as required, otherwise it starts a new chain. All ploidy committed by a link is
//! registered against the breakend allocation state, and exhausted breakends are retired from the
//! candidate catalogue before adjacent chains are merged.
//!

use std::collections::BTreeSet;
use std::f64::consts::SQRT_2;

use crate::breakpoint::BreakendId;
use crate::log_utils::debug_msg;

use super::ChainingFailure;
use super::builder_context::ChainBuilderContext;
use super::linked_pair::{LinkType, LinkedPair};
use super::ploidy_utils::{PLOIDY_CONSERVATION_TOLERANCE, combine_ploidy, copy_numbers_equal};
use super::proposed_links::{ChainingRule, MultiConnectionType, ProposedLinks};
use super::rule_selector::get_single_link_proposal;
use super::sv_chain::{ChainLink, SVChain};

/// Relationship of a host chain's ploidy to the ploidy of the link being placed
///
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum HostPloidy {
    Matched,
    Greater,
    Lesser,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct Host {
    ploidy: HostPloidy,

    /// Closing hosts are sorted ahead of extending hosts within each ploidy class
    extends_chain: bool,

    chain_id: usize,

    /// Chain ends are tried end first
    is_start: bool,
}

/// Place all assembled links before any rule-selected link
///
/// Assembled pairs are placed shortest first. The candidate catalogue is rebuilt afterwards so
/// that it reflects the remaining unlinked ploidy.
///
/// Returns the number of links placed.
///
pub fn link_assembled_pairs(ctx: &mut ChainBuilderContext) -> Result<usize, ChainingFailure> {
    let cluster = ctx.cluster;
    let mut pair_ids = Vec::new();
    for &(id1, id2) in cluster.assembly_links.iter() {
        if !ctx.sv_indexes.contains(&id1.sv_index) || !ctx.sv_indexes.contains(&id2.sv_index) {
            continue;
        }
        let pair = match LinkedPair::from_breakends(cluster, id1, id2) {
            Some(x) if x.link_type == LinkType::TemplatedInsertion => x,
            _ => {
                debug_msg!(
                    ctx.debug,
                    "Cluster {}: skipping assembly link {id1}-{id2} which is not a templated insertion",
                    cluster.cluster_id
                );
                continue;
            }
        };
        let pair_id = ctx.candidates.add_unindexed_pair(pair);
        ctx.candidates.pair_mut(pair_id).is_assembled = true;
        pair_ids.push(pair_id);
    }

    pair_ids.sort_by_key(|&x| {
        let pair = ctx.candidates.pair(x);
        (pair.length, pair.key())
    });
    pair_ids.dedup();

    let mut link_count = 0;
    for pair_id in pair_ids {
        let [id1, id2] = ctx.candidates.pair(pair_id).breakends();
        if ctx.is_exhausted(id1) || ctx.is_exhausted(id2) {
            debug_msg!(
                ctx.debug,
                "Cluster {}: skipping assembled pair {:?} with an exhausted breakend",
                cluster.cluster_id,
                ctx.candidates.pair(pair_id)
            );
            continue;
        }
        let mut proposal = get_single_link_proposal(ctx, pair_id);
        proposal.add_rule(ChainingRule::Assembly);
        let added = apply_single_link(ctx, &proposal)?;
        if added > 0 {
            for id in [id1, id2] {
                *ctx.assembled_link_counts.entry(id).or_default() += 1;
            }
            update_after_link(ctx, &proposal)?;
            link_count += added;
        }
    }
    ctx.skipped_pairs.clear();
    Ok(link_count)
}

/// Test whether a proposal still refers to active pairs, live breakends and existing chains
///
fn is_proposal_current(ctx: &ChainBuilderContext, proposal: &ProposedLinks) -> bool {
    let inner_chain_exists = proposal
        .multi_connection
        .as_ref()
        .and_then(|x| x.inner_chain)
        .is_none_or(|x| ctx.chains.contains_key(&x));

    inner_chain_exists
        && proposal
            .pair_ids
            .iter()
            .all(|&x| ctx.candidates.is_active(x))
        && proposal
            .breakend_allocations
            .iter()
            .all(|&(id, _)| !ctx.is_exhausted(id))
}

/// Apply a batch of ranked proposals from one rule pass
///
/// The batch stops at the first proposal which touches an SV already linked in this batch, whose
/// target chain is gone, or which has been invalidated by an earlier link. A multi-connection
/// always ends the batch.
///
/// Returns the number of links placed.
///
pub fn process_proposals(
    ctx: &mut ChainBuilderContext,
    proposals: &[ProposedLinks],
) -> Result<usize, ChainingFailure> {
    let mut touched_svs = BTreeSet::new();
    let mut link_count = 0;
    for (proposal_index, proposal) in proposals.iter().enumerate() {
        if proposal
            .target_chain
            .is_some_and(|x| !ctx.chains.contains_key(&x))
        {
            break;
        }

        let sv_indexes = proposal.sv_indexes();
        if !sv_indexes.is_disjoint(&touched_svs) {
            break;
        }

        if !is_proposal_current(ctx, proposal) {
            if proposal_index == 0 {
                return Err(ChainingFailure::InvalidState(format!(
                    "Top proposal refers to a retired pair or exhausted breakend: {proposal:?}"
                )));
            }
            break;
        }
        touched_svs.extend(sv_indexes);

        let added = if proposal.is_multi_connection() {
            apply_multi_connection(ctx, proposal)?
        } else {
            apply_single_link(ctx, proposal)?
        };
        if added > 0 {
            update_after_link(ctx, proposal)?;
            link_count += added;
        }

        if proposal.is_multi_connection() {
            break;
        }
    }

    if link_count > 0 {
        ctx.skipped_pairs.clear();
    }
    Ok(link_count)
}

/// A pair may close a chain if it joins double minute SVs, or if it is the last candidate for
/// both of its breakends
///
fn is_closing_allowed(ctx: &ChainBuilderContext, pair: &LinkedPair) -> bool {
    let [id1, id2] = pair.breakends();
    let is_double_minute =
        ctx.cluster.is_double_minute(id1.sv_index) && ctx.cluster.is_double_minute(id2.sv_index);
    is_double_minute
        || (ctx.candidates.breakend_pair_ids(id1).len() <= 1
            && ctx.candidates.breakend_pair_ids(id2).len() <= 1)
}

/// Find all chains able to host the pair, in order of preference
///
/// Returns the hosts and true if any chain was rejected because the pair would close it.
///
fn find_hosts(ctx: &ChainBuilderContext, pair: &LinkedPair, ploidy: f64) -> (Vec<Host>, bool) {
    let mut hosts = Vec::new();
    let mut closing_blocked = false;
    for (&chain_id, chain) in ctx.chains.iter() {
        for is_start in [false, true] {
            if !chain.can_add_linked_pair(pair, is_start) {
                continue;
            }
            let closes_chain = chain.link_would_close_chain(pair);
            if closes_chain && !is_closing_allowed(ctx, pair) {
                closing_blocked = true;
                continue;
            }
            let host_ploidy =
                if !ctx.requires_replication || copy_numbers_equal(chain.ploidy, ploidy) {
                    HostPloidy::Matched
                } else if chain.ploidy > ploidy {
                    HostPloidy::Greater
                } else {
                    HostPloidy::Lesser
                };
            hosts.push(Host {
                ploidy: host_ploidy,
                extends_chain: !closes_chain,
                chain_id,
                is_start,
            });
        }
    }
    hosts.sort();
    (hosts, closing_blocked)
}

/// Record the rule and order of a pair's first placement
///
fn record_pair_placement(
    ctx: &mut ChainBuilderContext,
    pair_id: usize,
    rule: ChainingRule,
    link_index: usize,
) {
    let pair = ctx.candidates.pair_mut(pair_id);
    if pair.link_reason.is_none() {
        pair.link_reason = Some(rule);
        pair.link_index = Some(link_index);
    }
}

/// Place a single-pair proposal
///
/// Returns the number of links placed, which is zero if the pair was deferred.
///
fn apply_single_link(
    ctx: &mut ChainBuilderContext,
    proposal: &ProposedLinks,
) -> Result<usize, ChainingFailure> {
    let cluster = ctx.cluster;
    let Some(&pair_id) = proposal.pair_ids.first() else {
        return Err(ChainingFailure::InvalidState(
            "Single link proposal has no pair".to_string(),
        ));
    };
    let pair = ctx.candidates.pair(pair_id).clone();
    let rule = proposal.top_rule();

    let (hosts, closing_blocked) = find_hosts(ctx, &pair, proposal.ploidy);
    let host = hosts.first().copied();
    if host.is_none() && closing_blocked {
        debug_msg!(
            ctx.debug,
            "Cluster {}: deferring pair {pair:?} which would close a chain",
            cluster.cluster_id
        );
        ctx.skipped_pairs.insert(pair_id);
        return Ok(0);
    }

    let mut allocations = proposal.breakend_allocations.clone();
    let link_index = ctx.next_link_index();
    let instance_id = ctx.next_instance_id();

    match host {
        None => {
            let link = ChainLink::new(
                cluster,
                pair_id,
                pair.lower,
                pair.upper,
                instance_id,
                rule,
                link_index,
            );
            let chain_id = ctx.next_chain_id();
            let chain = SVChain::new(
                chain_id,
                link,
                proposal.ploidy,
                proposal.ploidy_uncertainty,
            );
            debug_msg!(
                ctx.debug,
                "Cluster {}: new chain {chain_id} from {pair:?}",
                cluster.cluster_id
            );
            ctx.chains.insert(chain_id, chain);
        }
        Some(host) => {
            if host.ploidy == HostPloidy::Greater {
                // Split off the excess chain ploidy into a structural copy
                let copy_id = ctx.next_chain_id();
                let original = ctx.chains[&host.chain_id].clone();
                let mut copy = original.copy_with_new_instances(copy_id, ctx.instance_id_counter());
                copy.ploidy = original.ploidy - proposal.ploidy;
                debug_msg!(
                    ctx.debug,
                    "Cluster {}: split chain {} into copy {copy_id} with ploidy {:.2}",
                    cluster.cluster_id,
                    host.chain_id,
                    copy.ploidy
                );
                ctx.chains.insert(copy_id, copy);
            }

            let Some(chain) = ctx.chains.get_mut(&host.chain_id) else {
                return Err(ChainingFailure::InvalidState(format!(
                    "Host chain {} is missing",
                    host.chain_id
                )));
            };
            match host.ploidy {
                HostPloidy::Matched => {
                    if ctx.requires_replication {
                        (chain.ploidy, chain.ploidy_uncertainty) = combine_ploidy(
                            chain.ploidy,
                            chain.ploidy_uncertainty,
                            proposal.ploidy,
                            proposal.ploidy_uncertainty,
                        );
                    }
                }
                HostPloidy::Greater => {
                    chain.ploidy = proposal.ploidy;
                    chain.ploidy_uncertainty = proposal.ploidy_uncertainty;
                }
                HostPloidy::Lesser => {
                    for (_, ploidy) in allocations.iter_mut() {
                        *ploidy = ploidy.min(chain.ploidy);
                    }
                }
            }
            if !chain.add_linked_pair(
                cluster,
                pair_id,
                &pair,
                host.is_start,
                instance_id,
                rule,
                link_index,
            ) {
                return Err(ChainingFailure::InvalidState(format!(
                    "Pair {pair:?} could not be added to chain {}",
                    host.chain_id
                )));
            }
            debug_msg!(
                ctx.debug,
                "Cluster {}: added {pair:?} to chain {} ({:?})",
                cluster.cluster_id,
                host.chain_id,
                host.ploidy
            );
        }
    }

    record_pair_placement(ctx, pair_id, rule, link_index);
    register_allocations(ctx, &allocations, &proposal.pair_ids);
    *ctx.rule_counts.entry(rule).or_default() += 1;
    Ok(1)
}

/// Place a two-link foldback or complex duplication proposal
///
/// With a target chain, the chain is extended through the connection and then continues back
/// over a copy of itself, reversed for a foldback, so the result carries half the original chain
/// ploidy. Without a target, the two links form a new chain.
///
/// Returns the number of links placed.
///
fn apply_multi_connection(
    ctx: &mut ChainBuilderContext,
    proposal: &ProposedLinks,
) -> Result<usize, ChainingFailure> {
    let cluster = ctx.cluster;
    let (Some(multi), &[pair_id1, pair_id2]) =
        (proposal.multi_connection.as_ref(), proposal.pair_ids.as_slice())
    else {
        return Err(ChainingFailure::InvalidState(format!(
            "Malformed multi-connection proposal: {proposal:?}"
        )));
    };
    let rule = proposal.top_rule();

    let mut target = match proposal.target_chain {
        Some(chain_id) => match ctx.chains.remove(&chain_id) {
            Some(chain) => Some(chain),
            None => return Ok(0),
        },
        None => None,
    };
    if let Some(chain) = target.as_mut() {
        if chain.open_breakend(false) != Some(multi.outer[0]) {
            chain.reverse();
        }
        if chain.open_breakend(false) != Some(multi.outer[0]) {
            return Err(ChainingFailure::InvalidState(format!(
                "Target chain {} has no open breakend {}",
                chain.id, multi.outer[0]
            )));
        }
    }

    let mut inner = match multi.inner_chain {
        Some(chain_id) => match ctx.chains.remove(&chain_id) {
            Some(chain) => Some(chain),
            None => {
                return Err(ChainingFailure::InvalidState(format!(
                    "Inner chain {chain_id} is missing"
                )));
            }
        },
        None => None,
    };
    if let Some(chain) = inner.as_mut() {
        if chain.open_breakend(true) != Some(multi.entry) {
            chain.reverse();
        }
        if chain.open_breakend(true) != Some(multi.entry) {
            return Err(ChainingFailure::InvalidState(format!(
                "Inner chain {} has no open breakend {}",
                chain.id, multi.entry
            )));
        }
    }

    let link_index1 = ctx.next_link_index();
    let instance_id1 = ctx.next_instance_id();
    let mut links = vec![ChainLink::new(
        cluster,
        pair_id1,
        multi.outer[0],
        multi.entry,
        instance_id1,
        rule,
        link_index1,
    )];
    if let Some(chain) = inner {
        links.extend(chain.links().iter().cloned());
    }
    let link_index2 = ctx.next_link_index();
    let instance_id2 = ctx.next_instance_id();
    links.push(ChainLink::new(
        cluster,
        pair_id2,
        multi.exit,
        multi.outer[1],
        instance_id2,
        rule,
        link_index2,
    ));

    let chain = match target {
        Some(chain) => {
            let repeated_links = match multi.connection_type {
                MultiConnectionType::Foldback => chain.reversed_links(),
                MultiConnectionType::ComplexDup => chain.links().to_vec(),
            };
            let mut chain_links = chain.links().to_vec();
            chain_links.extend(links);
            for mut link in repeated_links {
                link.instance_id = ctx.next_instance_id();
                chain_links.push(link);
            }
            SVChain::from_links(
                chain.id,
                chain_links,
                chain.ploidy / 2.0,
                chain.ploidy_uncertainty * SQRT_2,
            )
        }
        None => {
            let chain_id = ctx.next_chain_id();
            SVChain::from_links(
                chain_id,
                links,
                proposal.ploidy,
                proposal.ploidy_uncertainty,
            )
        }
    };
    debug_msg!(
        ctx.debug,
        "Cluster {}: {:?} connection through {}-{} placed in chain {}",
        cluster.cluster_id,
        multi.connection_type,
        multi.entry,
        multi.exit,
        chain.id
    );
    ctx.chains.insert(chain.id, chain);

    record_pair_placement(ctx, pair_id1, rule, link_index1);
    record_pair_placement(ctx, pair_id2, rule, link_index2);
    register_allocations(ctx, &proposal.breakend_allocations, &proposal.pair_ids);
    *ctx.rule_counts.entry(rule).or_default() += 2;
    Ok(2)
}

/// Commit the ploidy of each allocated breakend to its partners in the placed pairs
///
/// A breakend linked to two partners in one proposal commits its ploidy once. No breakend is
/// committed beyond its SV's maximum ploidy.
///
fn register_allocations(
    ctx: &mut ChainBuilderContext,
    allocations: &[(BreakendId, f64)],
    pair_ids: &[usize],
) {
    for &(id, ploidy) in allocations {
        let partners = pair_ids
            .iter()
            .filter_map(|&x| ctx.candidates.pair(x).other_breakend(id))
            .collect::<Vec<_>>();
        let Some(state) = ctx.chain_states.get_mut(&id.sv_index) else {
            continue;
        };
        let ploidy = ploidy.min(state.max_unlinked_ploidy(id.breakend_index));
        for (partner_index, &partner) in partners.iter().enumerate() {
            let ploidy = if partner_index == 0 { ploidy } else { 0.0 };
            state.add(id.breakend_index, ploidy, partner);
        }
    }
}

/// True if the SV is known to be placed in chains only once
///
fn is_single_copy(ctx: &ChainBuilderContext, sv_index: usize) -> bool {
    !ctx.requires_replication || ctx.cluster.sv(sv_index).replication_count <= 1
}

/// Bring the candidate catalogue and chain set up to date after a proposal is placed
///
fn update_after_link(
    ctx: &mut ChainBuilderContext,
    proposal: &ProposedLinks,
) -> Result<(), ChainingFailure> {
    let cluster = ctx.cluster;

    for id in proposal.allocated_breakends() {
        if ctx.is_exhausted(id) {
            ctx.candidates.remove_breakend(id);
        }
    }

    // Once two single copy SVs are joined, they cannot also be joined through their other ends
    if !proposal.is_multi_connection() {
        let [id1, id2] = ctx.candidates.pair(proposal.pair_ids[0]).breakends();
        let is_candidate_sv = |sv_index: usize| {
            is_single_copy(ctx, sv_index)
                && !cluster.is_double_minute(sv_index)
                && !cluster.sv(sv_index).is_sgl()
        };
        if id1.sv_index != id2.sv_index
            && is_candidate_sv(id1.sv_index)
            && is_candidate_sv(id2.sv_index)
            && let Some(pair_id) = ctx.candidates.find_active_pair(id1.other(), id2.other())
        {
            ctx.candidates.remove_pair(pair_id);
        }
    }

    let retired_foldbacks = ctx
        .foldbacks
        .iter()
        .filter(|&&(id1, id2)| ctx.is_exhausted(id1) || ctx.is_exhausted(id2))
        .copied()
        .collect::<Vec<_>>();
    for foldback in retired_foldbacks {
        ctx.foldbacks.remove(&foldback);
    }

    let sv_indexes = proposal.sv_indexes();
    for &sv_index in sv_indexes.iter() {
        if !ctx.candidates.complex_dup_svs().contains(&sv_index) {
            continue;
        }
        let is_exhausted = cluster
            .sv(sv_index)
            .breakend_ids(sv_index)
            .into_iter()
            .any(|x| ctx.is_exhausted(x));
        if is_exhausted {
            ctx.candidates.remove_complex_dup(sv_index);
        }
    }

    for sv_index in sv_indexes {
        if ctx
            .chain_states
            .get(&sv_index)
            .is_some_and(|x| x.is_complete())
            && let Some(state) = ctx.chain_states.remove(&sv_index)
        {
            ctx.completed_states.insert(sv_index, state);
        }
    }

    merge_chains(ctx);

    if ctx.config.validate_chains {
        validate_chains(ctx)?;
    }
    Ok(())
}

/// Find two open chains which continue each other through a shared SV
///
/// Returns the two chain ids, followed by whether each chain must be reversed before the second
/// chain is appended to the first.
///
fn find_mergeable_chains(ctx: &ChainBuilderContext) -> Option<(usize, usize, bool, bool)> {
    for (&chain_id1, chain1) in ctx.chains.iter() {
        if chain1.is_closed() {
            continue;
        }
        let open_start = chain1.open_breakend(true);
        let open_end = chain1.open_breakend(false);
        for (&chain_id2, chain2) in ctx.chains.range((chain_id1 + 1)..) {
            if chain2.is_closed() {
                continue;
            }
            if ctx.requires_replication && !copy_numbers_equal(chain1.ploidy, chain2.ploidy) {
                continue;
            }
            let first = chain2.terminal_breakend(true);
            let last = chain2.terminal_breakend(false);
            let merge = if open_end.is_some() && open_end == first {
                Some((false, false))
            } else if open_end.is_some() && open_end == last {
                Some((false, true))
            } else if open_start.is_some() && open_start == first {
                Some((true, false))
            } else if open_start.is_some() && open_start == last {
                Some((true, true))
            } else {
                None
            };
            if let Some((reverse1, reverse2)) = merge {
                return Some((chain_id1, chain_id2, reverse1, reverse2));
            }
        }
    }
    None
}

/// Join open chains end to end until no further merge is possible
///
/// The merged chain keeps the lower chain id. Returns the number of merges.
///
pub fn merge_chains(ctx: &mut ChainBuilderContext) -> usize {
    let mut merge_count = 0;
    while let Some((chain_id1, chain_id2, reverse1, reverse2)) = find_mergeable_chains(ctx) {
        let Some(mut chain2) = ctx.chains.remove(&chain_id2) else {
            break;
        };
        let Some(chain1) = ctx.chains.get_mut(&chain_id1) else {
            break;
        };
        if reverse1 {
            chain1.reverse();
        }
        if reverse2 {
            chain2.reverse();
        }
        if ctx.requires_replication {
            (chain1.ploidy, chain1.ploidy_uncertainty) = combine_ploidy(
                chain1.ploidy,
                chain1.ploidy_uncertainty,
                chain2.ploidy,
                chain2.ploidy_uncertainty,
            );
        }
        debug_msg!(
            ctx.debug,
            "Cluster {}: merged chain {chain_id2} into chain {chain_id1}",
            ctx.cluster.cluster_id
        );
        chain1.append_chain(chain2);
        merge_count += 1;
    }
    merge_count
}

/// Check the structure of every chain and the ploidy committed from every breakend
///
pub fn validate_chains(ctx: &ChainBuilderContext) -> Result<(), ChainingFailure> {
    let mut instance_ids = BTreeSet::new();
    for chain in ctx.chains.values() {
        chain.validate().map_err(|msg| {
            ChainingFailure::InvalidState(format!("Chain {} is invalid: {msg}", chain.id))
        })?;
        for link in chain.links() {
            if !instance_ids.insert(link.instance_id) {
                return Err(ChainingFailure::InvalidState(format!(
                    "Link instance {} is placed more than once",
                    link.instance_id
                )));
            }
        }
    }

    for state in ctx
        .chain_states
        .values()
        .chain(ctx.completed_states.values())
    {
        for breakend_index in 0..state.breakend_count() {
            let allocated_ploidy = state.allocated_ploidy(breakend_index);
            if allocated_ploidy > state.max_ploidy + PLOIDY_CONSERVATION_TOLERANCE {
                return Err(ChainingFailure::InvalidState(format!(
                    "Breakend {} allocated ploidy {allocated_ploidy:.2} exceeds SV max ploidy {:.2}",
                    BreakendId::new(state.sv_index, breakend_index),
                    state.max_ploidy
                )));
            }
        }
    }
    Ok(())
}
