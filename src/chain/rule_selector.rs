//! Rule cascade selecting the next links to place
//!
//! Rule stages run from highest to lowest priority. The first stage to produce any proposals
//! defines the proposal set, later stages only add their rule to proposals already in the set.
//! After every stage only the highest priority proposals are kept, and selection stops as soon as
//! a single proposal remains.
//!

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::breakpoint::{BreakendId, SVType};

use super::builder_context::ChainBuilderContext;
use super::ploidy_utils::{
    PLOIDY_CONSERVATION_TOLERANCE, combine_ploidy, copy_numbers_equal, ploidy_overlap,
};
use super::proposed_links::{
    ChainingRule, MultiConnection, MultiConnectionType, ProposedLinks, compare_proposal_order,
    compare_rule_priority,
};

type RuleStage = fn(&ChainBuilderContext) -> Vec<ProposedLinks>;

/// Find the ranked proposals for the next batch of links
///
/// An empty result means that no candidate links remain, other than any skipped pairs.
///
pub fn find_proposed_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    let mut stages: Vec<RuleStage> = vec![find_single_option_links, find_foldback_links];
    if ctx.requires_replication {
        stages.push(find_complex_dup_links);
    }
    stages.push(find_foldback_to_foldback_links);
    if ctx.requires_replication {
        stages.push(find_ploidy_match_links);
    }
    stages.push(find_adjacent_links);
    if ctx.requires_replication {
        stages.push(find_max_ploidy_links);
    }

    let mut proposals = Vec::new();
    for stage in stages {
        apply_stage(&mut proposals, stage(ctx));
        cull_by_priority(&mut proposals);
        if proposals.len() == 1 {
            return proposals;
        }
    }

    apply_nearest_stage(ctx, &mut proposals);
    cull_by_priority(&mut proposals);
    proposals.sort_by(compare_proposal_order);
    proposals
}

/// Merge one stage's proposals into the current proposal set
///
fn apply_stage(proposals: &mut Vec<ProposedLinks>, stage_proposals: Vec<ProposedLinks>) {
    if proposals.is_empty() {
        *proposals = stage_proposals;
        return;
    }
    for proposal in proposals.iter_mut() {
        let stage_rules = stage_proposals
            .iter()
            .filter(|x| x.pair_ids == proposal.pair_ids)
            .flat_map(|x| x.rules.iter().copied())
            .collect::<Vec<_>>();
        for rule in stage_rules {
            proposal.add_rule(rule);
        }
    }
}

/// Keep only the proposals with the highest rule priority
///
fn cull_by_priority(proposals: &mut Vec<ProposedLinks>) {
    let Some(top_rules) = proposals
        .iter()
        .max_by(|a, b| a.priority_cmp(b))
        .map(|x| x.rules.clone())
    else {
        return;
    };
    proposals.retain(|x| compare_rule_priority(&x.rules, &top_rules) == Ordering::Equal);
}

/// Create a proposal for a single candidate pair, with no rules set
///
/// In a replicated cluster, the link takes the combined ploidy of both breakends if their
/// unlinked ploidy matches, and otherwise the lower of the two.
///
pub fn get_single_link_proposal(ctx: &ChainBuilderContext, pair_id: usize) -> ProposedLinks {
    let pair = ctx.candidates.pair(pair_id);
    let [id1, id2] = pair.breakends();

    let (ploidy, ploidy_uncertainty, ploidy_matched, breakend_allocations) =
        if ctx.requires_replication {
            let ploidy1 = ctx.unlinked_ploidy(id1);
            let ploidy2 = ctx.unlinked_ploidy(id2);
            let uncertainty1 = ctx.ploidy_uncertainty(id1);
            let uncertainty2 = ctx.ploidy_uncertainty(id2);
            if copy_numbers_equal(ploidy1, ploidy2) {
                let (ploidy, uncertainty) =
                    combine_ploidy(ploidy1, uncertainty1, ploidy2, uncertainty2);
                (ploidy, uncertainty, true, vec![(id1, ploidy1), (id2, ploidy2)])
            } else {
                let (ploidy, uncertainty) = if ploidy1 < ploidy2 {
                    (ploidy1, uncertainty1)
                } else {
                    (ploidy2, uncertainty2)
                };
                (ploidy, uncertainty, false, vec![(id1, ploidy), (id2, ploidy)])
            }
        } else {
            (1.0, 0.0, true, vec![(id1, 1.0), (id2, 1.0)])
        };

    ProposedLinks {
        pair_ids: vec![pair_id],
        rules: BTreeSet::new(),
        ploidy,
        ploidy_uncertainty,
        ploidy_matched,
        breakend_allocations,
        target_chain: None,
        multi_connection: None,
        length: pair.length,
    }
}

fn get_rule_proposal(ctx: &ChainBuilderContext, pair_id: usize, rule: ChainingRule) -> ProposedLinks {
    let mut proposal = get_single_link_proposal(ctx, pair_id);
    proposal.add_rule(rule);
    proposal
}

/// Find breakends with a single remaining option
///
/// This includes breakends whose only two options are the two ends of one inversion, in which
/// case the shorter option is taken.
///
fn find_single_option_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    let mut pair_ids = BTreeSet::new();
    for (&id, _) in ctx.candidates.breakends() {
        let available = ctx.available_pair_ids(id).collect::<Vec<_>>();
        let pair_id = match available.as_slice() {
            [pair_id] => *pair_id,
            [pair_id1, pair_id2] => {
                let partner1 = ctx.candidates.pair(*pair_id1).other_breakend(id);
                let partner2 = ctx.candidates.pair(*pair_id2).other_breakend(id);
                match (partner1, partner2) {
                    (Some(partner1), Some(partner2))
                        if partner1.sv_index == partner2.sv_index
                            && partner1 != partner2
                            && ctx.cluster.sv(partner1.sv_index).sv_type == SVType::INV =>
                    {
                        *pair_id1
                    }
                    _ => continue,
                }
            }
            _ => continue,
        };
        pair_ids.insert(pair_id);
    }
    pair_ids
        .into_iter()
        .map(|x| get_rule_proposal(ctx, x, ChainingRule::Only))
        .collect()
}

fn find_foldback_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    ctx.foldbacks
        .iter()
        .filter_map(|&(fb1, fb2)| get_foldback_proposal(ctx, fb1, fb2))
        .collect()
}

/// Find the action for one foldback, if its two ends share a common partner breakend
///
/// A foldback is either one SV with both breakends facing the same way, or a chained foldback
/// where the two facing breakends are the open ends of one chain.
///
fn get_foldback_proposal(
    ctx: &ChainBuilderContext,
    fb1: BreakendId,
    fb2: BreakendId,
) -> Option<ProposedLinks> {
    if ctx.is_exhausted(fb1) || ctx.is_exhausted(fb2) {
        return None;
    }

    let (foldback_ploidy, foldback_uncertainty, inner_chain) = if fb1.sv_index != fb2.sv_index {
        let chain_id = ctx.find_chain_with_open_ends(fb1, fb2)?;
        let chain = &ctx.chains[&chain_id];
        (chain.ploidy, chain.ploidy_uncertainty, Some(chain_id))
    } else if ctx.requires_replication {
        (
            ctx.unlinked_ploidy(fb1).min(ctx.unlinked_ploidy(fb2)),
            ctx.ploidy_uncertainty(fb1),
            None,
        )
    } else {
        (1.0, 0.0, None)
    };

    // Find the nearest breakend facing both foldback ends:
    let (partner, pair_id1, pair_id2) = ctx.available_pair_ids(fb1).find_map(|pair_id1| {
        let partner = ctx.candidates.pair(pair_id1).other_breakend(fb1)?;
        let pair_id2 = ctx.find_available_pair(fb2, partner)?;
        Some((partner, pair_id1, pair_id2))
    })?;

    let pair1 = ctx.candidates.pair(pair_id1);
    let pair2 = ctx.candidates.pair(pair_id2);
    let nearest_pair_id = if (pair1.length, pair1.key()) <= (pair2.length, pair2.key()) {
        pair_id1
    } else {
        pair_id2
    };

    if ctx.requires_replication {
        let double_ploidy = 2.0 * foldback_ploidy;
        let partner_ploidy = ctx.unlinked_ploidy(partner);
        let target_chain = ctx
            .find_open_chain(partner, inner_chain)
            .map(|(chain_id, _)| chain_id)
            .filter(|chain_id| copy_numbers_equal(ctx.chains[chain_id].ploidy, double_ploidy));

        if target_chain.is_some()
            || copy_numbers_equal(partner_ploidy, double_ploidy)
            || partner_ploidy > double_ploidy
        {
            let rule = if target_chain.is_some() {
                ChainingRule::FoldbackSplit
            } else {
                ChainingRule::Foldback
            };
            let partner_allocation = double_ploidy.min(ctx.max_unlinked_ploidy(partner));
            return Some(ProposedLinks {
                pair_ids: vec![pair_id1, pair_id2],
                rules: BTreeSet::from([rule]),
                ploidy: foldback_ploidy,
                ploidy_uncertainty: foldback_uncertainty,
                ploidy_matched: true,
                breakend_allocations: vec![
                    (partner, partner_allocation),
                    (fb1, foldback_ploidy),
                    (fb2, foldback_ploidy),
                ],
                target_chain,
                multi_connection: Some(MultiConnection {
                    connection_type: MultiConnectionType::Foldback,
                    entry: fb1,
                    exit: fb2,
                    outer: [partner, partner],
                    inner_chain,
                }),
                length: pair1.length + pair2.length,
            });
        }

        if !(partner_ploidy > foldback_ploidy || copy_numbers_equal(partner_ploidy, foldback_ploidy)) {
            return None;
        }
    }

    Some(get_rule_proposal(ctx, nearest_pair_id, ChainingRule::Foldback))
}

/// Find the two links joining a duplicated SV between a pair of outer breakends
///
/// Returns the entry and exit breakends of the duplicated SV, and the pair ids of the two links.
///
fn find_complex_dup_connection(
    ctx: &ChainBuilderContext,
    outer: [BreakendId; 2],
    dup_breakends: [BreakendId; 2],
) -> Option<(BreakendId, BreakendId, Vec<usize>)> {
    let [va, vb] = dup_breakends;
    for (entry, exit) in [(va, vb), (vb, va)] {
        if let (Some(pair_id1), Some(pair_id2)) = (
            ctx.find_available_pair(outer[0], entry),
            ctx.find_available_pair(exit, outer[1]),
        ) {
            return Some((entry, exit, vec![pair_id1, pair_id2]));
        }
    }
    None
}

/// Test whether both outer breakends of a complex duplication can take the duplicated ploidy
/// without exceeding their SV's maximum ploidy
///
fn can_allocate_outer(ctx: &ChainBuilderContext, outer: [BreakendId; 2], ploidy: f64) -> bool {
    outer
        .iter()
        .all(|&id| ploidy <= ctx.max_unlinked_ploidy(id) + PLOIDY_CONSERVATION_TOLERANCE)
}

/// Find complex duplications, where a lower ploidy SV links to both ends of either a chain or
/// an unchained SV with twice its ploidy
///
fn find_complex_dup_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    let mut proposals = Vec::new();
    for &sv_index in ctx.candidates.complex_dup_svs().iter() {
        let va = BreakendId::new(sv_index, 0);
        let vb = BreakendId::new(sv_index, 1);
        if ctx.is_exhausted(va) || ctx.is_exhausted(vb) {
            continue;
        }
        let dup_ploidy = ctx.unlinked_ploidy(va).min(ctx.unlinked_ploidy(vb));
        let double_ploidy = 2.0 * dup_ploidy;

        let mut connection = None;
        for (&chain_id, chain) in ctx.chains.iter() {
            if chain.has_sv(sv_index) || !copy_numbers_equal(chain.ploidy, double_ploidy) {
                continue;
            }
            let (Some(start), Some(end)) = (chain.open_breakend(true), chain.open_breakend(false))
            else {
                continue;
            };
            if start == end {
                continue;
            }
            let outer = [end, start];
            if !can_allocate_outer(ctx, outer, dup_ploidy) {
                continue;
            }
            if let Some(x) = find_complex_dup_connection(ctx, outer, [va, vb]) {
                connection = Some((Some(chain_id), outer, x));
                break;
            }
        }

        if connection.is_none() {
            let partner_svs = [va, vb]
                .into_iter()
                .flat_map(|id| {
                    ctx.available_pair_ids(id)
                        .filter_map(move |x| ctx.candidates.pair(x).other_breakend(id))
                })
                .map(|x| x.sv_index)
                .filter(|&x| x != sv_index)
                .collect::<BTreeSet<_>>();

            for partner_sv_index in partner_svs {
                if ctx.cluster.sv(partner_sv_index).is_sgl() || !ctx.is_unlinked_sv(partner_sv_index) {
                    continue;
                }
                let w0 = BreakendId::new(partner_sv_index, 0);
                let w1 = BreakendId::new(partner_sv_index, 1);
                if !(copy_numbers_equal(ctx.unlinked_ploidy(w0), double_ploidy)
                    && copy_numbers_equal(ctx.unlinked_ploidy(w1), double_ploidy))
                {
                    continue;
                }
                for outer in [[w1, w0], [w0, w1]] {
                    if !can_allocate_outer(ctx, outer, dup_ploidy) {
                        continue;
                    }
                    if let Some(x) = find_complex_dup_connection(ctx, outer, [va, vb]) {
                        connection = Some((None, outer, x));
                        break;
                    }
                }
                if connection.is_some() {
                    break;
                }
            }
        }

        let Some((target_chain, outer, (entry, exit, pair_ids))) = connection else {
            continue;
        };
        let length = pair_ids.iter().map(|&x| ctx.candidates.pair(x).length).sum();
        proposals.push(ProposedLinks {
            pair_ids,
            rules: BTreeSet::from([ChainingRule::CompDupSplit]),
            ploidy: dup_ploidy,
            ploidy_uncertainty: ctx.ploidy_uncertainty(va),
            ploidy_matched: true,
            breakend_allocations: vec![
                (entry, dup_ploidy),
                (exit, dup_ploidy),
                (outer[0], dup_ploidy),
                (outer[1], dup_ploidy),
            ],
            target_chain,
            multi_connection: Some(MultiConnection {
                connection_type: MultiConnectionType::ComplexDup,
                entry,
                exit,
                outer,
                inner_chain: None,
            }),
            length,
        });
    }
    proposals
}

fn find_foldback_to_foldback_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    let mut foldback_of = BTreeMap::new();
    for &foldback in ctx.foldbacks.iter() {
        foldback_of.insert(foldback.0, foldback);
        foldback_of.insert(foldback.1, foldback);
    }
    if foldback_of.is_empty() {
        return Vec::new();
    }

    ctx.available_pairs()
        .into_iter()
        .filter(|&pair_id| {
            let [id1, id2] = ctx.candidates.pair(pair_id).breakends();
            match (foldback_of.get(&id1), foldback_of.get(&id2)) {
                (Some(fb1), Some(fb2)) => fb1 != fb2,
                _ => false,
            }
        })
        .map(|x| get_rule_proposal(ctx, x, ChainingRule::FoldbackToFoldback))
        .collect()
}

/// Find pairs from the breakends with the highest unlinked ploidy to partners of matching or
/// overlapping ploidy
///
/// A matched pair is tagged only as a ploidy match.
///
fn find_ploidy_match_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    let breakends = ctx
        .candidates
        .breakends()
        .map(|(&id, _)| id)
        .filter(|&id| ctx.available_pair_ids(id).next().is_some())
        .collect::<Vec<_>>();
    let max_ploidy = breakends
        .iter()
        .map(|&id| ctx.unlinked_ploidy(id))
        .fold(0.0, f64::max);

    let mut matched = BTreeSet::new();
    let mut overlapped = BTreeSet::new();
    for &id in breakends.iter() {
        let ploidy = ctx.unlinked_ploidy(id);
        if !copy_numbers_equal(ploidy, max_ploidy) {
            continue;
        }
        let uncertainty = ctx.ploidy_uncertainty(id);
        for pair_id in ctx.available_pair_ids(id) {
            let Some(partner) = ctx.candidates.pair(pair_id).other_breakend(id) else {
                continue;
            };
            let partner_ploidy = ctx.unlinked_ploidy(partner);
            if copy_numbers_equal(ploidy, partner_ploidy) {
                matched.insert(pair_id);
            } else if ploidy_overlap(
                ploidy,
                uncertainty,
                partner_ploidy,
                ctx.ploidy_uncertainty(partner),
            ) {
                overlapped.insert(pair_id);
            }
        }
    }

    let mut proposals = matched
        .iter()
        .map(|&x| get_rule_proposal(ctx, x, ChainingRule::PloidyMatch))
        .collect::<Vec<_>>();
    proposals.extend(
        overlapped
            .difference(&matched)
            .map(|&x| get_rule_proposal(ctx, x, ChainingRule::PloidyOverlap)),
    );
    proposals
}

fn find_adjacent_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    ctx.available_pairs()
        .into_iter()
        .filter(|&x| ctx.candidates.pair(x).is_adjacent)
        .map(|x| {
            let mut proposal = get_rule_proposal(ctx, x, ChainingRule::Adjacent);
            if ctx.requires_replication && proposal.ploidy_matched {
                proposal.add_rule(ChainingRule::AdjacentMatch);
            }
            proposal
        })
        .collect()
}

/// Find the pairs able to take the highest link ploidy
///
fn find_max_ploidy_links(ctx: &ChainBuilderContext) -> Vec<ProposedLinks> {
    let pair_ploidies = ctx
        .available_pairs()
        .into_iter()
        .map(|pair_id| {
            let [id1, id2] = ctx.candidates.pair(pair_id).breakends();
            (pair_id, ctx.unlinked_ploidy(id1).min(ctx.unlinked_ploidy(id2)))
        })
        .collect::<Vec<_>>();
    let max_ploidy = pair_ploidies.iter().map(|x| x.1).fold(0.0, f64::max);
    pair_ploidies
        .into_iter()
        .filter(|&(_, ploidy)| copy_numbers_equal(ploidy, max_ploidy))
        .map(|(pair_id, _)| get_rule_proposal(ctx, pair_id, ChainingRule::PloidyMax))
        .collect()
}

/// Tag the shortest proposals, dropping any proposal sharing a breakend with a shorter one
///
/// If no earlier stage produced proposals, all available pairs are considered.
///
fn apply_nearest_stage(ctx: &ChainBuilderContext, proposals: &mut Vec<ProposedLinks>) {
    if proposals.is_empty() {
        *proposals = ctx
            .available_pairs()
            .into_iter()
            .map(|x| get_single_link_proposal(ctx, x))
            .collect();
    }

    let mut order = (0..proposals.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        let pa = &proposals[a];
        let pb = &proposals[b];
        pa.length
            .cmp(&pb.length)
            .then_with(|| pa.pair_ids.cmp(&pb.pair_ids))
    });

    let mut used_breakends = BTreeSet::new();
    for index in order {
        let breakends = proposals[index].allocated_breakends();
        if breakends.is_disjoint(&used_breakends) {
            used_breakends.extend(breakends);
            proposals[index].add_rule(ChainingRule::Nearest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakendDirection;
    use crate::chain::ChainingConfig;
    use crate::chain::link_allocator::process_proposals;
    use crate::cluster::test_utils::*;
    use crate::cluster::{BreakendPairInput, Cluster};
    use approx::assert_ulps_eq;

    fn get_context(cluster: &Cluster) -> ChainBuilderContext<'_> {
        let mut ctx =
            ChainBuilderContext::new(cluster, &ChainingConfig::default(), cluster.all_sv_indexes());
        ctx.build_candidates();
        ctx
    }

    fn get_pair_breakends(ctx: &ChainBuilderContext, proposal: &ProposedLinks) -> Vec<[BreakendId; 2]> {
        proposal
            .pair_ids
            .iter()
            .map(|&x| ctx.candidates.pair(x).breakends())
            .collect()
    }

    #[test]
    fn test_single_option() {
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 500, 700, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);
        let ctx = get_context(&cluster);
        let proposals = find_proposed_links(&ctx);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].top_rule(), ChainingRule::Only);
        assert_eq!(
            get_pair_breakends(&ctx, &proposals[0]),
            vec![[BreakendId::new(0, 1), BreakendId::new(1, 0)]]
        );
        assert_ulps_eq!(proposals[0].ploidy, 1.0);
    }

    #[test]
    fn test_adjacent_breaks_single_option_tie() {
        // Both 'b' and 'c' starts only face the end of 'a', and 'c' is adjacent
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 500, 700, 1.0),
            get_test_del("c", "chr1", 400, 900, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);
        let ctx = get_context(&cluster);
        let proposals = find_proposed_links(&ctx);
        assert_eq!(proposals.len(), 1);
        assert!(proposals[0].has_rule(ChainingRule::Only));
        assert!(proposals[0].has_rule(ChainingRule::Adjacent));
        assert!(!proposals[0].has_rule(ChainingRule::AdjacentMatch));
        assert_eq!(
            get_pair_breakends(&ctx, &proposals[0]),
            vec![[BreakendId::new(0, 1), BreakendId::new(2, 0)]]
        );
    }

    #[test]
    fn test_skipped_pairs_are_not_proposed() {
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 500, 700, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);
        let mut ctx = get_context(&cluster);
        ctx.skipped_pairs.insert(0);
        assert!(find_proposed_links(&ctx).is_empty());
    }

    #[test]
    fn test_proposals_share_no_breakends() {
        // Every breakend has several options, and three disjoint adjacent pairs remain tied
        let svs = vec![
            get_test_del("a", "chr1", 100, 300, 1.0),
            get_test_del("b", "chr1", 600, 700, 1.0),
            get_test_del("c", "chr1", 800, 900, 1.0),
            get_test_dup("d", "chr1", 350, 5000, 1.0),
        ];
        let cluster = get_test_cluster(svs, false);
        let ctx = get_context(&cluster);
        let proposals = find_proposed_links(&ctx);
        assert!(!proposals.is_empty());

        // No two proposals share a breakend:
        let mut used = BTreeSet::new();
        for proposal in proposals.iter() {
            for id in proposal.allocated_breakends() {
                assert!(used.insert(id));
            }
        }
    }

    /// Foldback 'f' with both ends left-anchored, facing the end of 'x' with twice its ploidy
    ///
    fn get_foldback_cluster(with_chain_partner: bool) -> Cluster {
        let mut svs = vec![
            get_test_del("x", "chr1", 100, 300, 2.0),
            get_test_sv(
                "f",
                SVType::BND,
                get_test_breakend("chr1", 500, BreakendDirection::LeftAnchor),
                Some(get_test_breakend("chr1", 600, BreakendDirection::LeftAnchor)),
                1.0,
            ),
            get_test_sv(
                "y",
                SVType::BND,
                get_test_breakend("chr1", 200, BreakendDirection::RightAnchor),
                Some(get_test_breakend("chr2", 1000, BreakendDirection::LeftAnchor)),
                1.0,
            ),
        ];
        if with_chain_partner {
            svs.push(get_test_del("w", "chr1", 10, 50, 2.0));
        }
        let mut input = get_test_cluster_input(svs, true);
        input.foldbacks.push(BreakendPairInput {
            breakend1: BreakendId::new(1, 0),
            breakend2: BreakendId::new(1, 1),
        });
        Cluster::from_input(input).unwrap()
    }

    #[test]
    fn test_foldback_multi_connection() {
        let cluster = get_foldback_cluster(false);
        let ctx = get_context(&cluster);
        let proposals = find_proposed_links(&ctx);
        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.top_rule(), ChainingRule::Foldback);
        assert!(proposal.target_chain.is_none());
        assert_ulps_eq!(proposal.ploidy, 1.0);

        let multi = proposal.multi_connection.as_ref().unwrap();
        assert_eq!(multi.connection_type, MultiConnectionType::Foldback);
        let x_end = BreakendId::new(0, 1);
        assert_eq!(multi.outer, [x_end, x_end]);
        assert_eq!(
            get_pair_breakends(&ctx, proposal),
            vec![
                [x_end, BreakendId::new(1, 0)],
                [x_end, BreakendId::new(1, 1)]
            ]
        );
        assert_eq!(proposal.breakend_allocations[0], (x_end, 2.0));
    }

    #[test]
    fn test_ploidy_match_over_overlap() {
        // The end of 'a' (ploidy 2) faces 'b' (ploidy 2) and 'c' (ploidy 1.45), the second partner
        // is nearer but only overlaps
        let mut svs = vec![
            get_test_del("a", "chr1", 100, 300, 2.0),
            get_test_del("b", "chr1", 700, 900, 2.0),
            get_test_del("c", "chr1", 500, 1000, 1.0),
            get_test_dup("d", "chr1", 400, 5000, 1.0),
        ];
        svs[2].ploidy = get_test_ploidy(1.45);
        svs[2].ploidy.uncertainty = 0.4;
        let cluster = get_test_cluster(svs, true);
        let ctx = get_context(&cluster);
        let proposals = find_ploidy_match_links(&ctx);

        let a_end = BreakendId::new(0, 1);
        let b_start = BreakendId::new(1, 0);
        let c_start = BreakendId::new(2, 0);
        let find_rules = |id1: BreakendId, id2: BreakendId| {
            let pair_id = ctx.candidates.find_active_pair(id1, id2).unwrap();
            proposals
                .iter()
                .find(|x| x.pair_ids == vec![pair_id])
                .map(|x| x.rules.clone())
        };
        let ab_rules = find_rules(a_end, b_start).unwrap();
        assert!(ab_rules.contains(&ChainingRule::PloidyMatch));
        assert!(!ab_rules.contains(&ChainingRule::PloidyOverlap));
        let ac_rules = find_rules(a_end, c_start).unwrap();
        assert!(ac_rules.contains(&ChainingRule::PloidyOverlap));
        assert!(!ac_rules.contains(&ChainingRule::PloidyMatch));
    }

    /// Duplication 'b' spanning two deletions 'x' and 'y' with about twice its ploidy
    ///
    fn get_complex_dup_cluster() -> Cluster {
        get_test_cluster(
            vec![
                get_test_del("x", "chr1", 1200, 1300, 1.5),
                get_test_del("y", "chr1", 1500, 1600, 1.5),
                get_test_dup("b", "chr1", 1000, 2000, 1.0),
            ],
            true,
        )
    }

    #[test]
    fn test_complex_dup_respects_max_ploidy() {
        let cluster = get_complex_dup_cluster();
        let mut ctx = get_context(&cluster);
        assert!(ctx.candidates.complex_dup_svs().contains(&2));

        // Chain x and y into a ploidy 1.5 chain with open ends at x.start and y.end
        let x_start = BreakendId::new(0, 0);
        let pair_id = ctx
            .candidates
            .find_active_pair(BreakendId::new(0, 1), BreakendId::new(1, 0))
            .unwrap();
        let proposal = get_single_link_proposal(&ctx, pair_id);
        assert_eq!(process_proposals(&mut ctx, &[proposal]).unwrap(), 1);

        let proposals = find_complex_dup_links(&ctx);
        assert_eq!(proposals.len(), 1);
        let proposal = proposals[0].clone();
        assert_eq!(proposal.target_chain, Some(0));
        assert_eq!(proposal.top_rule(), ChainingRule::CompDupSplit);
        assert_ulps_eq!(proposal.ploidy, 1.0);

        // Once x.start cannot take the duplicated ploidy, the chain is no longer a target
        ctx.chain_states
            .get_mut(&0)
            .unwrap()
            .add(0, 1.0, BreakendId::new(2, 0));
        assert!(ctx.max_unlinked_ploidy(x_start) < 1.0);
        assert!(!ctx.is_exhausted(x_start));
        assert!(find_complex_dup_links(&ctx).is_empty());

        // Placing the earlier proposal anyway cannot over-commit x.start
        assert_eq!(process_proposals(&mut ctx, &[proposal]).unwrap(), 2);
        for state in ctx.chain_states.values().chain(ctx.completed_states.values()) {
            for breakend_index in 0..state.breakend_count() {
                assert!(
                    state.allocated_ploidy(breakend_index)
                        <= state.max_ploidy + PLOIDY_CONSERVATION_TOLERANCE
                );
            }
        }
    }
}
