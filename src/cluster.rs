//! Cluster input model and per-cluster breakend indexing
//!

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};

use crate::breakpoint::{Breakend, BreakendId, SVType, StructuralVariant};
use crate::int_range::IntRange;

/// A pair of breakends referenced by a cluster input, such as an assembly link or a foldback
///
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BreakendPairInput {
    pub breakend1: BreakendId,
    pub breakend2: BreakendId,
}

/// Allele-specific ploidy over one copy number segment
///
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AlleleSegment {
    pub range: IntRange,
    pub major_allele_ploidy: f64,
    pub minor_allele_ploidy: f64,
}

/// Cluster description as provided by the upstream clustering stage
///
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterInput {
    pub cluster_id: usize,

    pub svs: Vec<StructuralVariant>,

    #[serde(default)]
    pub assembly_links: Vec<BreakendPairInput>,

    #[serde(default)]
    pub foldbacks: Vec<BreakendPairInput>,

    /// Indexes of SVs which form double-minute loops
    #[serde(default)]
    pub double_minute_svs: Vec<usize>,

    /// If false, all SVs are treated as single copy and replication bookkeeping is skipped
    #[serde(default)]
    pub requires_replication: bool,

    /// Allele ploidy segments for each chromosome touched by the cluster
    #[serde(default)]
    pub allele_ploidy: BTreeMap<String, Vec<AlleleSegment>>,
}

/// Map from chromosome name to the cluster breakends on that chromosome, in position order
///
pub type ChrBreakendMap = BTreeMap<String, Vec<BreakendId>>;

/// Validated cluster, the SV arena for all chaining steps
///
pub struct Cluster {
    pub cluster_id: usize,
    pub svs: Vec<StructuralVariant>,
    pub assembly_links: Vec<(BreakendId, BreakendId)>,
    pub double_minute_svs: BTreeSet<usize>,
    pub requires_replication: bool,
    pub allele_ploidy: BTreeMap<String, Vec<AlleleSegment>>,
}

impl Cluster {
    /// Validate the cluster input and fill in all derived SV and breakend annotations
    ///
    pub fn from_input(input: ClusterInput) -> SimpleResult<Self> {
        let ClusterInput {
            cluster_id,
            mut svs,
            assembly_links,
            foldbacks,
            double_minute_svs,
            requires_replication,
            allele_ploidy,
        } = input;

        for sv in svs.iter() {
            if !sv.ploidy.is_valid() {
                bail!(
                    "SV '{}' has inconsistent ploidy values (min: {} estimate: {} max: {} uncertainty: {})",
                    sv.id,
                    sv.ploidy.min,
                    sv.ploidy.estimate,
                    sv.ploidy.max,
                    sv.ploidy.uncertainty
                );
            }
            if (sv.sv_type == SVType::SGL) != sv.is_sgl() {
                bail!(
                    "SV '{}' of type {} has an inconsistent breakend count",
                    sv.id,
                    sv.sv_type
                );
            }
        }

        for sv in svs.iter() {
            for breakend_index in 0..sv.breakend_count() {
                if let Some(partner) = sv
                    .get_breakend(breakend_index)
                    .and_then(|x| x.deletion_bridge_partner)
                {
                    check_breakend_id(&svs, cluster_id, &partner, "deletion bridge")?;
                }
            }
        }

        for &sv_index in double_minute_svs.iter() {
            if sv_index >= svs.len() {
                bail!("Cluster {cluster_id} double minute list references unknown SV {sv_index}");
            }
        }
        let double_minute_svs = double_minute_svs.into_iter().collect::<BTreeSet<_>>();

        let mut links = Vec::new();
        for link in assembly_links.iter() {
            check_breakend_id(&svs, cluster_id, &link.breakend1, "assembly link")?;
            check_breakend_id(&svs, cluster_id, &link.breakend2, "assembly link")?;
            let (id1, id2) = (link.breakend1, link.breakend2);
            if id1.sv_index == id2.sv_index && !double_minute_svs.contains(&id1.sv_index) {
                bail!("Cluster {cluster_id} assembly link {id1}-{id2} joins a non double-minute SV to itself");
            }
            let be1 = svs[id1.sv_index].get_breakend(id1.breakend_index).unwrap();
            let be2 = svs[id2.sv_index].get_breakend(id2.breakend_index).unwrap();
            if be1.chrom != be2.chrom || be1.dir == be2.dir {
                bail!("Cluster {cluster_id} assembly link {id1}-{id2} does not join facing breakends");
            }
            links.push((std::cmp::min(id1, id2), std::cmp::max(id1, id2)));
        }
        for &(id1, id2) in links.iter() {
            for id in [id1, id2] {
                if let Some(be) = get_breakend_mut(&mut svs, id) {
                    be.is_assembled = true;
                }
            }
        }

        for foldback in foldbacks.iter() {
            check_breakend_id(&svs, cluster_id, &foldback.breakend1, "foldback")?;
            check_breakend_id(&svs, cluster_id, &foldback.breakend2, "foldback")?;
            let (id1, id2) = (foldback.breakend1, foldback.breakend2);
            if id1 == id2 {
                bail!("Cluster {cluster_id} foldback {id1} folds onto itself");
            }
            let dir1 = svs[id1.sv_index].get_breakend(id1.breakend_index).unwrap().dir;
            let dir2 = svs[id2.sv_index].get_breakend(id2.breakend_index).unwrap().dir;
            if dir1 != dir2 {
                bail!("Cluster {cluster_id} foldback {id1}-{id2} breakends face opposite directions");
            }
            svs[id1.sv_index].foldback_partners[id1.breakend_index] = Some(id2);
            svs[id2.sv_index].foldback_partners[id2.breakend_index] = Some(id1);
        }

        for sv in svs.iter_mut() {
            sv.replication_count = if requires_replication {
                std::cmp::max(1, sv.ploidy.estimate.round() as usize)
            } else {
                1
            };
        }

        Ok(Self {
            cluster_id,
            svs,
            assembly_links: links,
            double_minute_svs,
            requires_replication,
            allele_ploidy,
        })
    }

    pub fn sv(&self, sv_index: usize) -> &StructuralVariant {
        &self.svs[sv_index]
    }

    /// Lookup a breakend by id
    ///
    /// All breakend ids used in chaining are created from the validated cluster, so the id is
    /// expected to be valid.
    ///
    pub fn breakend(&self, id: BreakendId) -> &Breakend {
        self.svs[id.sv_index]
            .get_breakend(id.breakend_index)
            .unwrap()
    }

    /// The opposite breakend of the same SV, or None for single breakend variants
    ///
    pub fn other_breakend(&self, id: BreakendId) -> Option<BreakendId> {
        let other = id.other();
        self.svs[other.sv_index]
            .get_breakend(other.breakend_index)
            .map(|_| other)
    }

    pub fn is_double_minute(&self, sv_index: usize) -> bool {
        self.double_minute_svs.contains(&sv_index)
    }

    pub fn all_sv_indexes(&self) -> BTreeSet<usize> {
        (0..self.svs.len()).collect()
    }

    /// Build the chromosome to ordered breakend map for the given SVs
    ///
    /// Breakends on each chromosome are sorted by position, with ties resolved by breakend id.
    ///
    pub fn get_chr_breakend_map(&self, sv_indexes: &BTreeSet<usize>) -> ChrBreakendMap {
        let mut chr_map = ChrBreakendMap::new();
        for &sv_index in sv_indexes.iter() {
            for id in self.svs[sv_index].breakend_ids(sv_index) {
                chr_map
                    .entry(self.breakend(id).chrom.clone())
                    .or_default()
                    .push(id);
            }
        }
        for breakends in chr_map.values_mut() {
            breakends.sort_by_key(|&id| (self.breakend(id).pos, id));
        }
        chr_map
    }
}

fn check_breakend_id(
    svs: &[StructuralVariant],
    cluster_id: usize,
    id: &BreakendId,
    label: &str,
) -> SimpleResult<()> {
    let is_valid = svs
        .get(id.sv_index)
        .is_some_and(|sv| sv.get_breakend(id.breakend_index).is_some());
    if !is_valid {
        bail!("Cluster {cluster_id} {label} references unknown breakend {id}");
    }
    Ok(())
}

fn get_breakend_mut(svs: &mut [StructuralVariant], id: BreakendId) -> Option<&mut Breakend> {
    let sv = svs.get_mut(id.sv_index)?;
    match id.breakend_index {
        0 => Some(&mut sv.breakend1),
        1 => sv.breakend2.as_mut(),
        _ => None,
    }
}

/// Cluster construction shortcuts shared by unit tests across the chaining modules
///
#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::breakpoint::{BreakendDirection, ChromosomeArm, SVPloidy};

    pub fn get_test_breakend(chrom: &str, pos: i64, dir: BreakendDirection) -> Breakend {
        Breakend {
            chrom: chrom.to_string(),
            arm: ChromosomeArm::Q,
            pos,
            dir,
            homology_len: 0,
            anchor_distance: 0,
            deletion_bridge_partner: None,
            is_assembled: false,
        }
    }

    pub fn get_test_ploidy(estimate: f64) -> SVPloidy {
        let uncertainty = 0.2;
        SVPloidy {
            min: (estimate - uncertainty).max(0.0),
            estimate,
            max: estimate + uncertainty,
            uncertainty,
        }
    }

    pub fn get_test_sv(
        id: &str,
        sv_type: SVType,
        breakend1: Breakend,
        breakend2: Option<Breakend>,
        ploidy: f64,
    ) -> StructuralVariant {
        StructuralVariant {
            id: id.to_string(),
            sv_type,
            breakend1,
            breakend2,
            ploidy: get_test_ploidy(ploidy),
            foldback_partners: [None, None],
            replication_count: 0,
        }
    }

    /// Deletion with a left-anchored start breakend and right-anchored end breakend
    pub fn get_test_del(id: &str, chrom: &str, start: i64, end: i64, ploidy: f64) -> StructuralVariant {
        get_test_sv(
            id,
            SVType::DEL,
            get_test_breakend(chrom, start, BreakendDirection::LeftAnchor),
            Some(get_test_breakend(chrom, end, BreakendDirection::RightAnchor)),
            ploidy,
        )
    }

    /// Duplication with a right-anchored start breakend and left-anchored end breakend
    pub fn get_test_dup(id: &str, chrom: &str, start: i64, end: i64, ploidy: f64) -> StructuralVariant {
        get_test_sv(
            id,
            SVType::DUP,
            get_test_breakend(chrom, start, BreakendDirection::RightAnchor),
            Some(get_test_breakend(chrom, end, BreakendDirection::LeftAnchor)),
            ploidy,
        )
    }

    /// Inversion breakpoint with both breakends facing the same direction
    pub fn get_test_inv(
        id: &str,
        chrom: &str,
        start: i64,
        end: i64,
        dir: BreakendDirection,
        ploidy: f64,
    ) -> StructuralVariant {
        get_test_sv(
            id,
            SVType::INV,
            get_test_breakend(chrom, start, dir),
            Some(get_test_breakend(chrom, end, dir)),
            ploidy,
        )
    }

    pub fn get_test_sgl(id: &str, chrom: &str, pos: i64, dir: BreakendDirection, ploidy: f64) -> StructuralVariant {
        get_test_sv(
            id,
            SVType::SGL,
            get_test_breakend(chrom, pos, dir),
            None,
            ploidy,
        )
    }

    pub fn get_test_cluster_input(svs: Vec<StructuralVariant>, requires_replication: bool) -> ClusterInput {
        ClusterInput {
            cluster_id: 0,
            svs,
            assembly_links: Vec::new(),
            foldbacks: Vec::new(),
            double_minute_svs: Vec::new(),
            requires_replication,
            allele_ploidy: BTreeMap::new(),
        }
    }

    pub fn get_test_cluster(svs: Vec<StructuralVariant>, requires_replication: bool) -> Cluster {
        Cluster::from_input(get_test_cluster_input(svs, requires_replication)).unwrap()
    }
}
