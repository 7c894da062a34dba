use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a breakend
///
/// 'LeftAnchor' means that the sequence to the left side of the breakend is retained in the
/// derivative chromosome, corresponding to orientation +1. A 'LeftAnchor' breakend would
/// correspond to the left side of a simple deletion.
///
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, PartialOrd, Ord, Serialize)]
pub enum BreakendDirection {
    LeftAnchor,
    RightAnchor,
}

impl BreakendDirection {
    pub fn orientation(&self) -> i8 {
        match self {
            BreakendDirection::LeftAnchor => 1,
            BreakendDirection::RightAnchor => -1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, PartialOrd, Ord, Serialize)]
pub enum ChromosomeArm {
    #[default]
    P,
    Q,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display)]
pub enum SVType {
    DEL,
    DUP,
    INS,
    INV,
    BND,
    SGL,
}

/// Stable handle for one breakend in the cluster's SV arena
///
/// `breakend_index` is 0 for the SV start breakend and 1 for the end breakend.
///
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize)]
pub struct BreakendId {
    pub sv_index: usize,
    pub breakend_index: usize,
}

impl BreakendId {
    pub fn new(sv_index: usize, breakend_index: usize) -> Self {
        Self {
            sv_index,
            breakend_index,
        }
    }

    pub fn is_start(&self) -> bool {
        self.breakend_index == 0
    }

    /// The opposite breakend of the same SV
    ///
    /// Existence of the opposite breakend is not checked here, see `Cluster::other_breakend`
    ///
    pub fn other(&self) -> Self {
        Self {
            sv_index: self.sv_index,
            breakend_index: 1 - self.breakend_index,
        }
    }
}

impl fmt::Display for BreakendId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = if self.is_start() { "s" } else { "e" };
        write!(f, "{}{}", self.sv_index, label)
    }
}

/// One end of an SV
///
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Breakend {
    pub chrom: String,

    #[serde(default)]
    pub arm: ChromosomeArm,

    pub pos: i64,

    pub dir: BreakendDirection,

    /// Length of the microhomology at the breakend junction
    #[serde(default)]
    pub homology_len: i64,

    /// Distance over which the breakend is anchored by local alignment, zero if unknown
    #[serde(default)]
    pub anchor_distance: i64,

    /// Breakend in the deletion bridge facing away from this one, if any
    #[serde(default)]
    pub deletion_bridge_partner: Option<BreakendId>,

    /// True if this breakend participates in at least one assembly-derived link. This is filled
    /// in from the cluster's assembly links on load.
    #[serde(skip)]
    pub is_assembled: bool,
}

/// SV ploidy triple with uncertainty
///
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SVPloidy {
    pub min: f64,
    pub estimate: f64,
    pub max: f64,

    #[serde(default)]
    pub uncertainty: f64,
}

impl SVPloidy {
    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.estimate.is_finite()
            && self.max.is_finite()
            && self.uncertainty >= 0.0
            && self.min <= self.estimate
            && self.estimate <= self.max
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StructuralVariant {
    /// External label for the SV
    pub id: String,

    pub sv_type: SVType,

    pub breakend1: Breakend,

    /// Second breakend, absent for single breakend (SGL) variants
    #[serde(default)]
    pub breakend2: Option<Breakend>,

    pub ploidy: SVPloidy,

    /// The breakend each of this SV's breakends folds back onto
    ///
    /// For a simple foldback this is the opposite breakend of the same SV, for a chained foldback
    /// it is a breakend of another SV. Filled in from the cluster's foldback list on load.
    ///
    #[serde(skip)]
    pub foldback_partners: [Option<BreakendId>; 2],

    /// Number of copies of this SV which can be placed in chains, filled in on load
    #[serde(skip)]
    pub replication_count: usize,
}

impl StructuralVariant {
    pub fn get_breakend(&self, breakend_index: usize) -> Option<&Breakend> {
        match breakend_index {
            0 => Some(&self.breakend1),
            1 => self.breakend2.as_ref(),
            _ => None,
        }
    }

    pub fn is_sgl(&self) -> bool {
        self.breakend2.is_none()
    }

    pub fn is_foldback(&self) -> bool {
        self.foldback_partners.iter().any(|x| x.is_some())
    }

    /// True if the SV folds back directly onto itself
    ///
    pub fn is_simple_foldback(&self, sv_index: usize) -> bool {
        self.foldback_partners[0] == Some(BreakendId::new(sv_index, 1))
    }

    pub fn breakend_count(&self) -> usize {
        if self.is_sgl() { 1 } else { 2 }
    }

    pub fn breakend_ids(&self, sv_index: usize) -> Vec<BreakendId> {
        (0..self.breakend_count())
            .map(|breakend_index| BreakendId::new(sv_index, breakend_index))
            .collect()
    }
}
