use std::collections::BTreeSet;
use std::fmt;

use crate::breakpoint::{BreakendId, StructuralVariant};

/// A breakend with less than this much unlinked ploidy remaining after any allocation is exhausted
pub const PLOIDY_EXHAUSTION_TOLERANCE: f64 = 0.15;

/// Ploidy allocation state for one SV during chaining
///
/// In clusters without replication, all SVs are tracked as exactly single copy.
///
#[derive(Clone, Debug)]
pub struct SvChainState {
    pub sv_index: usize,
    pub ploidy: f64,
    pub min_ploidy: f64,
    pub max_ploidy: f64,
    pub ploidy_uncertainty: f64,

    breakend_count: usize,

    /// Ploidy committed to links from each breakend
    allocated_ploidy: [f64; 2],

    /// Unique partner breakends linked to each breakend
    connections: [BTreeSet<BreakendId>; 2],
}

impl SvChainState {
    pub fn new(sv_index: usize, sv: &StructuralVariant, requires_replication: bool) -> Self {
        let (ploidy, min_ploidy, max_ploidy, ploidy_uncertainty) = if requires_replication {
            (
                sv.ploidy.estimate,
                sv.ploidy.min,
                sv.ploidy.max,
                sv.ploidy.uncertainty,
            )
        } else {
            (1.0, 1.0, 1.0, 0.0)
        };
        Self {
            sv_index,
            ploidy,
            min_ploidy,
            max_ploidy,
            ploidy_uncertainty,
            breakend_count: sv.breakend_count(),
            allocated_ploidy: [0.0; 2],
            connections: Default::default(),
        }
    }

    pub fn breakend_count(&self) -> usize {
        self.breakend_count
    }

    /// Commit ploidy from one breakend to a link with the given partner
    ///
    pub fn add(&mut self, breakend_index: usize, ploidy: f64, partner: BreakendId) {
        self.allocated_ploidy[breakend_index] += ploidy;
        self.connections[breakend_index].insert(partner);
    }

    pub fn allocated_ploidy(&self, breakend_index: usize) -> f64 {
        self.allocated_ploidy[breakend_index]
    }

    pub fn unlinked_ploidy(&self, breakend_index: usize) -> f64 {
        (self.ploidy - self.allocated_ploidy[breakend_index]).max(0.0)
    }

    pub fn max_unlinked_ploidy(&self, breakend_index: usize) -> f64 {
        (self.max_ploidy - self.allocated_ploidy[breakend_index]).max(0.0)
    }

    /// A breakend is exhausted once it has been linked and its remaining ploidy is within
    /// tolerance of zero
    ///
    pub fn is_exhausted(&self, breakend_index: usize) -> bool {
        !self.connections[breakend_index].is_empty()
            && self.unlinked_ploidy(breakend_index) < PLOIDY_EXHAUSTION_TOLERANCE
    }

    pub fn is_exhausted_vs_max(&self, breakend_index: usize) -> bool {
        !self.connections[breakend_index].is_empty()
            && self.max_unlinked_ploidy(breakend_index) < PLOIDY_EXHAUSTION_TOLERANCE
    }

    pub fn is_linked(&self, breakend_index: usize) -> bool {
        !self.connections[breakend_index].is_empty()
    }

    /// True once every breakend of the SV is exhausted
    ///
    pub fn is_complete(&self) -> bool {
        (0..self.breakend_count).all(|x| self.is_exhausted(x))
    }

    pub fn unique_connections(&self, breakend_index: usize) -> &BTreeSet<BreakendId> {
        &self.connections[breakend_index]
    }
}

impl fmt::Display for SvChainState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "sv: {} ploidy: {:.2} [{:.2}-{:.2}] allocated: {:.2}/{:.2}",
            self.sv_index,
            self.ploidy,
            self.min_ploidy,
            self.max_ploidy,
            self.allocated_ploidy[0],
            self.allocated_ploidy[1]
        )
    }
}
