//! Chain reconstruction for clusters of structural variant breakends
//!
//! Each cluster is chained independently: candidate templated insertions are enumerated, then a
//! rule cascade repeatedly proposes the most constrained links, which are allocated into chains
//! until no candidates remain.
//!

mod builder_context;
mod candidate_links;
mod chain_finder;
mod chain_state;
mod link_allocator;
mod linked_pair;
mod ploidy_limits;
mod ploidy_utils;
mod proposed_links;
mod rule_selector;
mod sv_chain;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::channel;

use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use thousands::Separable;

use crate::cluster::Cluster;

pub use chain_finder::{ChainFinder, ChainingDiagnostics, ChainingStatus};
pub use linked_pair::LinkType;
pub use proposed_links::ChainingRule;
pub use sv_chain::ChainMetrics;

/// Number of consecutive rule passes without a new link after which chaining of a cluster is
/// abandoned
pub const STALLED_ITERATION_LIMIT: usize = 5;

/// Tuning for one chaining run, shared by all clusters
///
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChainingConfig {
    /// Use allele-specific ploidy segments to find cluster ploidy walls
    pub use_allele_ploidies: bool,

    /// Check all chain invariants after every successful link
    pub validate_chains: bool,

    /// Print chaining trace for every cluster directly to stderr
    pub debug: bool,
}

impl Default for ChainingConfig {
    fn default() -> Self {
        Self {
            use_allele_ploidies: true,
            validate_chains: false,
            debug: false,
        }
    }
}

/// Conditions which abandon chaining for one cluster
///
#[derive(Clone, Debug, PartialEq)]
pub enum ChainingFailure {
    InvalidInput(String),
    InvalidState(String),
    Stalled { iterations: usize },
}

impl fmt::Display for ChainingFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            Self::InvalidState(msg) => write!(f, "Invalid chaining state: {msg}"),
            Self::Stalled { iterations } => {
                write!(f, "Chaining stalled after {iterations} iterations without a new link")
            }
        }
    }
}

impl std::error::Error for ChainingFailure {}

/// Summary of one unique chain, ready for output
///
#[derive(Clone, Debug, Serialize)]
pub struct ChainRecord {
    pub chain_id: usize,
    pub ploidy: f64,
    pub ploidy_uncertainty: f64,
    pub link_count: usize,
    pub sv_count: usize,
    pub is_closed: bool,
    pub metrics: ChainMetrics,
    pub duplicate_count: usize,

    /// SV ids in chain order
    pub sv_path: Vec<String>,
}

/// Summary of one link placed in a unique chain, ready for output
///
#[derive(Clone, Debug, Serialize)]
pub struct LinkRecord {
    pub chain_id: usize,
    pub chain_position: usize,
    pub link_reason: ChainingRule,
    pub link_index: usize,
    pub link_type: LinkType,
    pub first: String,
    pub second: String,
    pub length: i64,
    pub is_assembled: bool,
    pub repeat_count: usize,
    pub ploidy: f64,
}

/// Complete chaining outcome for one cluster
///
pub struct ClusterChainResult {
    pub cluster_id: usize,
    pub sv_count: usize,
    pub status: ChainingStatus,
    pub diagnostics: ChainingDiagnostics,
    pub chains: Vec<ChainRecord>,
    pub links: Vec<LinkRecord>,
}

impl ClusterChainResult {
    /// Result for a cluster which failed input validation and was never chained
    ///
    pub fn invalid_input(cluster_id: usize, sv_count: usize, message: String) -> Self {
        Self {
            cluster_id,
            sv_count,
            status: ChainingStatus::Failed(ChainingFailure::InvalidInput(message)),
            diagnostics: ChainingDiagnostics::default(),
            chains: Vec::new(),
            links: Vec::new(),
        }
    }
}

/// Chain a single cluster and summarize the result
///
pub fn chain_cluster(
    cluster: &Cluster,
    config: &ChainingConfig,
    assembled_links_only: bool,
) -> ClusterChainResult {
    let mut chain_finder = ChainFinder::new(cluster, config);
    if let Err(failure) = chain_finder.form_chains(assembled_links_only) {
        info!("Cluster {}: chaining failed: {failure}", cluster.cluster_id);
    }
    ClusterChainResult {
        cluster_id: cluster.cluster_id,
        sv_count: cluster.svs.len(),
        status: chain_finder.status().clone(),
        diagnostics: chain_finder.diagnostics(),
        chains: chain_finder.get_chain_records(),
        links: chain_finder.get_link_records(),
    }
}

/// Chain all clusters on a worker pool
///
/// Results are returned in cluster input order.
///
pub fn chain_clusters(
    clusters: &[Cluster],
    config: &ChainingConfig,
    assembled_links_only: bool,
    thread_count: usize,
) -> Vec<ClusterChainResult> {
    info!("Chaining {} clusters", clusters.len().separate_with_commas());

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .unwrap();

    let (tx, rx) = channel();
    worker_pool.scope(move |scope| {
        for (cluster_index, cluster) in clusters.iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = chain_cluster(cluster, config, assembled_links_only);
                tx.send((cluster_index, result)).unwrap();
            });
        }
    });

    let results = rx
        .into_iter()
        .sorted_by_key(|(cluster_index, _)| *cluster_index)
        .map(|(_, result)| result)
        .collect::<Vec<_>>();

    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    for result in results.iter() {
        *status_counts.entry(result.status.label().to_string()).or_default() += 1;
    }
    for (label, count) in status_counts.iter() {
        info!("Clusters with chaining status {label}: {count}");
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::test_utils::*;

    #[test]
    fn test_chain_clusters_order() {
        let clusters = (0..4)
            .map(|cluster_id| {
                let svs = vec![
                    get_test_del("a", "chr1", 100, 300, 1.0),
                    get_test_del("b", "chr1", 500, 700, 1.0),
                ];
                let mut input = get_test_cluster_input(svs, false);
                input.cluster_id = cluster_id;
                Cluster::from_input(input).unwrap()
            })
            .collect::<Vec<_>>();

        let results = chain_clusters(&clusters, &ChainingConfig::default(), false, 2);
        let cluster_ids = results.iter().map(|x| x.cluster_id).collect::<Vec<_>>();
        assert_eq!(cluster_ids, vec![0, 1, 2, 3]);
        for result in results.iter() {
            assert_eq!(result.status, ChainingStatus::Complete);
            assert_eq!(result.chains.len(), 1);
            assert_eq!(result.links.len(), 1);
            assert_eq!(result.chains[0].sv_path, vec!["a", "b"]);
        }
    }

    #[test]
    fn test_invalid_input_result() {
        let result = ClusterChainResult::invalid_input(9, 3, "no SVs".to_string());
        assert_eq!(result.cluster_id, 9);
        assert_eq!(result.sv_count, 3);
        assert_eq!(result.status.label(), "failed");
        assert_eq!(
            result.status.failure(),
            Some(&ChainingFailure::InvalidInput("no SVs".to_string()))
        );
        assert!(result.chains.is_empty());
        assert_eq!(result.diagnostics.link_count, 0);
    }

    #[test]
    fn test_failure_display() {
        let failure = ChainingFailure::Stalled { iterations: 5 };
        assert_eq!(
            failure.to_string(),
            "Chaining stalled after 5 iterations without a new link"
        );
    }
}
